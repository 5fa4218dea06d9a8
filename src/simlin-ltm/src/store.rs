// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The per-run value store and the ceteris-paribus partial-change evaluator.
//!
//! After each integrator step the store holds the current and previous rows
//! and, for every instantaneous link x -> z, the partial change in z obtained
//! by re-evaluating z's equation with x at its current value and every other
//! input held at the previous step.

use serde::Serialize;

use crate::common::Ident;
use crate::model::{Model, VarId};
use crate::variable::Variable;

/// An equation that produced a non-finite value during re-evaluation.
/// Scores touched by it carry a NaN sentinel for the step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalFailure {
    pub ident: Ident,
    pub step: usize,
}

#[derive(Debug)]
pub(crate) struct ValueStore {
    prev: Box<[f64]>,
    curr: Box<[f64]>,
    /// Per stock: the change the current flows produce, dt * net(t), cut
    /// short where a non-negative stock would be clamped at zero.
    stock_change_curr: Box<[f64]>,
    stock_change_prev: Box<[f64]>,
    /// Per link: the partial change of the target due to the source alone.
    partials: Box<[f64]>,
    args: Vec<f64>,
}

impl ValueStore {
    pub(crate) fn new(model: &Model) -> ValueStore {
        let n = model.n_vars();
        ValueStore {
            prev: vec![0.0; n].into_boxed_slice(),
            curr: vec![0.0; n].into_boxed_slice(),
            stock_change_curr: vec![0.0; n].into_boxed_slice(),
            stock_change_prev: vec![0.0; n].into_boxed_slice(),
            partials: vec![0.0; model.n_links()].into_boxed_slice(),
            args: Vec::new(),
        }
    }

    /// Ingest the saved row for `step` and recompute partials.
    ///
    /// `values` is indexed by `VarId` and must contain the post-advance value
    /// of every variable.
    pub(crate) fn begin_step(
        &mut self,
        model: &Model,
        step: usize,
        dt: f64,
        values: &[f64],
        failures: &mut Vec<EvalFailure>,
    ) {
        debug_assert_eq!(values.len(), self.curr.len());

        std::mem::swap(&mut self.prev, &mut self.curr);
        self.curr.copy_from_slice(values);
        std::mem::swap(&mut self.stock_change_prev, &mut self.stock_change_curr);

        for (id, var) in model.vars() {
            let Variable::Stock { non_negative, .. } = var else {
                continue;
            };
            let (inflows, outflows) = model.stock_flows(id);
            let net: f64 = inflows.iter().map(|f| self.curr[f.index()]).sum::<f64>()
                - outflows.iter().map(|f| self.curr[f.index()]).sum::<f64>();
            let mut change = dt * net;
            // a clamped stock stops at zero; score the change the
            // integrator will actually apply, not the flows' overdraw
            if *non_negative {
                let level = self.curr[id.index()];
                if level + change < 0.0 {
                    change = -level;
                }
            }
            self.stock_change_curr[id.index()] = change;
        }

        if step == 0 {
            // no previous row yet; scores this step are all undefined
            self.partials.fill(0.0);
            return;
        }

        for (id, var) in model.vars() {
            let Some(equation) = var.equation() else {
                continue;
            };
            let inputs = model.inputs_of(id);
            if inputs.is_empty() {
                continue;
            }
            let links = model.incoming_links(id);
            let z_prev = self.prev[id.index()];

            self.args.clear();
            self.args
                .extend(inputs.iter().map(|x| self.prev[x.index()]));

            let mut failed = false;
            for (j, &link) in links.iter().enumerate() {
                let x = inputs[j];
                self.args[j] = self.curr[x.index()];
                let val = equation.eval(&self.args);
                self.args[j] = self.prev[x.index()];

                let partial = val - z_prev;
                if partial.is_finite() {
                    self.partials[link.index()] = partial;
                } else {
                    self.partials[link.index()] = f64::NAN;
                    failed = true;
                }
            }
            if failed {
                failures.push(EvalFailure {
                    ident: var.ident().to_string(),
                    step,
                });
            }
        }
    }

    /// First difference of a variable over the last step.
    #[inline]
    pub(crate) fn delta(&self, id: VarId) -> f64 {
        self.curr[id.index()] - self.prev[id.index()]
    }

    #[inline]
    pub(crate) fn partial(&self, link: crate::model::LinkId) -> f64 {
        self.partials[link.index()]
    }

    /// (current, previous) per-step change of a stock.
    #[inline]
    pub(crate) fn stock_change(&self, id: VarId) -> (f64, f64) {
        (
            self.stock_change_curr[id.index()],
            self.stock_change_prev[id.index()],
        )
    }
}
