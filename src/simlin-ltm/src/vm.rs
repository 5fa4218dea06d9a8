// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! A small Euler integrator over the compiled model, for hosts that don't
//! bring their own and for driving analyses end to end.
//!
//! Each step evaluates flows and auxiliaries in dependency order from the
//! current stock values, saves the row, and hands it to the attached
//! analysis engine before advancing the stocks.

use std::collections::HashMap;
use std::rc::Rc;

use crate::analysis::LtmResults;
use crate::common::Result;
use crate::engine::{LtmEngine, Options};
use crate::model::{Model, TIME_OFF, VarId};
use crate::results::{Results, Specs};
use crate::variable::Variable;

#[derive(Debug)]
pub struct Vm {
    model: Rc<Model>,
    specs: Specs,
    ltm: Option<LtmEngine>,
    /// Every variable, ordered so initial values resolve before their users.
    init_runlist: Vec<VarId>,
    /// Flows and auxiliaries, in within-step dependency order.
    step_runlist: Vec<VarId>,
    stocks: Vec<(VarId, bool)>,
    data: Box<[f64]>,
    n_slots: usize,
    n_chunks: usize,
    /// Next step to compute.
    step: usize,
    args: Vec<f64>,
}

impl Vm {
    pub fn new(model: Rc<Model>, specs: Specs) -> Result<Vm> {
        let init_runlist = init_order(&model)?;
        let step_runlist = step_order(&model)?;
        let stocks: Vec<(VarId, bool)> = model
            .vars()
            .filter_map(|(id, var)| match var {
                Variable::Stock { non_negative, .. } => Some((id, *non_negative)),
                _ => None,
            })
            .collect();

        let n_slots = model.n_vars();
        let n_chunks = specs.n_steps();
        let data = vec![0.0; n_slots * n_chunks].into_boxed_slice();

        Ok(Vm {
            model,
            specs,
            ltm: None,
            init_runlist,
            step_runlist,
            stocks,
            data,
            n_slots,
            n_chunks,
            step: 0,
            args: Vec::new(),
        })
    }

    /// Attach a loop analysis engine.  Call before running.
    pub fn with_ltm(mut self, options: Options) -> Result<Vm> {
        self.ltm = Some(LtmEngine::new(self.model.clone(), options)?);
        Ok(self)
    }

    pub fn run_to_end(&mut self) -> Result<()> {
        let end = self.specs.stop;
        self.run_to(end)
    }

    /// Advance until the saved time would pass `end`.  Resumable: a host may
    /// run in slices and stop between steps.
    pub fn run_to(&mut self, end: f64) -> Result<()> {
        let dt = self.specs.dt;
        let epsilon = dt / 2.0;

        while self.step < self.n_chunks {
            let t = self.specs.start + self.step as f64 * dt;
            if t > end + epsilon {
                break;
            }
            if self.step == 0 {
                self.eval_initial(t);
            } else {
                self.advance(t, dt);
            }
            if let Some(ltm) = self.ltm.as_mut() {
                let row = &self.data[self.step * self.n_slots..][..self.n_slots];
                ltm.on_step(t, dt, row);
            }
            self.step += 1;
        }
        Ok(())
    }

    fn eval_initial(&mut self, t: f64) {
        self.data[TIME_OFF] = t;
        for i in 0..self.init_runlist.len() {
            let v = self.init_runlist[i];
            let value = match self.model.var(v) {
                Variable::Stock { init, .. } => {
                    self.args.clear();
                    for &x in self.model.init_inputs_of(v) {
                        self.args.push(self.data[x.index()]);
                    }
                    init.eval(&self.args)
                }
                Variable::Flow { equation, .. } | Variable::Aux { equation, .. } => {
                    self.args.clear();
                    for &x in self.model.inputs_of(v) {
                        self.args.push(self.data[x.index()]);
                    }
                    equation.eval(&self.args)
                }
            };
            self.data[v.index()] = value;
        }
    }

    fn advance(&mut self, t: f64, dt: f64) {
        let (prev_rows, curr) = self.data.split_at_mut(self.step * self.n_slots);
        let prev = &prev_rows[(self.step - 1) * self.n_slots..];
        let curr = &mut curr[..self.n_slots];

        // Euler: integrate stocks from the previous row's flows
        for &(s, non_negative) in &self.stocks {
            let (inflows, outflows) = self.model.stock_flows(s);
            let net: f64 = inflows.iter().map(|f| prev[f.index()]).sum::<f64>()
                - outflows.iter().map(|f| prev[f.index()]).sum::<f64>();
            let mut value = prev[s.index()] + dt * net;
            if non_negative && value < 0.0 {
                value = 0.0;
            }
            curr[s.index()] = value;
        }
        curr[TIME_OFF] = t;

        for &v in &self.step_runlist {
            let equation = match self.model.var(v) {
                Variable::Flow { equation, .. } | Variable::Aux { equation, .. } => equation,
                Variable::Stock { .. } => continue,
            };
            self.args.clear();
            for &x in self.model.inputs_of(v) {
                self.args.push(curr[x.index()]);
            }
            curr[v.index()] = equation.eval(&self.args);
        }
    }

    /// The saved series plus, if an analysis engine was attached, its
    /// finalized snapshot.
    pub fn into_results(self) -> (Results, Option<LtmResults>) {
        let offsets: HashMap<_, _> = self
            .model
            .vars()
            .map(|(id, var)| (var.ident().to_string(), id.index()))
            .collect();
        let results = Results {
            offsets,
            data: self.data,
            step_size: self.n_slots,
            step_count: self.step,
            specs: self.specs,
        };
        (results, self.ltm.map(LtmEngine::finish))
    }
}

/// Initial-value order: stocks depend on their initial equation's inputs,
/// everything else on its equation's inputs.  Stock initials participate
/// like any other dependency here.
fn init_order(model: &Model) -> Result<Vec<VarId>> {
    toposort(
        model,
        |v| match model.var(v) {
            Variable::Stock { .. } => model.init_inputs_of(v),
            _ => model.inputs_of(v),
        },
        |dep| dep.index() == TIME_OFF,
    )
}

/// Within-step order over flows and auxiliaries only.  Stocks were advanced
/// before any equation runs, so they never constrain the order; any cycle
/// left over is an algebraic loop.
fn step_order(model: &Model) -> Result<Vec<VarId>> {
    let order = toposort(
        model,
        |v| match model.var(v) {
            Variable::Stock { .. } => &[],
            _ => model.inputs_of(v),
        },
        |dep| model.var(dep).is_stock() || dep.index() == TIME_OFF,
    )?;
    Ok(order
        .into_iter()
        .filter(|&v| !model.var(v).is_stock() && v.index() != TIME_OFF)
        .collect())
}

fn toposort<'a, F, S>(model: &'a Model, deps: F, skip: S) -> Result<Vec<VarId>>
where
    F: Fn(VarId) -> &'a [VarId],
    S: Fn(VarId) -> bool,
{
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Visiting,
        Done,
    }

    fn add<'a, F, S>(
        model: &'a Model,
        deps: &F,
        skip: &S,
        marks: &mut [Mark],
        order: &mut Vec<VarId>,
        v: VarId,
    ) -> Result<()>
    where
        F: Fn(VarId) -> &'a [VarId],
        S: Fn(VarId) -> bool,
    {
        match marks[v.index()] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                return crate::sim_err!(CircularDependency, model.ident(v).to_string());
            }
            Mark::New => {}
        }
        marks[v.index()] = Mark::Visiting;
        for &dep in deps(v) {
            if skip(dep) {
                continue;
            }
            add(model, deps, skip, marks, order, dep)?;
        }
        marks[v.index()] = Mark::Done;
        order.push(v);
        Ok(())
    }

    let mut marks = vec![Mark::New; model.n_vars()];
    let mut order = Vec::with_capacity(model.n_vars());
    for (v, _) in model.vars() {
        if v.index() == TIME_OFF {
            continue;
        }
        add(model, &deps, &skip, &mut marks, &mut order, v)?;
    }
    Ok(order)
}
