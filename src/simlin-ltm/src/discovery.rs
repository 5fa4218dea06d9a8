// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Per-step loop discovery for models too large to enumerate: from every
//! stock, a depth-first search that maximizes the product of link score
//! magnitudes along the path, pruning any extension weaker than the best
//! product already seen at a node.
//!
//! The search is a heuristic.  A loop can be missed when one of its nodes
//! was already reached with a stronger cumulative product along a different
//! path; missed loops are typically structural siblings of found ones.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;

use crate::graph::Partitions;
use crate::loops::LoopSet;
use crate::model::{LinkId, Model, VarId};

#[derive(Debug)]
pub(crate) struct LoopFinder {
    /// Per variable: outgoing links inside its partition, strongest first.
    sorted_out: Vec<Vec<LinkId>>,
    /// Per variable: best cumulative product seen this step.
    best: Vec<f64>,
    visiting: Vec<bool>,
    path_vars: Vec<VarId>,
    path_links: Vec<LinkId>,
}

/// Magnitude of a link score for path products: NaN sentinels weigh nothing.
#[inline]
fn magnitude(score: f64) -> f64 {
    let m = score.abs();
    if m.is_finite() { m } else { 0.0 }
}

impl LoopFinder {
    pub(crate) fn new(n_vars: usize) -> LoopFinder {
        LoopFinder {
            sorted_out: vec![vec![]; n_vars],
            best: vec![0.0; n_vars],
            visiting: vec![false; n_vars],
            path_vars: Vec::new(),
            path_links: Vec::new(),
        }
    }

    /// Run one step's discovery over the current link scores, recording any
    /// new loops into `set`.
    pub(crate) fn discover(
        &mut self,
        model: &Model,
        partitions: &Partitions,
        scores: &[f64],
        set: &mut LoopSet,
    ) {
        self.best.fill(0.0);

        for (pidx, partition) in partitions.partitions.iter().enumerate() {
            for &v in &partition.vars {
                let out = &mut self.sorted_out[v.index()];
                out.clear();
                out.extend(
                    model
                        .outgoing_links(v)
                        .iter()
                        .copied()
                        .filter(|&l| {
                            partitions.partition_of[model.link(l).to.index()]
                                == Some(pidx as u32)
                        }),
                );
                out.sort_by_key(|&l| Reverse(OrderedFloat(magnitude(scores[l.index()]))));
            }
        }

        for (pidx, partition) in partitions.partitions.iter().enumerate() {
            for &stock in &partition.stocks {
                // best persists across stock iterations within the step
                self.walk(model, scores, set, pidx, stock, stock, 1.0);
                debug_assert!(self.path_vars.is_empty());
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(
        &mut self,
        model: &Model,
        scores: &[f64],
        set: &mut LoopSet,
        pidx: usize,
        target: VarId,
        v: VarId,
        score: f64,
    ) {
        if self.visiting[v.index()] {
            if v == target {
                set.add(
                    model,
                    pidx,
                    self.path_links.clone(),
                    self.path_vars.clone(),
                );
            }
            return;
        }
        // strict comparison: a path equal in strength keeps walking
        if score < self.best[v.index()] {
            return;
        }
        self.best[v.index()] = score;
        self.visiting[v.index()] = true;
        self.path_vars.push(v);

        for i in 0..self.sorted_out[v.index()].len() {
            let link = self.sorted_out[v.index()][i];
            let next = model.link(link).to;
            self.path_links.push(link);
            self.walk(
                model,
                scores,
                set,
                pidx,
                target,
                next,
                score * magnitude(scores[link.index()]),
            );
            self.path_links.pop();
        }

        self.path_vars.pop();
        self.visiting[v.index()] = false;
    }
}
