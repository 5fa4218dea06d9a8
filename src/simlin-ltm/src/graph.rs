// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Cycle partitions: the strongly connected components of the dependency
//! graph.  Loops are only comparable to other loops in the same partition.

use crate::common::Result;
use crate::model::{Model, VarId};

/// A non-trivial strongly connected component containing at least one stock.
#[derive(Debug, Clone)]
pub struct Partition {
    pub vars: Vec<VarId>,
    pub stocks: Vec<VarId>,
}

#[derive(Debug, Clone)]
pub struct Partitions {
    /// Per variable: the partition it belongs to, if any.
    pub partition_of: Vec<Option<u32>>,
    pub partitions: Vec<Partition>,
}

impl Partitions {
    pub fn same_partition(&self, a: VarId, b: VarId) -> bool {
        match (
            self.partition_of[a.index()],
            self.partition_of[b.index()],
        ) {
            (Some(pa), Some(pb)) => pa == pb,
            _ => false,
        }
    }
}

/// Partition the dependency graph with Tarjan's algorithm.
///
/// Components that cannot carry a feedback loop (single variables with no
/// self-link) are discarded.  A component with a cycle but no stock is an
/// algebraic loop and fatal: the model cannot be analyzed or simulated.
pub fn partition(model: &Model) -> Result<Partitions> {
    let sccs = Tarjan::run(model);

    let mut raw: Vec<Vec<VarId>> = Vec::new();
    for mut scc in sccs {
        let non_trivial = scc.len() > 1
            || scc
                .first()
                .is_some_and(|&v| model.link_between(v, v).is_some());
        if !non_trivial {
            continue;
        }
        scc.sort_unstable();
        raw.push(scc);
    }
    // deterministic numbering, independent of traversal order
    raw.sort_unstable_by_key(|scc| scc[0]);

    let mut partition_of: Vec<Option<u32>> = vec![None; model.n_vars()];
    let mut partitions = Vec::with_capacity(raw.len());
    for scc in raw {
        let stocks: Vec<VarId> = scc
            .iter()
            .copied()
            .filter(|&v| model.var(v).is_stock())
            .collect();
        if stocks.is_empty() {
            return crate::analysis_err!(
                StocklessCycle,
                model.ident(scc[0]).to_string()
            );
        }
        let idx = partitions.len() as u32;
        for &v in &scc {
            partition_of[v.index()] = Some(idx);
        }
        partitions.push(Partition { vars: scc, stocks });
    }

    Ok(Partitions {
        partition_of,
        partitions,
    })
}

struct Tarjan<'a> {
    model: &'a Model,
    index: Vec<Option<u32>>,
    lowlink: Vec<u32>,
    on_stack: Vec<bool>,
    stack: Vec<VarId>,
    next_index: u32,
    sccs: Vec<Vec<VarId>>,
}

impl<'a> Tarjan<'a> {
    fn run(model: &'a Model) -> Vec<Vec<VarId>> {
        let n = model.n_vars();
        let mut t = Tarjan {
            model,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next_index: 0,
            sccs: Vec::new(),
        };
        for i in 0..n {
            let v = VarId(i as u32);
            if t.index[i].is_none() {
                t.strongconnect(v);
            }
        }
        t.sccs
    }

    fn strongconnect(&mut self, v: VarId) {
        let vi = v.index();
        self.index[vi] = Some(self.next_index);
        self.lowlink[vi] = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack[vi] = true;

        for i in 0..self.model.outgoing_links(v).len() {
            let link = self.model.outgoing_links(v)[i];
            let w = self.model.link(link).to;
            let wi = w.index();
            match self.index[wi] {
                None => {
                    self.strongconnect(w);
                    self.lowlink[vi] = self.lowlink[vi].min(self.lowlink[wi]);
                }
                Some(w_index) if self.on_stack[wi] => {
                    self.lowlink[vi] = self.lowlink[vi].min(w_index);
                }
                _ => {}
            }
        }

        if self.lowlink[vi] == self.index[vi].unwrap() {
            let mut scc = Vec::new();
            loop {
                let w = self.stack.pop().unwrap();
                self.on_stack[w.index()] = false;
                scc.push(w);
                if w == v {
                    break;
                }
            }
            self.sccs.push(scc);
        }
    }
}
