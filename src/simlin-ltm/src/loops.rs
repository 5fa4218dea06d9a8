// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Feedback loop identity and exhaustive loop enumeration.
//!
//! A loop is an ordered cycle of links through at least one stock,
//! canonicalized by rotating its smallest variable id to the front and
//! deduplicated on its full edge sequence: the two orientations of a cycle
//! are distinct loops.

use std::collections::HashSet;

use serde::Serialize;
use smallvec::SmallVec;

use crate::common::Result;
use crate::graph::Partitions;
use crate::model::{LinkId, Model, VarId};
use crate::variable::LinkPolarity;

/// Loop polarity from link structure: reinforcing with an even number of
/// negative links, balancing with an odd number, undetermined if any link
/// polarity is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopPolarity {
    Reinforcing,
    Balancing,
    Undetermined,
}

impl LoopPolarity {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            LoopPolarity::Reinforcing => "R",
            LoopPolarity::Balancing => "B",
            LoopPolarity::Undetermined => "U",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Loop {
    pub id: String,
    /// Edge sequence; `links[i]` runs from `vars[i]` to `vars[(i+1) % n]`.
    pub links: Vec<LinkId>,
    pub vars: Vec<VarId>,
    pub stocks: SmallVec<[VarId; 2]>,
    pub polarity: LoopPolarity,
    pub partition: usize,
}

impl Loop {
    pub fn format_path(&self, model: &Model) -> String {
        let mut path = String::new();
        for v in self.vars.iter().chain(self.vars.first()) {
            if !path.is_empty() {
                path.push_str(" -> ");
            }
            path.push_str(model.ident(*v));
        }
        path
    }
}

/// The discovered loops of a run, deduplicated on canonical edge sequence.
#[derive(Debug)]
pub(crate) struct LoopSet {
    loops: Vec<Loop>,
    seen: HashSet<Vec<LinkId>>,
    n_reinforcing: usize,
    n_balancing: usize,
    n_undetermined: usize,
}

impl LoopSet {
    pub(crate) fn new() -> LoopSet {
        LoopSet {
            loops: Vec::new(),
            seen: HashSet::new(),
            n_reinforcing: 0,
            n_balancing: 0,
            n_undetermined: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.loops.len()
    }

    pub(crate) fn loops(&self) -> &[Loop] {
        &self.loops
    }

    pub(crate) fn into_loops(self) -> Vec<Loop> {
        self.loops
    }

    /// Record a cycle; returns true if it was new.
    pub(crate) fn add(
        &mut self,
        model: &Model,
        partition: usize,
        mut links: Vec<LinkId>,
        mut vars: Vec<VarId>,
    ) -> bool {
        debug_assert_eq!(links.len(), vars.len());
        debug_assert!(!vars.is_empty());

        // canonical rotation: smallest variable id first
        let pivot = vars
            .iter()
            .enumerate()
            .min_by_key(|&(_, &v)| v)
            .map(|(i, _)| i)
            .unwrap();
        vars.rotate_left(pivot);
        links.rotate_left(pivot);

        if !self.seen.insert(links.clone()) {
            return false;
        }

        let mut negatives = 0;
        let mut undetermined = false;
        for &link in &links {
            match model.link(link).polarity {
                LinkPolarity::Negative => negatives += 1,
                LinkPolarity::Unknown => undetermined = true,
                LinkPolarity::Positive => {}
            }
        }
        let polarity = if undetermined {
            LoopPolarity::Undetermined
        } else if negatives % 2 == 0 {
            LoopPolarity::Reinforcing
        } else {
            LoopPolarity::Balancing
        };

        let counter = match polarity {
            LoopPolarity::Reinforcing => {
                self.n_reinforcing += 1;
                self.n_reinforcing
            }
            LoopPolarity::Balancing => {
                self.n_balancing += 1;
                self.n_balancing
            }
            LoopPolarity::Undetermined => {
                self.n_undetermined += 1;
                self.n_undetermined
            }
        };
        let id = format!("{}{}", polarity.abbreviation(), counter);

        let stocks: SmallVec<[VarId; 2]> = vars
            .iter()
            .copied()
            .filter(|&v| model.var(v).is_stock())
            .collect();

        self.loops.push(Loop {
            id,
            links,
            vars,
            stocks,
            polarity,
            partition,
        });
        true
    }
}

/// Enumerate every elementary cycle in every partition.
///
/// Returns `None` when the count exceeds `max_loops`; callers fall back to
/// per-step strongest-path discovery.  A cycle with no stock is an algebraic
/// loop and fatal.
pub(crate) fn enumerate_loops(
    model: &Model,
    partitions: &Partitions,
    max_loops: usize,
) -> Result<Option<LoopSet>> {
    let mut set = LoopSet::new();
    let mut enumerator = Enumerator {
        model,
        partitions,
        partition: 0,
        start: VarId(0),
        visited: vec![false; model.n_vars()],
        path_vars: Vec::new(),
        path_links: Vec::new(),
        set: &mut set,
        max_loops,
        within_budget: true,
    };

    for (pidx, partition) in partitions.partitions.iter().enumerate() {
        enumerator.partition = pidx as u32;
        for &start in &partition.vars {
            enumerator.start = start;
            enumerator.visited[start.index()] = true;
            enumerator.path_vars.push(start);
            enumerator.dfs(start)?;
            enumerator.path_vars.pop();
            enumerator.visited[start.index()] = false;
            if !enumerator.within_budget {
                return Ok(None);
            }
        }
    }

    Ok(Some(set))
}

struct Enumerator<'a> {
    model: &'a Model,
    partitions: &'a Partitions,
    partition: u32,
    start: VarId,
    visited: Vec<bool>,
    path_vars: Vec<VarId>,
    path_links: Vec<LinkId>,
    set: &'a mut LoopSet,
    max_loops: usize,
    within_budget: bool,
}

impl Enumerator<'_> {
    fn dfs(&mut self, current: VarId) -> Result<()> {
        if !self.within_budget {
            return Ok(());
        }
        for i in 0..self.model.outgoing_links(current).len() {
            let link = self.model.outgoing_links(current)[i];
            let next = self.model.link(link).to;
            if self.partitions.partition_of[next.index()] != Some(self.partition) {
                continue;
            }
            if next == self.start {
                self.path_links.push(link);
                self.record_cycle()?;
                self.path_links.pop();
            } else if !self.visited[next.index()] && next > self.start {
                // only walk ids above the start so each cycle is produced
                // exactly once, rooted at its smallest variable
                self.visited[next.index()] = true;
                self.path_vars.push(next);
                self.path_links.push(link);
                self.dfs(next)?;
                self.path_links.pop();
                self.path_vars.pop();
                self.visited[next.index()] = false;
            }
            if !self.within_budget {
                return Ok(());
            }
        }
        Ok(())
    }

    fn record_cycle(&mut self) -> Result<()> {
        let has_stock = self
            .path_vars
            .iter()
            .any(|&v| self.model.var(v).is_stock());
        if !has_stock {
            return crate::analysis_err!(
                StocklessCycle,
                self.model.ident(self.path_vars[0]).to_string()
            );
        }
        self.set.add(
            self.model,
            self.partition as usize,
            self.path_links.clone(),
            self.path_vars.clone(),
        );
        if self.set.len() > self.max_loops {
            self.within_budget = false;
        }
        Ok(())
    }
}
