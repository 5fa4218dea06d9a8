// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The per-run analysis engine: the host's integrator calls [`LtmEngine::on_step`]
//! after every advance and [`LtmEngine::finish`] at the end of the run.
//!
//! Within a step the pipeline runs in a fixed order: partial-change
//! evaluation, link scoring, loop discovery (in per-step mode), raw loop
//! scoring.  Normalization and dominance wait for `finish`.  Cancelling a
//! run is simply not calling `on_step` again; the partial analysis is valid.

use std::rc::Rc;

use crate::analysis::{self, LtmResults};
use crate::common::Result;
use crate::discovery::LoopFinder;
use crate::graph::{self, Partitions};
use crate::loops::{self, LoopSet};
use crate::model::Model;
use crate::score;
use crate::store::{EvalFailure, ValueStore};

/// How the engine decides which feedback loops to score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Enumerate exhaustively if the loop count fits the budget, otherwise
    /// fall back to per-step strongest-path discovery.
    Automatic,
    /// Always enumerate, ignoring the budget.
    Exhaustive,
    /// Always use per-step strongest-path discovery.
    PerStep,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub enabled: bool,
    pub mode: DiscoveryMode,
    /// Loop-count budget for exhaustive enumeration in `Automatic` mode.
    pub max_enumerated_loops: usize,
    /// Loops whose peak relative score stays below this are dropped from
    /// the reported set (never from normalization).
    pub contribution_cutoff: f64,
    /// Run per-step discovery only every n-th step.
    pub discovery_sample: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            enabled: true,
            mode: DiscoveryMode::Automatic,
            max_enumerated_loops: 1000,
            contribution_cutoff: 0.001,
            discovery_sample: 1,
        }
    }
}

#[derive(Debug)]
pub struct LtmEngine {
    model: Rc<Model>,
    options: Options,
    partitions: Partitions,
    store: ValueStore,
    /// Present in per-step discovery mode.
    finder: Option<LoopFinder>,
    set: LoopSet,
    /// Signed link scores, step-major, stride `model.n_links()`.
    link_scores: Vec<f64>,
    /// Raw loop scores, parallel to the loop set.
    raw_scores: Vec<Vec<f64>>,
    times: Vec<f64>,
    failures: Vec<EvalFailure>,
    step: usize,
}

impl LtmEngine {
    /// Validate the model's graph and set up loop discovery.
    ///
    /// Graph inconsistencies (a cycle with no stock) fail here, before any
    /// step runs.
    pub fn new(model: Rc<Model>, options: Options) -> Result<LtmEngine> {
        let partitions = graph::partition(&model)?;

        let (set, finder) = match options.mode {
            DiscoveryMode::Exhaustive => {
                let set = loops::enumerate_loops(&model, &partitions, usize::MAX)?
                    .expect("unbounded enumeration always completes");
                (set, None)
            }
            DiscoveryMode::Automatic => {
                match loops::enumerate_loops(&model, &partitions, options.max_enumerated_loops)? {
                    Some(set) => (set, None),
                    None => (LoopSet::new(), Some(LoopFinder::new(model.n_vars()))),
                }
            }
            DiscoveryMode::PerStep => {
                (LoopSet::new(), Some(LoopFinder::new(model.n_vars())))
            }
        };

        let store = ValueStore::new(&model);
        let raw_scores = vec![Vec::new(); set.len()];
        Ok(LtmEngine {
            model,
            options,
            partitions,
            store,
            finder,
            set,
            link_scores: Vec::new(),
            raw_scores,
            times: Vec::new(),
            failures: Vec::new(),
            step: 0,
        })
    }

    /// True when the loop set was enumerated exhaustively up front.
    pub fn is_exhaustive(&self) -> bool {
        self.finder.is_none()
    }

    pub fn step_count(&self) -> usize {
        self.step
    }

    /// The structural loop census as currently known.  In per-step mode the
    /// set grows as the run exposes new strongest paths.
    pub fn loops(&self) -> &[crate::loops::Loop] {
        self.set.loops()
    }

    pub fn partitions(&self) -> &Partitions {
        &self.partitions
    }

    /// Ingest the saved row for the step the integrator just completed.
    ///
    /// `values` is indexed by `VarId` and must include every variable.  Link
    /// scores for the step are written before any loop score that reads
    /// them; per-step discovery runs in between.
    pub fn on_step(&mut self, t: f64, dt: f64, values: &[f64]) {
        if !self.options.enabled {
            return;
        }
        let step = self.step;
        self.step += 1;
        self.times.push(t);

        self.store
            .begin_step(&self.model, step, dt, values, &mut self.failures);

        let n_links = self.model.n_links();
        let offset = self.link_scores.len();
        self.link_scores.resize(offset + n_links, 0.0);
        score::score_step(
            &self.model,
            &self.store,
            step,
            dt,
            &mut self.link_scores[offset..],
        );

        if let Some(finder) = self.finder.as_mut() {
            let sample = self.options.discovery_sample.max(1);
            if step % sample == 0 {
                let known = self.set.len();
                finder.discover(
                    &self.model,
                    &self.partitions,
                    &self.link_scores[offset..],
                    &mut self.set,
                );
                // newly discovered loops get their history backfilled from
                // the retained link scores
                for l in &self.set.loops()[known..] {
                    let mut raw = Vec::with_capacity(step + 1);
                    for s in 0..step {
                        let scores = &self.link_scores[s * n_links..(s + 1) * n_links];
                        raw.push(loop_raw_score(&l.links, scores));
                    }
                    self.raw_scores.push(raw);
                }
            }
        }

        let scores = &self.link_scores[offset..];
        for (l, raw) in self.set.loops().iter().zip(self.raw_scores.iter_mut()) {
            raw.push(loop_raw_score(&l.links, scores));
        }
    }

    /// Normalize, classify, and snapshot the run.
    pub fn finish(self) -> LtmResults {
        analysis::finalize(
            &self.model,
            &self.partitions,
            self.set.into_loops(),
            self.raw_scores,
            &self.link_scores,
            self.times,
            self.failures,
            self.finder.is_none(),
            self.options.contribution_cutoff,
        )
    }
}

/// Product of signed link scores around a loop.  A zero factor zeroes the
/// product; a NaN factor makes it NaN.
#[inline]
fn loop_raw_score(links: &[crate::model::LinkId], scores: &[f64]) -> f64 {
    links.iter().map(|l| scores[l.index()]).product()
}
