// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The analysis snapshot of a completed run: per-link and per-loop score
//! series, normalized relative scores, runtime polarities, and per-step
//! minimal dominant loop sets.  Everything here is a pure lookup; all
//! computation happens when the run is finalized.

use float_cmp::approx_eq;
use serde::Serialize;

use crate::common::{Error, ErrorCode, ErrorKind, Ident, Result};
use crate::graph::Partitions;
use crate::loops::{Loop, LoopPolarity};
use crate::model::Model;
use crate::store::EvalFailure;
use crate::variable::LinkPolarity;

/// A loop set is dominant when its absolute relative scores sum to at least
/// this share of a partition's total.
const DOMINANCE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct LinkRecord {
    pub from: Ident,
    pub to: Ident,
    pub polarity: LinkPolarity,
    pub is_flow_to_stock: bool,
    /// Signed score per step; NaN marks an evaluation failure.
    pub scores: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopRecord {
    pub id: String,
    /// The cycle's variables in order, starting from its smallest id.
    pub path: Vec<Ident>,
    pub stocks: Vec<Ident>,
    pub structural_polarity: LoopPolarity,
    /// Sign of the raw score over the run: R if always positive, B if always
    /// negative, U if it changes sign or the loop never scored.
    pub runtime_polarity: LoopPolarity,
    pub partition: usize,
    pub raw_scores: Vec<f64>,
    /// Raw score over the partition's absolute total, clamped to [-1, 1];
    /// 0 where undefined.
    pub relative_scores: Vec<f64>,
    pub peak_relative: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionRecord {
    pub vars: Vec<Ident>,
    /// Per step: the normalization denominator, the sum of finite absolute
    /// raw loop scores.
    pub denominators: Vec<f64>,
    /// Per step: ids of the minimal dominant loop set, strongest first.
    pub dominant: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LtmResults {
    pub step_count: usize,
    pub times: Vec<f64>,
    pub links: Vec<LinkRecord>,
    /// Retained loops only; loops whose peak relative score stayed under the
    /// contribution cutoff are dropped after normalization.
    pub loops: Vec<LoopRecord>,
    pub partitions: Vec<PartitionRecord>,
    pub failures: Vec<EvalFailure>,
    /// True when the loop set came from exhaustive enumeration.
    pub exhaustive: bool,
}

impl LtmResults {
    pub fn loop_by_id(&self, id: &str) -> Option<&LoopRecord> {
        self.loops.iter().find(|l| l.id == id)
    }

    /// The minimal dominant loop set in `partition` at `step`.
    pub fn dominant_at(&self, partition: usize, step: usize) -> &[String] {
        &self.partitions[partition].dominant[step]
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|err| {
            Error::new(
                ErrorKind::Analysis,
                ErrorCode::Generic,
                Some(err.to_string()),
            )
        })
    }
}

/// Normalize one step's raw scores into relative scores.
///
/// Returns the denominator.  Non-finite raw scores contribute nothing to the
/// denominator and normalize to 0; everything else is clamped to [-1, 1] to
/// mask floating-point excursions.
pub(crate) fn normalize_step(raws: &[f64], relatives: &mut [f64]) -> f64 {
    debug_assert_eq!(raws.len(), relatives.len());
    let denominator: f64 = raws
        .iter()
        .map(|r| if r.is_finite() { r.abs() } else { 0.0 })
        .sum();

    if denominator == 0.0 || !denominator.is_finite() {
        relatives.fill(0.0);
        return if denominator.is_finite() {
            denominator
        } else {
            0.0
        };
    }

    for (rel, &raw) in relatives.iter_mut().zip(raws) {
        *rel = if raw.is_finite() {
            (raw / denominator).clamp(-1.0, 1.0)
        } else {
            0.0
        };
    }

    if raws.iter().all(|r| r.is_finite()) {
        let total: f64 = relatives.iter().map(|r| r.abs()).sum();
        debug_assert!(approx_eq!(f64, total, 1.0, epsilon = 1e-9));
    }
    denominator
}

/// The minimal set of loops whose absolute relative scores reach the
/// dominance threshold: the strongest loops, fewest first.
pub(crate) fn dominant_set(relatives: &[(usize, f64)]) -> Vec<usize> {
    let mut by_strength: Vec<(usize, f64)> = relatives
        .iter()
        .copied()
        .filter(|(_, r)| *r != 0.0 && r.is_finite())
        .collect();
    by_strength.sort_by(|a, b| {
        b.1.abs()
            .partial_cmp(&a.1.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    let mut dominant = Vec::new();
    let mut total = 0.0;
    for (idx, rel) in by_strength {
        dominant.push(idx);
        total += rel.abs();
        if total >= DOMINANCE_THRESHOLD {
            return dominant;
        }
    }
    // never reached the threshold: no dominant set at this step
    Vec::new()
}

fn runtime_polarity(raw_scores: &[f64]) -> LoopPolarity {
    let mut seen_positive = false;
    let mut seen_negative = false;
    for &raw in raw_scores {
        if !raw.is_finite() || raw == 0.0 {
            continue;
        }
        if raw > 0.0 {
            seen_positive = true;
        } else {
            seen_negative = true;
        }
    }
    match (seen_positive, seen_negative) {
        (true, false) => LoopPolarity::Reinforcing,
        (false, true) => LoopPolarity::Balancing,
        _ => LoopPolarity::Undetermined,
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn finalize(
    model: &Model,
    partitions: &Partitions,
    loops: Vec<Loop>,
    raw_scores: Vec<Vec<f64>>,
    link_scores: &[f64],
    times: Vec<f64>,
    failures: Vec<EvalFailure>,
    exhaustive: bool,
    contribution_cutoff: f64,
) -> LtmResults {
    let step_count = times.len();
    let n_links = model.n_links();
    debug_assert_eq!(loops.len(), raw_scores.len());
    debug_assert_eq!(link_scores.len(), step_count * n_links);

    let links: Vec<LinkRecord> = model
        .links()
        .map(|(id, link)| LinkRecord {
            from: model.ident(link.from).to_string(),
            to: model.ident(link.to).to_string(),
            polarity: link.polarity,
            is_flow_to_stock: link.kind.is_flow_to_stock(),
            scores: (0..step_count)
                .map(|t| link_scores[t * n_links + id.index()])
                .collect(),
        })
        .collect();

    // normalization and dominance, one partition at a time
    let mut relative_scores: Vec<Vec<f64>> = vec![vec![0.0; step_count]; loops.len()];
    let mut partition_records: Vec<PartitionRecord> = partitions
        .partitions
        .iter()
        .map(|p| PartitionRecord {
            vars: p.vars.iter().map(|&v| model.ident(v).to_string()).collect(),
            denominators: vec![0.0; step_count],
            dominant: vec![vec![]; step_count],
        })
        .collect();

    for (pidx, record) in partition_records.iter_mut().enumerate() {
        let members: Vec<usize> = loops
            .iter()
            .enumerate()
            .filter(|(_, l)| l.partition == pidx)
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            continue;
        }

        let mut raws = vec![0.0; members.len()];
        let mut rels = vec![0.0; members.len()];
        for t in 0..step_count {
            for (j, &i) in members.iter().enumerate() {
                raws[j] = raw_scores[i][t];
            }
            record.denominators[t] = normalize_step(&raws, &mut rels);
            for (j, &i) in members.iter().enumerate() {
                relative_scores[i][t] = rels[j];
            }

            let weighted: Vec<(usize, f64)> = members
                .iter()
                .enumerate()
                .map(|(j, &i)| (i, rels[j]))
                .collect();
            record.dominant[t] = dominant_set(&weighted)
                .into_iter()
                .map(|i| loops[i].id.clone())
                .collect();
        }
    }

    let mut loop_records: Vec<LoopRecord> = Vec::with_capacity(loops.len());
    for ((l, raw), relative) in loops
        .into_iter()
        .zip(raw_scores)
        .zip(relative_scores)
    {
        let peak_relative = relative
            .iter()
            .map(|r| r.abs())
            .fold(0.0_f64, f64::max);
        loop_records.push(LoopRecord {
            path: l.vars.iter().map(|&v| model.ident(v).to_string()).collect(),
            stocks: l
                .stocks
                .iter()
                .map(|&v| model.ident(v).to_string())
                .collect(),
            structural_polarity: l.polarity,
            runtime_polarity: runtime_polarity(&raw),
            partition: l.partition,
            raw_scores: raw,
            relative_scores: relative,
            peak_relative,
            id: l.id,
        });
    }

    // the cutoff trims reporting only; the loops above already contributed
    // to every denominator and dominance set
    loop_records.retain(|l| l.peak_relative >= contribution_cutoff || l.raw_scores.is_empty());

    LtmResults {
        step_count,
        times,
        links,
        loops: loop_records,
        partitions: partition_records,
        failures,
        exhaustive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_step() {
        let mut rels = vec![0.0; 3];
        let denom = normalize_step(&[1.0, -0.5, 0.5], &mut rels);
        assert_eq!(2.0, denom);
        assert_eq!(vec![0.5, -0.25, 0.25], rels);

        // all zero: undefined, reported as 0
        let denom = normalize_step(&[0.0, 0.0], &mut rels[..2]);
        assert_eq!(0.0, denom);
        assert_eq!(vec![0.0, 0.0], rels[..2].to_vec());

        // NaN contributes nothing to the denominator and reads as 0
        let mut rels = vec![0.0; 2];
        let denom = normalize_step(&[f64::NAN, 2.0], &mut rels);
        assert_eq!(2.0, denom);
        assert_eq!(0.0, rels[0]);
        assert_eq!(1.0, rels[1]);
    }

    #[test]
    fn test_dominant_set_is_minimal() {
        // one strong loop suffices
        let d = dominant_set(&[(0, 0.6), (1, -0.25), (2, 0.15)]);
        assert_eq!(vec![0], d);

        // two mid-sized loops are needed; the third would be redundant
        let d = dominant_set(&[(0, 0.4), (1, -0.35), (2, 0.25)]);
        assert_eq!(vec![0, 1], d);

        // nothing scored: no dominant set
        let d = dominant_set(&[(0, 0.0), (1, 0.0)]);
        assert!(d.is_empty());
    }

    #[test]
    fn test_json_export() {
        let results = LtmResults {
            step_count: 1,
            times: vec![0.0],
            links: vec![],
            loops: vec![],
            partitions: vec![],
            failures: vec![crate::store::EvalFailure {
                ident: "gain".to_string(),
                step: 0,
            }],
            exhaustive: true,
        };
        let json = results.to_json().unwrap();
        assert!(json.contains("\"exhaustive\":true"));
        assert!(json.contains("\"gain\""));
    }

    #[test]
    fn test_runtime_polarity() {
        assert_eq!(
            LoopPolarity::Reinforcing,
            runtime_polarity(&[0.0, 0.5, 1.0, 0.0])
        );
        assert_eq!(
            LoopPolarity::Balancing,
            runtime_polarity(&[0.0, -0.5, -1.0])
        );
        assert_eq!(
            LoopPolarity::Undetermined,
            runtime_polarity(&[0.5, -0.5])
        );
        assert_eq!(LoopPolarity::Undetermined, runtime_polarity(&[0.0, 0.0]));
        // NaN steps don't pin a sign
        assert_eq!(
            LoopPolarity::Reinforcing,
            runtime_polarity(&[f64::NAN, 0.7])
        );
    }

    proptest! {
        /// Whenever any loop has a nonzero finite raw score, the absolute
        /// relative scores sum to 1.
        #[test]
        fn prop_normalization_sums_to_one(raws in proptest::collection::vec(-1e6_f64..1e6, 1..16)) {
            let mut rels = vec![0.0; raws.len()];
            let denom = normalize_step(&raws, &mut rels);
            if denom > 0.0 {
                let total: f64 = rels.iter().map(|r| r.abs()).sum();
                prop_assert!((total - 1.0).abs() < 1e-9);
            } else {
                prop_assert!(rels.iter().all(|&r| r == 0.0));
            }
        }

        /// Relative scores always stay within [-1, 1].
        #[test]
        fn prop_relative_scores_clamped(raws in proptest::collection::vec(proptest::num::f64::ANY, 1..16)) {
            let mut rels = vec![0.0; raws.len()];
            normalize_step(&raws, &mut rels);
            prop_assert!(rels.iter().all(|r| (-1.0..=1.0).contains(r)));
        }
    }
}
