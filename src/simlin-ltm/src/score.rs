// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Link scores: one signed, dimensionless scalar per causal edge per step.
//!
//! Instantaneous edges score the partial change of the target against its
//! total change.  Flow-to-stock edges score the change in the flow's
//! per-step contribution against the second-order change of the stock, so a
//! stock's only flow always scores exactly +/-1 regardless of gain.

use crate::model::{Link, LinkId, LinkKind, Model};
use crate::store::ValueStore;

/// Write the signed score of every link at `step` into `out`.
///
/// Undefined scores (no change on either end, a zero denominator, or the
/// first steps before enough history exists) are 0.  Scores downstream of a
/// failed evaluation are NaN.
pub(crate) fn score_step(
    model: &Model,
    store: &ValueStore,
    step: usize,
    dt: f64,
    out: &mut [f64],
) {
    debug_assert_eq!(out.len(), model.n_links());
    for (id, link) in model.links() {
        out[id.index()] = match link.kind {
            LinkKind::Instantaneous => instantaneous(store, id, link, step),
            LinkKind::Inflow | LinkKind::Outflow => flow_to_stock(store, link, step, dt),
        };
    }
}

fn instantaneous(store: &ValueStore, id: LinkId, link: &Link, step: usize) -> f64 {
    if step < 1 {
        return 0.0;
    }
    let partial = store.partial(id);
    let d_to = store.delta(link.to);
    let d_from = store.delta(link.from);
    if partial.is_nan() || d_to.is_nan() || d_from.is_nan() {
        return f64::NAN;
    }
    if partial == 0.0 || d_to == 0.0 || d_from == 0.0 {
        return 0.0;
    }

    let magnitude = (partial / d_to).abs();
    let runtime_sign = partial / d_from;
    if runtime_sign > 0.0 {
        magnitude
    } else if runtime_sign < 0.0 {
        -magnitude
    } else {
        0.0
    }
}

fn flow_to_stock(store: &ValueStore, link: &Link, step: usize, dt: f64) -> f64 {
    // needs two previous stock changes worth of history
    if step < 2 {
        return 0.0;
    }
    let (change_curr, change_prev) = store.stock_change(link.to);
    let numerator = dt * store.delta(link.from);
    let denominator = change_curr - change_prev;
    if numerator.is_nan() || denominator.is_nan() {
        return f64::NAN;
    }
    if numerator == 0.0 || denominator == 0.0 {
        return 0.0;
    }

    let magnitude = (numerator / denominator).abs();
    if !magnitude.is_finite() {
        return f64::NAN;
    }
    match link.kind {
        LinkKind::Outflow => -magnitude,
        _ => magnitude,
    }
}
