// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Loop dominance analysis for system dynamics models.
//!
//! Given a compiled model (stocks, flows, auxiliaries with opaque scalar
//! equations and polarity-tagged dependencies) and a stepwise integrator,
//! the engine attributes the change of every stock at every step to the
//! feedback loops that cause it: signed link scores per causal edge, loop
//! scores as their products around each cycle, relative scores normalized
//! within cycle partitions, and minimal dominant loop sets.

#![forbid(unsafe_code)]

pub mod common;
mod variable;

mod analysis;
mod discovery;
mod engine;
mod graph;
mod loops;
mod model;
mod results;
mod score;
mod store;
mod vm;

#[cfg(any(test, feature = "testing"))]
pub mod testutils;

pub use self::analysis::{LinkRecord, LoopRecord, LtmResults, PartitionRecord};
pub use self::common::{Error, ErrorCode, ErrorKind, Ident, Result, canonicalize};
pub use self::engine::{DiscoveryMode, LtmEngine, Options};
pub use self::graph::{Partition, Partitions};
pub use self::loops::{Loop, LoopPolarity};
pub use self::model::{Link, LinkId, LinkKind, Model, TIME_IDENT, VarId};
pub use self::results::{Method, Results, Specs};
pub use self::store::EvalFailure;
pub use self::variable::{Dependency, Equation, LinkPolarity, Variable};
pub use self::vm::Vm;
