// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::collections::HashMap;

use float_cmp::approx_eq;

use crate::common::{Ident, Result};

#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum Method {
    Euler,
    RungeKutta2,
    RungeKutta4,
}

#[derive(Debug, Clone)]
pub struct Specs {
    pub start: f64,
    pub stop: f64,
    pub dt: f64,
    pub method: Method,
}

impl Specs {
    pub fn new(start: f64, stop: f64, dt: f64, method: Method) -> Result<Specs> {
        if stop < start {
            return crate::sim_err!(BadSimSpecs, "end time has to be after start time".to_string());
        }
        if dt <= 0.0 || approx_eq!(f64, dt, 0.0) {
            return crate::sim_err!(BadSimSpecs, "dt must be greater than 0".to_string());
        }
        let method = match method {
            Method::Euler => Method::Euler,
            Method::RungeKutta2 => {
                eprintln!("warning, simulation requested 'rk2', but only support Euler");
                Method::Euler
            }
            Method::RungeKutta4 => {
                eprintln!("warning, simulation requested 'rk4', but only support Euler");
                Method::Euler
            }
        };
        Ok(Specs {
            start,
            stop,
            dt,
            method,
        })
    }

    /// Number of saved steps, including the initial one.
    pub fn n_steps(&self) -> usize {
        ((self.stop - self.start) / self.dt + 0.5).floor() as usize + 1
    }
}

#[derive(Debug)]
pub struct Results {
    pub offsets: HashMap<Ident, usize>,
    // one large allocation
    pub data: Box<[f64]>,
    pub step_size: usize,
    pub step_count: usize,
    pub specs: Specs,
}

impl Results {
    pub fn iter(&self) -> std::iter::Take<std::slice::Chunks<'_, f64>> {
        self.data.chunks(self.step_size).take(self.step_count)
    }

    /// The value of a variable at a saved step.
    pub fn get(&self, step: usize, ident: &str) -> Option<f64> {
        if step >= self.step_count {
            return None;
        }
        let off = *self.offsets.get(&crate::common::canonicalize(ident))?;
        Some(self.data[step * self.step_size + off])
    }
}
