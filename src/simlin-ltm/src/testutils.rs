// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Builders for hand-assembled test models.

use std::rc::Rc;

use crate::model::Model;
use crate::variable::{Dependency, Equation, LinkPolarity, Variable};

pub fn x_aux<F>(ident: &str, inputs: &[(&str, LinkPolarity)], eqn: F) -> Variable
where
    F: Fn(&[f64]) -> f64 + 'static,
{
    Variable::Aux {
        ident: ident.to_string(),
        equation: equation(inputs, eqn),
    }
}

pub fn x_const(ident: &str, value: f64) -> Variable {
    Variable::Aux {
        ident: ident.to_string(),
        equation: Equation::constant(value),
    }
}

pub fn x_flow<F>(ident: &str, inputs: &[(&str, LinkPolarity)], eqn: F) -> Variable
where
    F: Fn(&[f64]) -> f64 + 'static,
{
    Variable::Flow {
        ident: ident.to_string(),
        equation: equation(inputs, eqn),
    }
}

pub fn x_stock(ident: &str, init: f64, inflows: &[&str], outflows: &[&str]) -> Variable {
    Variable::Stock {
        ident: ident.to_string(),
        init: Equation::constant(init),
        inflows: inflows.iter().map(|s| s.to_string()).collect(),
        outflows: outflows.iter().map(|s| s.to_string()).collect(),
        non_negative: false,
    }
}

pub fn x_model(variables: Vec<Variable>) -> Rc<Model> {
    let model = Model::new(variables);
    assert!(model.is_ok(), "test model failed to freeze: {model:?}");
    Rc::new(model.unwrap())
}

fn equation<F>(inputs: &[(&str, LinkPolarity)], eqn: F) -> Equation
where
    F: Fn(&[f64]) -> f64 + 'static,
{
    let inputs = inputs
        .iter()
        .map(|(ident, polarity)| Dependency::new(ident, *polarity))
        .collect();
    Equation::new(inputs, eqn)
}
