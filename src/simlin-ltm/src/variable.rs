// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The compiled-model contract: variables, opaque equations, and the
//! structural polarity tags on their dependencies.

use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::common::Ident;

/// Structural polarity of a causal link, read off the equation's monotone
/// form by the host's compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LinkPolarity {
    Positive, // increase in 'from' causes increase in 'to'
    Negative, // increase in 'from' causes decrease in 'to'
    Unknown,  // mixed sign, or under a non-monotone function
}

/// A declared input of an equation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub ident: Ident,
    pub polarity: LinkPolarity,
}

impl Dependency {
    pub fn new(ident: &str, polarity: LinkPolarity) -> Self {
        Dependency {
            ident: crate::common::canonicalize(ident),
            polarity,
        }
    }
}

type EquationFn = Rc<dyn Fn(&[f64]) -> f64>;

/// A compiled scalar equation: a pure function of its declared inputs.
///
/// The function receives input values in declaration order and must not
/// observe anything else.  Arrayed variables arrive from the host already
/// expanded into scalar cells, one `Equation` per cell.
#[derive(Clone)]
pub struct Equation {
    inputs: Vec<Dependency>,
    func: EquationFn,
}

impl Equation {
    pub fn new<F>(inputs: Vec<Dependency>, func: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + 'static,
    {
        Equation {
            inputs,
            func: Rc::new(func),
        }
    }

    /// An equation with no inputs that always evaluates to `value`.
    pub fn constant(value: f64) -> Self {
        Equation {
            inputs: vec![],
            func: Rc::new(move |_| value),
        }
    }

    pub fn inputs(&self) -> &[Dependency] {
        &self.inputs
    }

    #[inline]
    pub fn eval(&self, args: &[f64]) -> f64 {
        debug_assert_eq!(args.len(), self.inputs.len());
        (self.func)(args)
    }
}

impl fmt::Debug for Equation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Equation")
            .field("inputs", &self.inputs)
            .field("func", &"<compiled>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Variable {
    Stock {
        ident: Ident,
        /// Evaluated once, at the start of the run.
        init: Equation,
        inflows: Vec<Ident>,
        outflows: Vec<Ident>,
        non_negative: bool,
    },
    Flow {
        ident: Ident,
        equation: Equation,
    },
    Aux {
        ident: Ident,
        equation: Equation,
    },
}

impl Variable {
    pub fn ident(&self) -> &str {
        match self {
            Variable::Stock { ident, .. }
            | Variable::Flow { ident, .. }
            | Variable::Aux { ident, .. } => ident.as_str(),
        }
    }

    /// The per-step equation; `None` for stocks, which are integrated, not
    /// evaluated.
    pub fn equation(&self) -> Option<&Equation> {
        match self {
            Variable::Stock { .. } => None,
            Variable::Flow { equation, .. } | Variable::Aux { equation, .. } => Some(equation),
        }
    }

    pub fn is_stock(&self) -> bool {
        matches!(self, Variable::Stock { .. })
    }

    pub fn is_flow(&self) -> bool {
        matches!(self, Variable::Flow { .. })
    }
}
