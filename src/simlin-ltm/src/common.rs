// Copyright 2025 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;
use std::{error, result};

use lazy_static::lazy_static;
use regex::Regex;

pub type Ident = String;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError, // will never be produced
    DoesNotExist,
    DuplicateVariable,
    UnknownDependency,
    MissingFlow,
    NotAFlow,
    StocklessCycle,
    CircularDependency,
    BadSimSpecs,
    NotSimulatable,
    Generic,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ErrorCode::*;
        let name = match self {
            NoError => "no_error",
            DoesNotExist => "does_not_exist",
            DuplicateVariable => "duplicate_variable",
            UnknownDependency => "unknown_dependency",
            MissingFlow => "missing_flow",
            NotAFlow => "not_a_flow",
            StocklessCycle => "stockless_cycle",
            CircularDependency => "circular_dependency",
            BadSimSpecs => "bad_sim_specs",
            NotSimulatable => "not_simulatable",
            Generic => "generic",
        };

        write!(f, "{name}")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Model,
    Simulation,
    Analysis,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub(crate) details: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, code: ErrorCode, details: Option<String>) -> Self {
        Error {
            kind,
            code,
            details,
        }
    }

    pub fn get_details(&self) -> Option<String> {
        self.details.clone()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Model => "ModelError",
            ErrorKind::Simulation => "SimulationError",
            ErrorKind::Analysis => "AnalysisError",
        };
        match self.details {
            Some(ref details) => write!(f, "{}{{{}: {}}}", kind, self.code, details),
            None => write!(f, "{}{{{}}}", kind, self.code),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

#[macro_export]
macro_rules! model_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error{
            kind: ErrorKind::Model,
            code: ErrorCode::$code,
            details: Some($str),
        })
    }}
);

#[macro_export]
macro_rules! sim_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error {
            kind: ErrorKind::Simulation,
            code: ErrorCode::$code,
            details: Some($str),
        })
    }};
    ($code:tt) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error {
            kind: ErrorKind::Simulation,
            code: ErrorCode::$code,
            details: None,
        })
    }};
}

#[macro_export]
macro_rules! analysis_err(
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error{
            kind: ErrorKind::Analysis,
            code: ErrorCode::$code,
            details: Some($str),
        })
    }}
);

/// Normalize a variable name to its canonical form: trimmed, lowercased,
/// with runs of whitespace collapsed to a single underscore.
pub fn canonicalize(name: &str) -> Ident {
    let name = name.trim();

    lazy_static! {
        static ref UNDERSCORE_RE: Regex = Regex::new(r"(\\n|\\r|\n|\r| |\x{00A0})+").unwrap();
    }

    let name = UNDERSCORE_RE.replace_all(name, "_");
    name.to_lowercase()
}
