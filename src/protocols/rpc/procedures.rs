//! Registered procedures.
//!
//! The table maps method names to [`Procedure`] variants. It is built once at
//! startup and only read afterwards.

use crate::error::HandlerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Positional argument record shared by the arithmetic procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operands {
    pub a: i64,
    pub b: i64,
    /// Negate `a` before combining.
    pub sign_a: bool,
    /// Negate `b` before combining.
    pub sign_b: bool,
}

impl Operands {
    pub fn new(a: i64, b: i64, sign_a: bool, sign_b: bool) -> Self {
        Operands {
            a,
            b,
            sign_a,
            sign_b,
        }
    }

    fn signed(&self) -> Result<(i64, i64), HandlerError> {
        Ok((apply_sign(self.a, self.sign_a)?, apply_sign(self.b, self.sign_b)?))
    }
}

fn apply_sign(value: i64, negate: bool) -> Result<i64, HandlerError> {
    if !negate {
        return Ok(value);
    }
    value
        .checked_neg()
        .ok_or_else(|| HandlerError::BadArgument(format!("cannot negate {value}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Procedure {
    Add,
    Subtract,
}

impl Procedure {
    /// Decode `params` and invoke.
    pub fn call(self, params: serde_json::Value) -> Result<i64, HandlerError> {
        let operands: Operands = serde_json::from_value(params)
            .map_err(|e| HandlerError::BadArgument(e.to_string()))?;
        self.apply(operands)
    }

    pub fn apply(self, operands: Operands) -> Result<i64, HandlerError> {
        let (a, b) = operands.signed()?;
        let result = match self {
            Procedure::Add => a.checked_add(b),
            Procedure::Subtract => a.checked_sub(b),
        };
        result.ok_or_else(|| HandlerError::BadArgument("result overflows i64".to_string()))
    }
}

/// Method name to procedure lookup.
#[derive(Debug, Clone, Default)]
pub struct ProcedureTable {
    entries: HashMap<&'static str, Procedure>,
}

impl ProcedureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with `Add` and `Subtract`.
    pub fn arithmetic() -> Self {
        Self::new()
            .with("Add", Procedure::Add)
            .with("Subtract", Procedure::Subtract)
    }

    pub fn with(mut self, name: &'static str, procedure: Procedure) -> Self {
        self.entries.insert(name, procedure);
        self
    }

    pub fn lookup(&self, method: &str) -> Result<Procedure, HandlerError> {
        self.entries
            .get(method)
            .copied()
            .ok_or_else(|| HandlerError::UnknownMethod(method.to_string()))
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
