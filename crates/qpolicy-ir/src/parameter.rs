//! Parameter expressions for parameterized circuits.
//!
//! Policy circuits are built once as symbolic templates (`x[i]` for encoded
//! observation angles, `theta[k]` for trained weights) and bound to concrete
//! values per step.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A rotation angle: either bound to a value or still a free symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterExpression {
    /// A constant numeric value.
    Constant(f64),
    /// A symbolic parameter.
    Symbol(String),
}

impl ParameterExpression {
    /// Create a constant parameter.
    pub fn constant(value: f64) -> Self {
        ParameterExpression::Constant(value)
    }

    /// Create a symbolic parameter.
    pub fn symbol(name: impl Into<String>) -> Self {
        ParameterExpression::Symbol(name.into())
    }

    /// Create an indexed symbol such as `theta[3]`.
    pub fn indexed(vector: &str, index: usize) -> Self {
        ParameterExpression::Symbol(indexed_name(vector, index))
    }

    /// Check if this expression is still a symbol.
    pub fn is_symbolic(&self) -> bool {
        matches!(self, ParameterExpression::Symbol(_))
    }

    /// The value, once bound.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterExpression::Constant(v) => Some(*v),
            ParameterExpression::Symbol(_) => None,
        }
    }

    /// Symbol names in this expression, sorted.
    pub fn symbols(&self) -> BTreeSet<String> {
        match self {
            ParameterExpression::Constant(_) => BTreeSet::new(),
            ParameterExpression::Symbol(name) => BTreeSet::from([name.clone()]),
        }
    }

    /// Bind the symbol if `values` has it.
    pub fn bind_all(&self, values: &FxHashMap<String, f64>) -> Self {
        match self {
            ParameterExpression::Symbol(n) => match values.get(n) {
                Some(v) => ParameterExpression::Constant(*v),
                None => self.clone(),
            },
            ParameterExpression::Constant(_) => self.clone(),
        }
    }
}

/// Name of the `index`-th element of a symbolic parameter vector.
pub fn indexed_name(vector: &str, index: usize) -> String {
    format!("{vector}[{index}]")
}

impl fmt::Display for ParameterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterExpression::Constant(v) => write!(f, "{v}"),
            ParameterExpression::Symbol(name) => write!(f, "{name}"),
        }
    }
}

impl From<f64> for ParameterExpression {
    fn from(value: f64) -> Self {
        ParameterExpression::Constant(value)
    }
}
