//! Gates of the policy circuit.
//!
//! The set is what the `ry-rz-cx` ansatz needs plus the Paulis the noise
//! model injects and `H` for reference states.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::parameter::ParameterExpression;

/// A gate with known semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gate {
    /// Pauli-X.
    X,
    /// Pauli-Y.
    Y,
    /// Pauli-Z.
    Z,
    /// Hadamard.
    H,
    /// Rotation about Y.
    Ry(ParameterExpression),
    /// Rotation about Z.
    Rz(ParameterExpression),
    /// Controlled-X, control first.
    CX,
}

impl Gate {
    /// Lower-case mnemonic.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Gate::X => "x",
            Gate::Y => "y",
            Gate::Z => "z",
            Gate::H => "h",
            Gate::Ry(_) => "ry",
            Gate::Rz(_) => "rz",
            Gate::CX => "cx",
        }
    }

    /// Number of qubits the gate acts on.
    #[inline]
    pub fn num_qubits(&self) -> u32 {
        match self {
            Gate::CX => 2,
            _ => 1,
        }
    }

    /// Rotation angle, for rotations.
    pub fn angle(&self) -> Option<&ParameterExpression> {
        match self {
            Gate::Ry(p) | Gate::Rz(p) => Some(p),
            _ => None,
        }
    }

    /// Whether the angle still has free symbols.
    pub fn is_parameterized(&self) -> bool {
        self.angle().is_some_and(ParameterExpression::is_symbolic)
    }

    /// Copy with every symbol in `values` substituted.
    pub fn bind_all(&self, values: &FxHashMap<String, f64>) -> Self {
        match self {
            Gate::Ry(p) => Gate::Ry(p.bind_all(values)),
            Gate::Rz(p) => Gate::Rz(p.bind_all(values)),
            fixed => fixed.clone(),
        }
    }
}
