//! Policy circuit construction.
//!
//! The policy circuit has three parts:
//!
//! 1. Encoding: `Ry(2·atan(x[i]))` on qubit `i`, mapping any real onto
//!    `(-π, π)` with `0 ↦ 0`.
//! 2. Ansatz: `circuit_depth` layers of `Ry(θ)` then `Rz(θ)` on every qubit,
//!    each followed by CX gates in the declared entanglement pattern.
//!    Parameter `2·(layer·n + q)` drives the `Ry` of qubit `q`, the next one
//!    its `Rz`.
//! 3. Measurement of qubit `i` into classical bit `i`.
//!
//! The circuit is built once as a symbolic template over `x[i]` and
//! `theta[k]`, then bound per observation.

use rustc_hash::FxHashMap;

use qpolicy_ir::{Circuit, ParameterExpression, QubitId, indexed_name};

use crate::error::{PolicyError, PolicyResult};
use crate::params::{Hyperparameters, ParameterStore};

/// Symbol vector for encoded observation angles.
pub const INPUT_SYMBOL: &str = "x";
/// Symbol vector for trainable parameters.
pub const WEIGHT_SYMBOL: &str = "theta";

/// A fully bound circuit for one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitSpec {
    /// The circuit, free of symbols.
    pub circuit: Circuit,
    /// Content fingerprint of `circuit`.
    pub fingerprint: String,
}

/// Angle encoding of one observation component.
pub fn encode_angle(x: f64) -> f64 {
    2.0 * x.atan()
}

/// Builds policy circuits from a cached symbolic template.
#[derive(Debug, Clone)]
pub struct CircuitBuilder {
    template: Circuit,
    hyperparameters: Hyperparameters,
}

impl CircuitBuilder {
    /// Build the template for `hyperparameters`.
    pub fn new(hyperparameters: &Hyperparameters) -> PolicyResult<Self> {
        Ok(Self {
            template: policy_template(hyperparameters)?,
            hyperparameters: hyperparameters.clone(),
        })
    }

    /// The symbolic template.
    pub fn template(&self) -> &Circuit {
        &self.template
    }

    /// Width of the observation the encoding layer expects.
    pub fn input_width(&self) -> usize {
        self.hyperparameters.qubit_count as usize
    }

    /// Bind `observation` and the store's parameters into a runnable circuit.
    pub fn build(&self, observation: &[f64], store: &ParameterStore) -> PolicyResult<CircuitSpec> {
        self.bind(observation, store.parameters())
    }

    /// Bind `observation` and `parameters` into a runnable circuit.
    pub fn bind(&self, observation: &[f64], parameters: &[f64]) -> PolicyResult<CircuitSpec> {
        check_observation(observation, self.input_width())?;

        let expected = self.hyperparameters.parameter_count();
        if parameters.len() != expected {
            return Err(PolicyError::ShapeMismatch {
                expected,
                got: parameters.len(),
            });
        }

        let mut values = FxHashMap::default();
        values.reserve(observation.len() + parameters.len());
        for (i, &x) in observation.iter().enumerate() {
            values.insert(indexed_name(INPUT_SYMBOL, i), encode_angle(x));
        }
        for (k, &theta) in parameters.iter().enumerate() {
            values.insert(indexed_name(WEIGHT_SYMBOL, k), theta);
        }

        let circuit = self.template.bind_parameters(&values)?;
        debug_assert!(!circuit.is_parameterized());
        let fingerprint = circuit.fingerprint();
        Ok(CircuitSpec {
            circuit,
            fingerprint,
        })
    }
}

/// Build the circuit for one observation without caching the template.
pub fn build(
    observation: &[f64],
    parameters: &[f64],
    hyperparameters: &Hyperparameters,
) -> PolicyResult<CircuitSpec> {
    CircuitBuilder::new(hyperparameters)?.bind(observation, parameters)
}

fn check_observation(observation: &[f64], width: usize) -> PolicyResult<()> {
    if observation.len() != width {
        return Err(PolicyError::ShapeMismatch {
            expected: width,
            got: observation.len(),
        });
    }
    if let Some((index, &value)) = observation.iter().enumerate().find(|(_, x)| !x.is_finite()) {
        return Err(PolicyError::InvalidObservation { index, value });
    }
    Ok(())
}

fn policy_template(h: &Hyperparameters) -> PolicyResult<Circuit> {
    let n = h.qubit_count;
    let mut circuit = Circuit::with_size("policy", n, n);

    for q in 0..n {
        circuit.ry(
            ParameterExpression::indexed(INPUT_SYMBOL, q as usize),
            QubitId(q),
        )?;
    }

    let pairs = h.entanglement_pattern.pairs(n);
    for layer in 0..h.circuit_depth {
        for q in 0..n {
            let k = 2 * (layer * n + q) as usize;
            circuit
                .ry(ParameterExpression::indexed(WEIGHT_SYMBOL, k), QubitId(q))?
                .rz(ParameterExpression::indexed(WEIGHT_SYMBOL, k + 1), QubitId(q))?;
        }
        for &(control, target) in &pairs {
            circuit.cx(QubitId(control), QubitId(target))?;
        }
    }

    circuit.measure_all()?;
    Ok(circuit)
}
