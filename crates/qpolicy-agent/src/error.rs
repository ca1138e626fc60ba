//! Error types for policy evaluation.

use std::time::Duration;

use qpolicy_hal::HalError;
use qpolicy_ir::IrError;
use thiserror::Error;

/// Errors that can occur while evaluating a policy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PolicyError {
    /// The policy artifact is missing, malformed or inconsistent.
    #[error("Failed to load policy from {source_name}: {reason}")]
    Load {
        /// Where the artifact came from.
        source_name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Observation width does not match the encoding layer.
    #[error("Observation has {got} components, policy expects {expected}")]
    ShapeMismatch {
        /// Width of the encoding layer.
        expected: usize,
        /// Width of the observation received.
        got: usize,
    },

    /// Observation contains a non-finite component.
    #[error("Observation component {index} is not finite ({value})")]
    InvalidObservation {
        /// Index of the offending component.
        index: usize,
        /// The offending value.
        value: f64,
    },

    /// No usable calibration could be obtained from the backend.
    #[error(
        "Backend '{backend}' unavailable after {attempts} attempt(s){}: {reason}",
        format_age(.last_good_age)
    )]
    BackendUnavailable {
        /// Backend identifier.
        backend: String,
        /// Refresh attempts made.
        attempts: u32,
        /// Age of the last good snapshot, if one exists.
        last_good_age: Option<Duration>,
        /// Last failure seen.
        reason: String,
    },

    /// Circuit execution did not finish in time.
    #[error("Execution on '{backend}' timed out after {timeout:?}")]
    ExecutionTimeout {
        /// Backend identifier.
        backend: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// Execution attempted with an unset, expired or foreign snapshot.
    #[error("Stale calibration: {0}")]
    StaleCalibration(String),

    /// Shot count is not positive or exceeds the backend limit.
    #[error("Invalid shot count: {0}")]
    InvalidShotCount(String),

    /// Circuit cannot run on the backend.
    #[error("Circuit rejected by backend: {}", .0.join("; "))]
    IncompatibleCircuit(Vec<String>),

    /// Backend returned a result that breaks its contract.
    #[error("Malformed result: {0}")]
    MalformedResult(String),

    /// Invalid evaluation configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Environment failure.
    #[error("Environment error: {0}")]
    Environment(String),

    /// Circuit construction error.
    #[error("Circuit error: {0}")]
    Circuit(#[from] IrError),

    /// Other backend error.
    #[error(transparent)]
    Hal(HalError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

fn format_age(age: &Option<Duration>) -> String {
    match age {
        Some(age) => format!(" (last good snapshot is {}s old)", age.as_secs()),
        None => " (no snapshot ever obtained)".into(),
    }
}

impl PolicyError {
    /// Whether retrying the same operation could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PolicyError::BackendUnavailable { .. } | PolicyError::ExecutionTimeout { .. } => true,
            PolicyError::Hal(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PolicyError::Load { .. } => "load",
            PolicyError::ShapeMismatch { .. } => "shape_mismatch",
            PolicyError::InvalidObservation { .. } => "invalid_observation",
            PolicyError::BackendUnavailable { .. } => "backend_unavailable",
            PolicyError::ExecutionTimeout { .. } => "execution_timeout",
            PolicyError::StaleCalibration(_) => "stale_calibration",
            PolicyError::InvalidShotCount(_) => "invalid_shot_count",
            PolicyError::IncompatibleCircuit(_) => "incompatible_circuit",
            PolicyError::MalformedResult(_) => "malformed_result",
            PolicyError::Config(_) => "config",
            PolicyError::Environment(_) => "environment",
            PolicyError::Circuit(_) => "circuit",
            PolicyError::Hal(_) => "backend",
            PolicyError::Io(_) => "io",
            PolicyError::Json(_) | PolicyError::Yaml(_) => "serialization",
        }
    }

    pub(crate) fn load(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        PolicyError::Load {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

impl From<HalError> for PolicyError {
    fn from(e: HalError) -> Self {
        match e {
            HalError::StaleCalibration(msg) => PolicyError::StaleCalibration(msg),
            HalError::InvalidShots(msg) => PolicyError::InvalidShotCount(msg),
            HalError::CircuitTooLarge(msg) => PolicyError::IncompatibleCircuit(vec![msg]),
            HalError::Configuration(msg) => PolicyError::Config(msg),
            other => PolicyError::Hal(other),
        }
    }
}

/// Result type for policy evaluation.
pub type PolicyResult<T> = Result<T, PolicyError>;
