//! Error types for the HAL crate.

use thiserror::Error;

/// Errors that can occur in HAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HalError {
    /// Backend is not available.
    #[error("Backend not available: {0}")]
    BackendUnavailable(String),

    /// Operation did not complete in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Execution attempted with an expired or foreign calibration snapshot.
    #[error("Stale calibration: {0}")]
    StaleCalibration(String),

    /// Invalid number of shots.
    #[error("Invalid shots: {0}")]
    InvalidShots(String),

    /// Circuit exceeds backend capabilities.
    #[error("Circuit exceeds backend capabilities: {0}")]
    CircuitTooLarge(String),

    /// Circuit still carries a free parameter symbol.
    #[error("Circuit has unbound parameter '{0}'")]
    UnboundParameter(String),

    /// Calibration data is malformed or inconsistent.
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error while reading a device description.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unsupported feature.
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// Generic backend error.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl HalError {
    /// Whether the error is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HalError::BackendUnavailable(_) | HalError::Timeout(_) | HalError::Io(_)
        )
    }
}

/// Result type for HAL operations.
pub type HalResult<T> = Result<T, HalError>;
