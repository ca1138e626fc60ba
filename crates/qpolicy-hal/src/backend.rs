//! Backend trait and configuration.
//!
//! The policy pipeline depends on exactly two backend operations:
//!
//! ```text
//!   refresh() ──→ CalibrationSnapshot ──→ run(circuit, snapshot, shots) ──→ ExecutionResult
//!   (async, I/O)                          (async, may queue)
//! ```
//!
//! Any simulated or hardware-backed implementation of [`Backend`] is
//! interchangeable.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use qpolicy_ir::Circuit;

use crate::calibration::CalibrationSnapshot;
use crate::capability::Capabilities;
use crate::error::HalResult;
use crate::result::ExecutionResult;

/// Configuration for a backend instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Name of the backend.
    pub name: String,
    /// Device description file read on every refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_file: Option<PathBuf>,
    /// Seed for backends that sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Additional configuration.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BackendConfig {
    /// Create a new backend configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the device description file.
    #[must_use]
    pub fn with_device_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_file = Some(path.into());
        self
    }

    /// Set the sampling seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Add extra configuration.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Trait for calibration-aware quantum backends.
///
/// # Contract
///
/// - `capabilities()` is synchronous and infallible; capabilities are
///   cached at construction time.
/// - `refresh()` is the only operation that reads the device description.
///   Every call returns a new snapshot with a fresh id.
/// - `run()` executes a fully bound circuit under the given snapshot and
///   attributes the result to that snapshot's id. It never mutates the
///   snapshot.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Get the name of this backend.
    fn name(&self) -> &str;

    /// Get the capabilities of this backend.
    fn capabilities(&self) -> &Capabilities;

    /// Pull the latest calibration of the device.
    async fn refresh(&self) -> HalResult<CalibrationSnapshot>;

    /// Execute `circuit` for `shots` shots under `snapshot`.
    async fn run(
        &self,
        circuit: &Circuit,
        snapshot: &CalibrationSnapshot,
        shots: u32,
    ) -> HalResult<ExecutionResult>;

    /// Check a circuit against this backend's capabilities.
    ///
    /// Checks qubit count, gate support, connectivity of two-qubit gates,
    /// and that no parameter symbol is left unbound.
    fn validate(&self, circuit: &Circuit) -> ValidationResult {
        let caps = self.capabilities();
        let mut reasons = vec![];

        if circuit.num_qubits() > caps.num_qubits as usize {
            reasons.push(format!(
                "circuit has {} qubits but '{}' supports {}",
                circuit.num_qubits(),
                caps.name,
                caps.num_qubits
            ));
        }

        for inst in circuit.instructions() {
            let Some(gate) = inst.as_gate() else {
                continue;
            };
            if !caps.gate_set.contains(gate.name()) {
                reasons.push(format!("gate '{}' is not supported", gate.name()));
            }
            if let [a, b] = inst.qubits.as_slice() {
                if !caps.topology.is_connected(a.0, b.0) {
                    reasons.push(format!("qubits {a} and {b} are not coupled"));
                }
            }
            if gate.is_parameterized() {
                reasons.push(format!("gate '{}' has an unbound parameter", gate.name()));
            }
        }

        if reasons.is_empty() {
            ValidationResult::Valid
        } else {
            reasons.dedup();
            ValidationResult::Invalid { reasons }
        }
    }
}

/// Result of circuit validation against backend constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Circuit can be run as-is.
    Valid,
    /// Circuit cannot run on this backend.
    Invalid {
        /// Reasons the circuit is invalid.
        reasons: Vec<String>,
    },
}

impl ValidationResult {
    /// Check if the circuit is valid.
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

/// Trait for creating backends from configuration.
pub trait BackendFactory: Backend + Sized {
    /// Create a backend from configuration.
    fn from_config(config: BackendConfig) -> HalResult<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::SnapshotId;
    use crate::result::Counts;
    use qpolicy_ir::{ParameterExpression, QubitId};
    use std::time::Duration;

    struct FixedBackend {
        caps: Capabilities,
    }

    #[async_trait]
    impl Backend for FixedBackend {
        fn name(&self) -> &str {
            &self.caps.name
        }

        fn capabilities(&self) -> &Capabilities {
            &self.caps
        }

        async fn refresh(&self) -> HalResult<CalibrationSnapshot> {
            Ok(CalibrationSnapshot::ideal(
                self.name(),
                self.caps.num_qubits,
                Duration::from_secs(60),
            ))
        }

        async fn run(
            &self,
            _circuit: &Circuit,
            snapshot: &CalibrationSnapshot,
            shots: u32,
        ) -> HalResult<ExecutionResult> {
            let counts: Counts = [("00", u64::from(shots))].into_iter().collect();
            Ok(ExecutionResult::new(counts, shots, snapshot.id))
        }
    }

    fn backend() -> FixedBackend {
        FixedBackend {
            caps: Capabilities::simulator(2).with_topology(crate::Topology::linear(2)),
        }
    }

    #[test]
    fn test_backend_config() {
        let config = BackendConfig::new("sim")
            .with_seed(7)
            .with_device_file("device.json")
            .with_extra("drift", serde_json::json!(0.01));

        assert_eq!(config.name, "sim");
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.device_file, Some(PathBuf::from("device.json")));
        assert!(config.extra.contains_key("drift"));
    }

    #[test]
    fn test_validate_accepts_bound_circuit() {
        let circuit = Circuit::bell().unwrap();
        assert!(backend().validate(&circuit).is_valid());
    }

    #[test]
    fn test_validate_rejects_oversized_and_unbound() {
        let mut circuit = Circuit::with_size("c", 3, 0);
        circuit
            .ry(ParameterExpression::symbol("theta"), QubitId(0))
            .unwrap();

        match backend().validate(&circuit) {
            ValidationResult::Invalid { reasons } => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons[0].contains("3 qubits"));
                assert!(reasons[1].contains("unbound"));
            }
            ValidationResult::Valid => panic!("expected invalid"),
        }
    }

    #[tokio::test]
    async fn test_refresh_and_run() {
        let backend = backend();
        let snapshot = backend.refresh().await.unwrap();
        let result = backend
            .run(&Circuit::bell().unwrap(), &snapshot, 10)
            .await
            .unwrap();
        assert_eq!(result.snapshot_id, snapshot.id);
        assert!(result.is_consistent());
        assert_ne!(result.snapshot_id, SnapshotId::new());
    }
}
