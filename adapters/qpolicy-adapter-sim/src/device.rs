//! Device descriptions.
//!
//! A device description is the simulator's stand-in for a vendor
//! calibration endpoint. It is either a JSON file, re-read on every
//! refresh, or a built-in preset that drifts a little on every refresh.
//!
//! ```json
//! {
//!   "name": "lab-3q",
//!   "num_qubits": 3,
//!   "valid_for_secs": 600,
//!   "qubits": [
//!     { "t1": 90.0, "t2": 70.0, "gate_error": 0.001, "readout_p01": 0.01, "readout_p10": 0.02 }
//!   ],
//!   "edges": [ { "qubits": [0, 1], "gate_error": 0.01 } ],
//!   "default_two_qubit_error": 0.02
//! }
//! ```
//!
//! Qubits missing from `qubits` are filled with the last listed entry.

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use qpolicy_hal::{
    CalibrationSnapshot, EdgeCalibration, HalError, HalResult, QubitCalibration, Topology,
};

fn default_valid_for_secs() -> u64 {
    600
}

/// Calibration description of a simulated device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescription {
    /// Device name, informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Number of qubits.
    pub num_qubits: u32,
    /// Seconds a snapshot taken from this description stays valid.
    #[serde(default = "default_valid_for_secs")]
    pub valid_for_secs: u64,
    /// Per-qubit calibration.
    #[serde(default)]
    pub qubits: Vec<QubitCalibration>,
    /// Coupled pairs and their two-qubit gate error.
    #[serde(default)]
    pub edges: Vec<EdgeCalibration>,
    /// Two-qubit gate error for pairs without an edge entry.
    #[serde(default)]
    pub default_two_qubit_error: f64,
}

impl DeviceDescription {
    /// A noiseless, fully connected device.
    pub fn ideal(num_qubits: u32) -> Self {
        Self {
            name: Some("ideal".into()),
            num_qubits,
            valid_for_secs: default_valid_for_secs(),
            qubits: vec![QubitCalibration::ideal(); num_qubits as usize],
            edges: vec![],
            default_two_qubit_error: 0.0,
        }
    }

    /// A five-qubit ring with superconducting-scale noise.
    pub fn fake_5q() -> Self {
        let qubits = [
            (110.0, 85.0, 0.0004, 0.012, 0.025),
            (95.0, 70.0, 0.0006, 0.015, 0.030),
            (120.0, 100.0, 0.0003, 0.010, 0.020),
            (80.0, 60.0, 0.0008, 0.020, 0.035),
            (105.0, 90.0, 0.0005, 0.013, 0.028),
        ]
        .into_iter()
        .map(|(t1, t2, gate_error, readout_p01, readout_p10)| QubitCalibration {
            t1,
            t2,
            gate_error,
            readout_p01,
            readout_p10,
        })
        .collect();

        let edges = [0.009, 0.012, 0.008, 0.015, 0.011]
            .into_iter()
            .enumerate()
            .map(|(i, gate_error)| EdgeCalibration {
                qubits: (i as u32, ((i + 1) % 5) as u32),
                gate_error,
            })
            .collect();

        Self {
            name: Some("fake-5q".into()),
            num_qubits: 5,
            valid_for_secs: 300,
            qubits,
            edges,
            default_two_qubit_error: 0.03,
        }
    }

    /// Load a description from a JSON file.
    ///
    /// An unreadable file means the device cannot be reached; a malformed one
    /// is a calibration error.
    pub fn from_file(path: &Path) -> HalResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HalError::BackendUnavailable(format!(
                "device description '{}' is unreadable: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&text)
    }

    /// Parse a description from JSON text.
    pub fn from_json(text: &str) -> HalResult<Self> {
        let mut desc: Self = serde_json::from_str(text)
            .map_err(|e| HalError::Calibration(format!("malformed device description: {e}")))?;
        desc.fill_missing_qubits()?;
        Ok(desc)
    }

    fn fill_missing_qubits(&mut self) -> HalResult<()> {
        if self.num_qubits == 0 {
            return Err(HalError::Calibration(
                "device description declares zero qubits".into(),
            ));
        }
        let n = self.num_qubits as usize;
        if self.qubits.len() > n {
            return Err(HalError::Calibration(format!(
                "device declares {n} qubits but calibrates {}",
                self.qubits.len()
            )));
        }
        let filler = self.qubits.last().cloned().unwrap_or_default();
        self.qubits.resize(n, filler);
        Ok(())
    }

    /// Connectivity implied by the edge list. No edges means all-to-all.
    pub fn topology(&self) -> Topology {
        if self.edges.is_empty() {
            Topology::full(self.num_qubits)
        } else {
            Topology::custom(self.edges.iter().map(|e| e.qubits).collect())
        }
    }

    /// Whether every error rate is zero.
    pub fn is_noiseless(&self) -> bool {
        self.default_two_qubit_error == 0.0
            && self.edges.iter().all(|e| e.gate_error == 0.0)
            && self
                .qubits
                .iter()
                .all(|q| q.gate_error == 0.0 && q.readout_p01 == 0.0 && q.readout_p10 == 0.0)
    }

    /// Apply a random relative drift of up to `magnitude` to every rate.
    ///
    /// Error probabilities are clamped to `[0, 1]`; coherence times stay
    /// positive.
    pub fn drifted<R: Rng + ?Sized>(&self, magnitude: f64, rng: &mut R) -> Self {
        if magnitude <= 0.0 {
            return self.clone();
        }
        let mut jitter = |value: f64, upper: f64| -> f64 {
            let factor = 1.0 + magnitude * rng.gen_range(-1.0..=1.0);
            (value * factor).clamp(0.0, upper)
        };

        let mut out = self.clone();
        for q in &mut out.qubits {
            q.t1 = jitter(q.t1, f64::MAX).max(f64::MIN_POSITIVE);
            q.t2 = jitter(q.t2, f64::MAX).max(f64::MIN_POSITIVE);
            q.gate_error = jitter(q.gate_error, 1.0);
            q.readout_p01 = jitter(q.readout_p01, 1.0);
            q.readout_p10 = jitter(q.readout_p10, 1.0);
        }
        for e in &mut out.edges {
            e.gate_error = jitter(e.gate_error, 1.0);
        }
        out.default_two_qubit_error = jitter(out.default_two_qubit_error, 1.0);
        out
    }

    /// Take a snapshot of this description for `backend`.
    pub fn snapshot(&self, backend: &str) -> HalResult<CalibrationSnapshot> {
        let snapshot = CalibrationSnapshot::new(
            backend,
            self.qubits.clone(),
            self.edges.clone(),
            Duration::from_secs(self.valid_for_secs),
        )
        .with_default_two_qubit_error(self.default_two_qubit_error);
        snapshot.validate()?;
        Ok(snapshot)
    }
}
