//! Calibration snapshots.
//!
//! A [`CalibrationSnapshot`] is a point-in-time capture of a backend's noise
//! characteristics. Snapshots are immutable: a refresh always produces a new
//! value with a new [`SnapshotId`], and executions record the id they ran
//! under.
//!
//! Error rates are probabilities in `[0.0, 1.0]`. Times are in microseconds.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::NoiseProfile;
use crate::error::{HalError, HalResult};

/// Unique identifier of a calibration snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    /// Generate a fresh snapshot id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Calibration data of a single qubit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QubitCalibration {
    /// T1 relaxation time (μs).
    pub t1: f64,
    /// T2 dephasing time (μs).
    pub t2: f64,
    /// Depolarizing error probability of a single-qubit gate.
    pub gate_error: f64,
    /// Readout error: P(measure 1 | state is 0).
    pub readout_p01: f64,
    /// Readout error: P(measure 0 | state is 1).
    pub readout_p10: f64,
}

impl Default for QubitCalibration {
    fn default() -> Self {
        Self {
            t1: 100.0,
            t2: 80.0,
            gate_error: 0.0005,
            readout_p01: 0.01,
            readout_p10: 0.02,
        }
    }
}

impl QubitCalibration {
    /// A noiseless qubit. Coherence times are large but finite so the
    /// value survives JSON.
    pub fn ideal() -> Self {
        Self {
            t1: 1.0e9,
            t2: 1.0e9,
            gate_error: 0.0,
            readout_p01: 0.0,
            readout_p10: 0.0,
        }
    }

    fn validate(&self, index: usize) -> HalResult<()> {
        for (field, value) in [
            ("gate_error", self.gate_error),
            ("readout_p01", self.readout_p01),
            ("readout_p10", self.readout_p10),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(HalError::Calibration(format!(
                    "qubit {index}: {field} = {value} is not a probability"
                )));
            }
        }
        if self.t1.is_nan() || self.t2.is_nan() || self.t1 <= 0.0 || self.t2 <= 0.0 {
            return Err(HalError::Calibration(format!(
                "qubit {index}: coherence times must be positive"
            )));
        }
        Ok(())
    }
}

/// Calibration data of a coupled qubit pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCalibration {
    /// The coupled qubits. Edges are bidirectional.
    pub qubits: (u32, u32),
    /// Depolarizing error probability of a two-qubit gate on this edge.
    pub gate_error: f64,
}

/// Point-in-time calibration of a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSnapshot {
    /// Unique id of this snapshot.
    pub id: SnapshotId,
    /// Backend that produced the snapshot.
    pub backend: String,
    /// When the snapshot was fetched.
    pub fetched_at: DateTime<Utc>,
    /// How long the snapshot stays valid after `fetched_at`.
    pub valid_for: Duration,
    /// Per-qubit calibration, indexed by qubit.
    pub qubits: Vec<QubitCalibration>,
    /// Per-edge two-qubit calibration.
    #[serde(default)]
    pub edges: Vec<EdgeCalibration>,
    /// Two-qubit gate error used for pairs without an edge entry.
    #[serde(default)]
    pub default_two_qubit_error: f64,
}

impl CalibrationSnapshot {
    /// Create a snapshot fetched now.
    pub fn new(
        backend: impl Into<String>,
        qubits: Vec<QubitCalibration>,
        edges: Vec<EdgeCalibration>,
        valid_for: Duration,
    ) -> Self {
        Self {
            id: SnapshotId::new(),
            backend: backend.into(),
            fetched_at: Utc::now(),
            valid_for,
            qubits,
            edges,
            default_two_qubit_error: 0.0,
        }
    }

    /// Create a noiseless snapshot of `num_qubits` qubits.
    pub fn ideal(backend: impl Into<String>, num_qubits: u32, valid_for: Duration) -> Self {
        Self::new(
            backend,
            vec![QubitCalibration::ideal(); num_qubits as usize],
            vec![],
            valid_for,
        )
    }

    /// Set the fallback two-qubit gate error.
    #[must_use]
    pub fn with_default_two_qubit_error(mut self, error: f64) -> Self {
        self.default_two_qubit_error = error;
        self
    }

    /// Override the fetch timestamp.
    #[must_use]
    pub fn with_fetched_at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = fetched_at;
        self
    }

    /// Number of calibrated qubits.
    pub fn num_qubits(&self) -> usize {
        self.qubits.len()
    }

    /// Calibration of qubit `index`.
    pub fn qubit(&self, index: usize) -> Option<&QubitCalibration> {
        self.qubits.get(index)
    }

    /// Two-qubit gate error between `a` and `b`, in either order.
    pub fn two_qubit_error(&self, a: u32, b: u32) -> f64 {
        self.edges
            .iter()
            .find(|e| e.qubits == (a, b) || e.qubits == (b, a))
            .map_or(self.default_two_qubit_error, |e| e.gate_error)
    }

    /// Age of the snapshot at `now`. Negative ages clamp to zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Age of the snapshot.
    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }

    /// Whether the snapshot has outlived `valid_for` at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.age_at(now) > self.valid_for
    }

    /// Whether the snapshot has outlived `valid_for`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check that every error rate is a probability and coherence times are positive.
    pub fn validate(&self) -> HalResult<()> {
        if self.qubits.is_empty() {
            return Err(HalError::Calibration(format!(
                "snapshot for '{}' has no qubits",
                self.backend
            )));
        }
        for (i, q) in self.qubits.iter().enumerate() {
            q.validate(i)?;
        }
        let n = self.qubits.len() as u32;
        for edge in &self.edges {
            let (a, b) = edge.qubits;
            if a >= n || b >= n || a == b {
                return Err(HalError::Calibration(format!(
                    "edge ({a}, {b}) is not a valid qubit pair"
                )));
            }
            if !(0.0..=1.0).contains(&edge.gate_error) {
                return Err(HalError::Calibration(format!(
                    "edge ({a}, {b}): gate_error = {} is not a probability",
                    edge.gate_error
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.default_two_qubit_error) {
            return Err(HalError::Calibration(
                "default_two_qubit_error is not a probability".into(),
            ));
        }
        Ok(())
    }

    /// Device-wide averages of this snapshot.
    pub fn noise_profile(&self) -> NoiseProfile {
        let n = self.qubits.len().max(1) as f64;
        let mean = |f: fn(&QubitCalibration) -> f64| self.qubits.iter().map(f).sum::<f64>() / n;

        let two_qubit_fidelity = if self.edges.is_empty() {
            1.0 - self.default_two_qubit_error
        } else {
            1.0 - self.edges.iter().map(|e| e.gate_error).sum::<f64>() / self.edges.len() as f64
        };

        NoiseProfile {
            t1: Some(mean(|q| q.t1)),
            t2: Some(mean(|q| q.t2)),
            single_qubit_fidelity: Some(1.0 - mean(|q| q.gate_error)),
            two_qubit_fidelity: Some(two_qubit_fidelity),
            readout_fidelity: Some(1.0 - mean(|q| (q.readout_p01 + q.readout_p10) / 2.0)),
        }
    }
}
