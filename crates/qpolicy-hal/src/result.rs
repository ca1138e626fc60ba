//! Execution results.
//!
//! Bitstrings follow one convention throughout: character `i` is the
//! measurement outcome of qubit `i`, so qubit 0 is the leftmost character.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calibration::SnapshotId;

/// Measurement counts keyed by bitstring.
///
/// Iteration order is by bitstring, which keeps serialized counts stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counts {
    counts: BTreeMap<String, u64>,
}

impl Counts {
    /// Create empty counts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` observations of `bitstring`.
    pub fn insert(&mut self, bitstring: impl Into<String>, count: u64) {
        *self.counts.entry(bitstring.into()).or_insert(0) += count;
    }

    /// Count of `bitstring`, zero when never observed.
    pub fn get(&self, bitstring: &str) -> u64 {
        self.counts.get(bitstring).copied().unwrap_or(0)
    }

    /// Sum of all counts.
    pub fn total_shots(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Number of distinct bitstrings observed.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether nothing was observed.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Iterate over `(bitstring, count)` in bitstring order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.counts.iter()
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for Counts {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut counts = Counts::new();
        for (bitstring, count) in iter {
            counts.insert(bitstring, count);
        }
        counts
    }
}

/// Result of running a circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Measurement counts.
    pub counts: Counts,
    /// Number of shots requested.
    pub shots: u32,
    /// Calibration snapshot the circuit ran under.
    pub snapshot_id: SnapshotId,
    /// Wall-clock execution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

impl ExecutionResult {
    /// Create a new execution result.
    pub fn new(counts: Counts, shots: u32, snapshot_id: SnapshotId) -> Self {
        Self {
            counts,
            shots,
            snapshot_id,
            execution_time_ms: None,
        }
    }

    /// Set the execution time.
    #[must_use]
    pub fn with_execution_time(mut self, ms: u64) -> Self {
        self.execution_time_ms = Some(ms);
        self
    }

    /// Whether the counts sum to the requested shots.
    pub fn is_consistent(&self) -> bool {
        self.counts.total_shots() == u64::from(self.shots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_accumulates() {
        let mut counts = Counts::new();
        counts.insert("00", 3);
        counts.insert("00", 2);
        counts.insert("11", 1);
        assert_eq!(counts.get("00"), 5);
        assert_eq!(counts.get("01"), 0);
        assert_eq!(counts.total_shots(), 6);
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn test_consistency() {
        let counts: Counts = [("0", 60), ("1", 40)].into_iter().collect();
        let result = ExecutionResult::new(counts.clone(), 100, SnapshotId::new());
        assert!(result.is_consistent());
        let short = ExecutionResult::new(counts, 101, SnapshotId::new());
        assert!(!short.is_consistent());
    }

    #[test]
    fn test_counts_serialize_as_map() {
        let counts: Counts = [("1", 2), ("0", 1)].into_iter().collect();
        let json = serde_json::to_string(&counts).unwrap();
        assert_eq!(json, r#"{"0":1,"1":2}"#);
    }
}
