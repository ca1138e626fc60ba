//! Decoding measurement counts into actions.
//!
//! Character `i` of a bitstring is the outcome of qubit `i`, and qubit `i`
//! is bit `i` of the bitstring's integer value.
//!
//! - Discrete: outcome `b` votes for bucket `value(b) mod action_space_size`.
//!   The bucket with the most shots wins; ties go to the lowest bucket.
//!   Bucket 0 holds the all-zero outcome and is the neutral action.
//! - Continuous: outcome `b` scores `1 - 2·popcount(b)/n` in `[-1, 1]`, the
//!   mean `⟨Z⟩` over its qubits. The shot-weighted mean score is mapped onto
//!   `[low, high]` and clipped. The all-zero outcome scores `+1`, so the
//!   neutral continuous action is `high`, not the midpoint. The midpoint is
//!   reached when half the qubits read one on average.

use std::fmt;

use serde::{Deserialize, Serialize};

use qpolicy_hal::ExecutionResult;

use crate::error::{PolicyError, PolicyResult};
use crate::params::{ActionSpace, Hyperparameters};

/// A decoded policy action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Index of a discrete action.
    Discrete(u32),
    /// A bounded scalar.
    Continuous(f64),
}

impl Action {
    /// Histogram key of the action.
    pub fn label(&self) -> String {
        match self {
            Action::Discrete(i) => i.to_string(),
            Action::Continuous(v) => format!("{v:.3}"),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Discrete(i) => write!(f, "discrete({i})"),
            Action::Continuous(v) => write!(f, "continuous({v})"),
        }
    }
}

/// An action plus the distribution it was decoded from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decoded {
    /// The chosen action.
    pub action: Action,
    /// Shots per discrete bucket, or per Hamming weight for continuous
    /// actions.
    pub distribution: Vec<u64>,
}

/// Decode `raw` under `hyperparameters`.
pub fn decode(raw: &ExecutionResult, hyperparameters: &Hyperparameters) -> PolicyResult<Decoded> {
    let width = hyperparameters.qubit_count as usize;
    let total = raw.counts.total_shots();
    if total == 0 {
        return Err(PolicyError::MalformedResult("result has no shots".into()));
    }
    for (bitstring, _) in raw.counts.iter() {
        if bitstring.len() != width || !bitstring.bytes().all(|b| b == b'0' || b == b'1') {
            return Err(PolicyError::MalformedResult(format!(
                "'{bitstring}' is not a {width}-bit outcome"
            )));
        }
    }

    match hyperparameters.action_space {
        ActionSpace::Discrete => Ok(decode_discrete(raw, hyperparameters.action_space_size)),
        ActionSpace::Continuous { low, high } => Ok(decode_continuous(raw, width, total, low, high)),
    }
}

fn decode_discrete(raw: &ExecutionResult, buckets: u32) -> Decoded {
    let mut distribution = vec![0u64; buckets.max(1) as usize];
    for (bitstring, &count) in raw.counts.iter() {
        let bucket = bucket_of(bitstring, buckets);
        distribution[bucket as usize] += count;
    }

    // max_by_key keeps the last maximum, so scan in reverse to keep the first.
    let winner = distribution
        .iter()
        .enumerate()
        .rev()
        .max_by_key(|(_, count)| **count)
        .map_or(0, |(i, _)| i as u32);

    Decoded {
        action: Action::Discrete(winner),
        distribution,
    }
}

fn decode_continuous(raw: &ExecutionResult, width: usize, total: u64, low: f64, high: f64) -> Decoded {
    let mut distribution = vec![0u64; width + 1];
    for (bitstring, &count) in raw.counts.iter() {
        distribution[popcount(bitstring)] += count;
    }

    let n = width as f64;
    let mean = distribution
        .iter()
        .enumerate()
        .map(|(weight, &count)| (1.0 - 2.0 * weight as f64 / n) * count as f64)
        .sum::<f64>()
        / total as f64;

    let value = (low + (mean + 1.0) / 2.0 * (high - low)).clamp(low, high);
    Decoded {
        action: Action::Continuous(value),
        distribution,
    }
}

/// Bucket of `bitstring` among `buckets` discrete actions.
///
/// Works for any width by reducing the powers of two modulo `buckets`.
pub fn bucket_of(bitstring: &str, buckets: u32) -> u32 {
    let m = u64::from(buckets.max(1));
    let mut acc = 0u64;
    let mut power = 1 % m;
    for b in bitstring.bytes() {
        if b == b'1' {
            acc = (acc + power) % m;
        }
        power = (power * 2) % m;
    }
    acc as u32
}

fn popcount(bitstring: &str) -> usize {
    bitstring.bytes().filter(|&b| b == b'1').count()
}
