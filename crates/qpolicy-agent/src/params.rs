//! Policy artifacts and the parameter store.
//!
//! A trained policy is shipped as a JSON artifact:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "ansatz": "ry-rz-cx/v1",
//!   "hyperparameters": {
//!     "qubit_count": 4,
//!     "circuit_depth": 2,
//!     "entanglement_pattern": "linear",
//!     "shot_count": 1024,
//!     "action_space_size": 2
//!   },
//!   "parameters": [0.12, -0.4, ...],
//!   "metadata": { "trained_by": "ppo", "env": "CartPole-v1" }
//! }
//! ```
//!
//! The store validates the artifact once at load and is immutable afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use qpolicy_ir::content_fingerprint;

use crate::error::{PolicyError, PolicyResult};

/// Artifact format version understood by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// Identifier of the ansatz the parameters are laid out for.
pub const ANSATZ_ID: &str = "ry-rz-cx/v1";

/// Two-qubit entangling pattern of every ansatz layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntanglementPattern {
    /// CX from qubit `i` to `i + 1`.
    #[default]
    Linear,
    /// Linear plus CX from the last qubit to qubit 0.
    Circular,
    /// CX for every pair `i < j`.
    Full,
}

impl EntanglementPattern {
    /// Control/target pairs of one entangling block on `n` qubits.
    pub fn pairs(self, n: u32) -> Vec<(u32, u32)> {
        match self {
            EntanglementPattern::Linear => (1..n).map(|i| (i - 1, i)).collect(),
            EntanglementPattern::Circular => {
                let mut pairs = EntanglementPattern::Linear.pairs(n);
                if n > 2 {
                    pairs.push((n - 1, 0));
                }
                pairs
            }
            EntanglementPattern::Full => (0..n)
                .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
                .collect(),
        }
    }
}

impl fmt::Display for EntanglementPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntanglementPattern::Linear => write!(f, "linear"),
            EntanglementPattern::Circular => write!(f, "circular"),
            EntanglementPattern::Full => write!(f, "full"),
        }
    }
}

impl FromStr for EntanglementPattern {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(EntanglementPattern::Linear),
            "circular" | "ring" => Ok(EntanglementPattern::Circular),
            "full" => Ok(EntanglementPattern::Full),
            other => Err(PolicyError::Config(format!(
                "unknown entanglement pattern '{other}' (expected linear, circular or full)"
            ))),
        }
    }
}

/// Shape of the action a policy emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActionSpace {
    /// One of `action_space_size` discrete actions.
    #[default]
    Discrete,
    /// A scalar in `[low, high]`.
    Continuous {
        /// Lower bound.
        low: f64,
        /// Upper bound.
        high: f64,
    },
}

/// Hyperparameters fixed at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Number of qubits, equal to the observation width.
    pub qubit_count: u32,
    /// Number of ansatz layers.
    pub circuit_depth: u32,
    /// Entangling pattern of each layer.
    #[serde(default)]
    pub entanglement_pattern: EntanglementPattern,
    /// Shots per step.
    pub shot_count: u32,
    /// Number of discrete actions.
    pub action_space_size: u32,
    /// Discrete or continuous action space.
    #[serde(default, skip_serializing_if = "is_discrete")]
    pub action_space: ActionSpace,
}

fn is_discrete(space: &ActionSpace) -> bool {
    matches!(space, ActionSpace::Discrete)
}

impl Hyperparameters {
    /// Discrete-action hyperparameters with a linear entangler.
    pub fn new(qubit_count: u32, circuit_depth: u32, shot_count: u32, action_space_size: u32) -> Self {
        Self {
            qubit_count,
            circuit_depth,
            entanglement_pattern: EntanglementPattern::Linear,
            shot_count,
            action_space_size,
            action_space: ActionSpace::Discrete,
        }
    }

    /// Set the entanglement pattern.
    #[must_use]
    pub fn with_entanglement(mut self, pattern: EntanglementPattern) -> Self {
        self.entanglement_pattern = pattern;
        self
    }

    /// Switch to a continuous action space over `[low, high]`.
    #[must_use]
    pub fn with_continuous_actions(mut self, low: f64, high: f64) -> Self {
        self.action_space = ActionSpace::Continuous { low, high };
        self
    }

    /// Number of trainable parameters the ansatz expects.
    pub fn parameter_count(&self) -> usize {
        2 * self.qubit_count as usize * self.circuit_depth as usize
    }

    /// Check the hyperparameters on their own.
    pub fn validate(&self) -> Result<(), String> {
        if self.qubit_count == 0 {
            return Err("qubit_count must be at least 1".into());
        }
        if self.circuit_depth == 0 {
            return Err("circuit_depth must be at least 1".into());
        }
        if self.shot_count == 0 {
            return Err("shot_count must be at least 1".into());
        }
        match self.action_space {
            ActionSpace::Discrete => {
                if self.action_space_size == 0 {
                    return Err("action_space_size must be at least 1".into());
                }
                let reachable = 1u64.checked_shl(self.qubit_count).unwrap_or(u64::MAX);
                if u64::from(self.action_space_size) > reachable {
                    return Err(format!(
                        "action_space_size {} exceeds the {reachable} outcomes of {} qubits",
                        self.action_space_size, self.qubit_count
                    ));
                }
            }
            ActionSpace::Continuous { low, high } => {
                if !low.is_finite() || !high.is_finite() || low >= high {
                    return Err(format!(
                        "continuous bounds must be finite with low < high, got [{low}, {high}]"
                    ));
                }
            }
        }
        Ok(())
    }
}

/// On-disk representation of a trained policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyArtifact {
    /// Artifact format version.
    pub format_version: u32,
    /// Ansatz identifier.
    pub ansatz: String,
    /// Training-time hyperparameters.
    pub hyperparameters: Hyperparameters,
    /// Trainable parameters in ansatz order.
    pub parameters: Vec<f64>,
    /// Free-form provenance.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl PolicyArtifact {
    /// Create an artifact for the current format and ansatz.
    pub fn new(hyperparameters: Hyperparameters, parameters: Vec<f64>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            ansatz: ANSATZ_ID.into(),
            hyperparameters,
            parameters,
            metadata: BTreeMap::new(),
        }
    }

    /// An artifact with every parameter zero.
    pub fn zeros(hyperparameters: Hyperparameters) -> Self {
        let n = hyperparameters.parameter_count();
        Self::new(hyperparameters, vec![0.0; n])
    }

    /// An artifact with parameters drawn uniformly from `[-π, π)`.
    pub fn random(hyperparameters: Hyperparameters, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = hyperparameters.parameter_count();
        let parameters = (0..n)
            .map(|_| rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI))
            .collect();
        Self::new(hyperparameters, parameters)
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check the artifact against the ansatz it declares.
    pub fn validate(&self) -> Result<(), String> {
        if self.format_version != FORMAT_VERSION {
            return Err(format!(
                "unsupported format_version {} (supported: {FORMAT_VERSION})",
                self.format_version
            ));
        }
        if self.ansatz != ANSATZ_ID {
            return Err(format!(
                "ansatz '{}' does not match '{ANSATZ_ID}'",
                self.ansatz
            ));
        }
        self.hyperparameters.validate()?;

        let expected = self.hyperparameters.parameter_count();
        if self.parameters.len() != expected {
            return Err(format!(
                "{} parameters given but {} qubits x {} layers needs {expected}",
                self.parameters.len(),
                self.hyperparameters.qubit_count,
                self.hyperparameters.circuit_depth
            ));
        }
        if let Some(i) = self.parameters.iter().position(|p| !p.is_finite()) {
            return Err(format!("parameter {i} is not finite"));
        }
        Ok(())
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> PolicyResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Content fingerprint over the compact JSON form.
    pub fn fingerprint(&self) -> PolicyResult<String> {
        let compact = serde_json::to_vec(self)?;
        Ok(content_fingerprint(&compact))
    }
}

/// Validated, immutable policy parameters.
///
/// Share it across episodes behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStore {
    artifact: PolicyArtifact,
    fingerprint: String,
}

impl ParameterStore {
    /// Load and validate an artifact file.
    pub fn load(path: &Path) -> PolicyResult<Self> {
        let source = path.display().to_string();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PolicyError::load(&source, format!("cannot read file: {e}")))?;
        Self::from_json(&text, &source)
    }

    /// Parse and validate artifact JSON. `source_name` is used in errors.
    pub fn from_json(text: &str, source_name: &str) -> PolicyResult<Self> {
        let artifact: PolicyArtifact = serde_json::from_str(text)
            .map_err(|e| PolicyError::load(source_name, format!("malformed artifact: {e}")))?;
        Self::from_artifact_named(artifact, source_name)
    }

    /// Validate an in-memory artifact.
    pub fn from_artifact(artifact: PolicyArtifact) -> PolicyResult<Self> {
        Self::from_artifact_named(artifact, "<memory>")
    }

    fn from_artifact_named(artifact: PolicyArtifact, source_name: &str) -> PolicyResult<Self> {
        artifact
            .validate()
            .map_err(|reason| PolicyError::load(source_name, reason))?;
        let fingerprint = artifact.fingerprint()?;
        debug!(
            source = source_name,
            qubits = artifact.hyperparameters.qubit_count,
            depth = artifact.hyperparameters.circuit_depth,
            %fingerprint,
            "Loaded policy artifact"
        );
        Ok(Self {
            artifact,
            fingerprint,
        })
    }

    /// Write an artifact so that [`ParameterStore::load`] reproduces it exactly.
    pub fn store(artifact: &PolicyArtifact, path: &Path) -> PolicyResult<()> {
        artifact
            .validate()
            .map_err(|reason| PolicyError::Config(format!("refusing to store artifact: {reason}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, artifact.to_json()?)?;
        Ok(())
    }

    /// The trainable parameters.
    pub fn parameters(&self) -> &[f64] {
        &self.artifact.parameters
    }

    /// The hyperparameters.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.artifact.hyperparameters
    }

    /// Artifact metadata.
    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.artifact.metadata
    }

    /// The full artifact.
    pub fn artifact(&self) -> &PolicyArtifact {
        &self.artifact
    }

    /// Content fingerprint of the artifact.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hyper() -> Hyperparameters {
        Hyperparameters::new(3, 2, 100, 4)
    }

    #[test]
    fn test_parameter_count() {
        assert_eq!(hyper().parameter_count(), 12);
        assert_eq!(Hyperparameters::new(1, 1, 1, 1).parameter_count(), 2);
    }

    #[test]
    fn test_entanglement_pairs() {
        assert_eq!(EntanglementPattern::Linear.pairs(3), vec![(0, 1), (1, 2)]);
        assert_eq!(
            EntanglementPattern::Circular.pairs(3),
            vec![(0, 1), (1, 2), (2, 0)]
        );
        assert_eq!(EntanglementPattern::Circular.pairs(2), vec![(0, 1)]);
        assert_eq!(EntanglementPattern::Full.pairs(4).len(), 6);
        assert!(EntanglementPattern::Linear.pairs(1).is_empty());
        assert_eq!(
            "ring".parse::<EntanglementPattern>().unwrap(),
            EntanglementPattern::Circular
        );
        assert!("star".parse::<EntanglementPattern>().is_err());
    }

    #[test]
    fn test_load_rejects_length_mismatch() {
        let mut artifact = PolicyArtifact::zeros(hyper());
        artifact.parameters.pop();
        let err = ParameterStore::from_artifact(artifact).unwrap_err();
        assert!(matches!(err, PolicyError::Load { .. }));
        assert!(err.to_string().contains("needs 12"));
    }

    #[test]
    fn test_load_rejects_unknown_version_and_ansatz() {
        let mut artifact = PolicyArtifact::zeros(hyper());
        artifact.format_version = 2;
        assert!(ParameterStore::from_artifact(artifact).is_err());

        let mut artifact = PolicyArtifact::zeros(hyper());
        artifact.ansatz = "rx-cz/v3".into();
        assert!(ParameterStore::from_artifact(artifact).is_err());
    }

    #[test]
    fn test_load_rejects_bad_hyperparameters() {
        for h in [
            Hyperparameters::new(0, 1, 10, 1),
            Hyperparameters::new(2, 0, 10, 1),
            Hyperparameters::new(2, 1, 0, 1),
            Hyperparameters::new(2, 1, 10, 0),
            Hyperparameters::new(2, 1, 10, 5),
            Hyperparameters::new(2, 1, 10, 1).with_continuous_actions(1.0, -1.0),
            Hyperparameters::new(2, 1, 10, 1).with_continuous_actions(f64::NEG_INFINITY, 0.0),
        ] {
            assert!(h.validate().is_err(), "{h:?} should be rejected");
        }
    }

    #[test]
    fn test_load_rejects_non_finite_parameter() {
        let mut artifact = PolicyArtifact::zeros(hyper());
        artifact.parameters[3] = f64::NAN;
        let err = ParameterStore::from_artifact(artifact).unwrap_err();
        assert!(err.to_string().contains("parameter 3"));
    }

    #[test]
    fn test_malformed_json_is_load_error() {
        let err = ParameterStore::from_json("{\"format_version\": 1", "inline").unwrap_err();
        assert!(matches!(err, PolicyError::Load { ref source_name, .. } if source_name == "inline"));
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let err = ParameterStore::load(Path::new("/nonexistent/policy.json")).unwrap_err();
        assert!(matches!(err, PolicyError::Load { .. }));
    }

    #[test]
    fn test_discrete_action_space_is_omitted_from_json() {
        let json = PolicyArtifact::zeros(hyper()).to_json().unwrap();
        assert!(!json.contains("action_space\""));
        let continuous = Hyperparameters::new(2, 1, 10, 1).with_continuous_actions(-2.0, 2.0);
        let json = PolicyArtifact::zeros(continuous).to_json().unwrap();
        assert!(json.contains("\"kind\": \"continuous\""));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = ParameterStore::from_artifact(PolicyArtifact::zeros(hyper())).unwrap();
        let b = ParameterStore::from_artifact(PolicyArtifact::random(hyper(), 1)).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        let c = ParameterStore::from_artifact(PolicyArtifact::zeros(hyper())).unwrap();
        assert_eq!(a.fingerprint(), c.fingerprint());
    }

    fn arb_artifact() -> impl Strategy<Value = PolicyArtifact> {
        (1u32..5, 1u32..4, 1u32..5000, prop::bool::ANY, 0u64..1000)
            .prop_flat_map(|(q, d, shots, continuous, meta)| {
                let n = 2 * (q * d) as usize;
                let size = 1u32..=(1u32 << q);
                (
                    Just((q, d, shots, continuous, meta)),
                    size,
                    prop::collection::vec(-1.0e6f64..1.0e6, n),
                    -100.0f64..0.0,
                    0.001f64..100.0,
                )
            })
            .prop_map(|((q, d, shots, continuous, meta), size, params, low, width)| {
                let mut h = Hyperparameters::new(q, d, shots, size);
                if continuous {
                    h = h.with_continuous_actions(low, low + width);
                }
                PolicyArtifact::new(h, params).with_metadata("seed", meta)
            })
    }

    proptest! {
        #[test]
        fn prop_store_then_load_is_identity(artifact in arb_artifact()) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("policy.json");
            ParameterStore::store(&artifact, &path).unwrap();
            let loaded = ParameterStore::load(&path).unwrap();
            prop_assert_eq!(loaded.artifact(), &artifact);
        }
    }
}
