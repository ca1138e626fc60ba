//! Evaluation configuration.
//!
//! Sources, highest precedence first:
//! 1. Command-line flags (applied by the caller)
//! 2. Environment variables with the `QPOLICY_` prefix
//! 3. A YAML configuration file
//! 4. Default values
//!
//! ```yaml
//! backend: fake-5q
//! seed: 7
//! artifact: policy.json
//! trace: trace.jsonl
//! audit_log: audit.jsonl
//! episodes: 8
//! max_steps: 200
//! concurrency: 4
//! confidence: 0.95
//! refresh:
//!   max_attempts: 3
//!   retry_delay_ms: 200
//!   cadence: { every_steps: 50 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use qpolicy_hal::BackendConfig;

use crate::error::{PolicyError, PolicyResult};
use crate::provider::{RefreshCadence, RefreshPolicy};
use crate::report::DEFAULT_CONFIDENCE;

/// Complete evaluation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Backend identifier.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Backend sampling seed.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Device description file for the simulator.
    #[serde(default)]
    pub device_file: Option<PathBuf>,

    /// Backend-specific settings such as `drift` or `run_latency_ms`.
    #[serde(default)]
    pub backend_options: serde_json::Map<String, serde_json::Value>,

    /// Policy artifact.
    #[serde(default)]
    pub artifact: Option<PathBuf>,

    /// Observation trace to replay.
    #[serde(default)]
    pub trace: Option<PathBuf>,

    /// Audit log destination (JSON Lines).
    #[serde(default)]
    pub audit_log: Option<PathBuf>,

    /// Evaluation report destination.
    #[serde(default)]
    pub report: Option<PathBuf>,

    /// Number of episodes.
    #[serde(default = "default_episodes")]
    pub episodes: u32,

    /// Step limit per episode.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Episodes run at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Shots per step, overriding the artifact's `shot_count`.
    #[serde(default)]
    pub shots: Option<u32>,

    /// Deadline of a single circuit execution in milliseconds.
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,

    /// Confidence level of the mean-reward interval in the report.
    #[serde(default = "default_confidence")]
    pub confidence: f64,

    /// Calibration refresh settings.
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// Calibration refresh settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Attempts before falling back to the last good snapshot.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Deadline of a single attempt in milliseconds.
    #[serde(default = "default_refresh_timeout_ms")]
    pub timeout_ms: u64,

    /// Oldest snapshot usable as a fallback, in seconds.
    #[serde(default = "default_max_snapshot_age_secs")]
    pub max_snapshot_age_secs: u64,

    /// When episodes refresh.
    #[serde(default, with = "serde_yaml_ng::with::singleton_map")]
    pub cadence: RefreshCadence,
}

fn default_backend() -> String {
    "simulator".to_string()
}

fn default_episodes() -> u32 {
    1
}

fn default_max_steps() -> u32 {
    200
}

fn default_concurrency() -> usize {
    1
}

fn default_execution_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    200
}

fn default_refresh_timeout_ms() -> u64 {
    10_000
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}
fn default_max_snapshot_age_secs() -> u64 {
    900
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_ms: default_refresh_timeout_ms(),
            max_snapshot_age_secs: default_max_snapshot_age_secs(),
            cadence: RefreshCadence::default(),
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            seed: None,
            device_file: None,
            backend_options: serde_json::Map::new(),
            artifact: None,
            trace: None,
            audit_log: None,
            report: None,
            episodes: default_episodes(),
            max_steps: default_max_steps(),
            concurrency: default_concurrency(),
            shots: None,
            execution_timeout_ms: default_execution_timeout_ms(),
            confidence: default_confidence(),
            refresh: RefreshConfig::default(),
        }
    }
}

impl RefreshConfig {
    /// Retry policy described by these settings.
    pub fn policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            max_snapshot_age: Duration::from_secs(self.max_snapshot_age_secs),
        }
    }
}

impl EvaluationConfig {
    /// Load and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> PolicyResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PolicyError::Config(format!("cannot read '{}': {e}", path.display()))
        })?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(text: &str) -> PolicyResult<Self> {
        let config: Self = serde_yaml_ng::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> PolicyResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Apply `QPOLICY_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> PolicyResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `QPOLICY_*` overrides looked up through `lookup`.
    ///
    /// A value that does not parse is an error rather than being ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> PolicyResult<()> {
        if let Some(backend) = lookup("QPOLICY_BACKEND") {
            self.backend = backend;
        }
        if let Some(path) = lookup("QPOLICY_ARTIFACT") {
            self.artifact = Some(path.into());
        }
        if let Some(path) = lookup("QPOLICY_TRACE") {
            self.trace = Some(path.into());
        }
        if let Some(path) = lookup("QPOLICY_AUDIT_LOG") {
            self.audit_log = Some(path.into());
        }
        if let Some(path) = lookup("QPOLICY_DEVICE_FILE") {
            self.device_file = Some(path.into());
        }
        if let Some(value) = lookup("QPOLICY_EPISODES") {
            self.episodes = parse_var("QPOLICY_EPISODES", &value)?;
        }
        if let Some(value) = lookup("QPOLICY_MAX_STEPS") {
            self.max_steps = parse_var("QPOLICY_MAX_STEPS", &value)?;
        }
        if let Some(value) = lookup("QPOLICY_CONCURRENCY") {
            self.concurrency = parse_var("QPOLICY_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("QPOLICY_SEED") {
            self.seed = Some(parse_var("QPOLICY_SEED", &value)?);
        }
        if let Some(value) = lookup("QPOLICY_CONFIDENCE") {
            self.confidence = parse_var("QPOLICY_CONFIDENCE", &value)?;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> PolicyResult<()> {
        if self.backend.trim().is_empty() {
            return Err(PolicyError::Config("backend must not be empty".into()));
        }
        if self.episodes == 0 {
            return Err(PolicyError::Config("episodes must be at least 1".into()));
        }
        if self.max_steps == 0 {
            return Err(PolicyError::Config("max_steps must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(PolicyError::Config("concurrency must be at least 1".into()));
        }
        if self.shots == Some(0) {
            return Err(PolicyError::InvalidShotCount(
                "shots override must be positive".into(),
            ));
        }
        if self.execution_timeout_ms == 0 {
            return Err(PolicyError::Config(
                "execution_timeout_ms must be positive".into(),
            ));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(PolicyError::Config(format!(
                "confidence must be in (0, 1), got {}",
                self.confidence
            )));
        }
        if self.refresh.max_attempts == 0 {
            return Err(PolicyError::Config(
                "refresh.max_attempts must be at least 1".into(),
            ));
        }
        if self.refresh.timeout_ms == 0 {
            return Err(PolicyError::Config(
                "refresh.timeout_ms must be positive".into(),
            ));
        }
        if self.refresh.cadence == RefreshCadence::EverySteps(0) {
            return Err(PolicyError::Config(
                "refresh.cadence every_steps must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Deadline of a single execution.
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    /// Backend configuration for the registry.
    pub fn backend_config(&self) -> BackendConfig {
        let mut config = BackendConfig::new(&self.backend);
        if let Some(path) = &self.device_file {
            config = config.with_device_file(path);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        for (key, value) in &self.backend_options {
            config = config.with_extra(key, value.clone());
        }
        config
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> PolicyResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| PolicyError::Config(format!("{key}={value:?}: {e}")))
}
