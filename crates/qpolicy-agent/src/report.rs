//! Evaluation reports.
//!
//! A report captures everything needed to reproduce an evaluation: tool
//! version, command line, artifact fingerprint, backend, seed and the
//! snapshots each episode ran under.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use qpolicy_hal::SnapshotId;

use crate::error::PolicyResult;

/// Report schema version.
pub const SCHEMA_VERSION: &str = "1.1.0";

/// Default confidence level of the mean-reward interval.
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Information for reproducing an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReproducibilityInfo {
    /// Tool version.
    pub qpolicy_version: String,
    /// Command line of the run.
    pub cli_args: Vec<String>,
    /// Report schema version.
    pub schema_version: String,
    /// Fingerprint of the evaluated artifact.
    pub artifact_fingerprint: String,
    /// Backend identifier.
    pub backend: String,
    /// Backend sampling seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl ReproducibilityInfo {
    /// Capture the current context.
    pub fn capture(
        cli_args: &[String],
        artifact_fingerprint: &str,
        backend: &str,
        seed: Option<u64>,
    ) -> Self {
        Self {
            qpolicy_version: env!("CARGO_PKG_VERSION").to_string(),
            cli_args: cli_args.to_vec(),
            schema_version: SCHEMA_VERSION.into(),
            artifact_fingerprint: artifact_fingerprint.to_string(),
            backend: backend.to_string(),
            seed,
        }
    }
}

/// How an episode ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EpisodeStatus {
    /// Ran until the environment finished or the step limit.
    Completed,
    /// Stopped by an error.
    Aborted {
        /// Error kind.
        kind: String,
        /// Error message.
        reason: String,
    },
}

impl EpisodeStatus {
    /// Whether the episode completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, EpisodeStatus::Completed)
    }
}

/// Outcome of one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeReport {
    /// Episode index.
    pub episode: u32,
    /// How the episode ended.
    #[serde(flatten)]
    pub status: EpisodeStatus,
    /// Steps executed.
    pub steps: u32,
    /// Sum of rewards.
    pub total_reward: f64,
    /// Times each action was chosen.
    pub action_histogram: BTreeMap<String, u64>,
    /// Calibration refreshes performed.
    pub refreshes: u32,
    /// Refreshes that fell back to the last good snapshot.
    pub fallback_refreshes: u32,
    /// Refresh attempts that failed.
    pub refresh_failures: u32,
    /// Audit records that could not be written.
    pub log_failures: u64,
    /// Snapshots executed under, in order of first use.
    pub snapshot_ids: Vec<SnapshotId>,
}

impl EpisodeReport {
    /// Empty report for `episode`.
    pub fn new(episode: u32) -> Self {
        Self {
            episode,
            status: EpisodeStatus::Completed,
            steps: 0,
            total_reward: 0.0,
            action_histogram: BTreeMap::new(),
            refreshes: 0,
            fallback_refreshes: 0,
            refresh_failures: 0,
            log_failures: 0,
            snapshot_ids: vec![],
        }
    }
}

/// Two-sided Student-t interval for the mean reward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// Confidence level, in `(0, 1)`.
    pub confidence: f64,
    /// Lower bound.
    pub low: f64,
    /// Upper bound.
    pub high: f64,
}

impl ConfidenceInterval {
    /// Interval around the mean of `samples`.
    ///
    /// `None` with fewer than two samples or a level outside `(0, 1)`.
    pub fn of_mean(samples: &[f64], confidence: f64) -> Option<Self> {
        let n = samples.len();
        if n < 2 || !(confidence > 0.0 && confidence < 1.0) {
            return None;
        }
        let mean = mean(samples)?;
        let std = sample_std(samples)?;
        let t = StudentsT::new(0.0, 1.0, (n - 1) as f64)
            .ok()?
            .inverse_cdf(1.0 - (1.0 - confidence) / 2.0);
        let half_width = t * std / (n as f64).sqrt();
        Some(Self {
            confidence,
            low: mean - half_width,
            high: mean + half_width,
        })
    }

    /// Half the interval width.
    pub fn half_width(&self) -> f64 {
        (self.high - self.low) / 2.0
    }
}

fn mean(samples: &[f64]) -> Option<f64> {
    (!samples.is_empty()).then(|| samples.iter().sum::<f64>() / samples.len() as f64)
}

/// Sample standard deviation (`n - 1` in the denominator).
fn sample_std(samples: &[f64]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let mean = mean(samples)?;
    let squares: f64 = samples.iter().map(|x| (x - mean).powi(2)).sum();
    Some((squares / (samples.len() - 1) as f64).sqrt())
}

/// Aggregate over all episodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Episodes that completed.
    pub completed: u32,
    /// Episodes that aborted.
    pub aborted: u32,
    /// Total steps over all episodes.
    pub total_steps: u64,
    /// Mean total reward of completed episodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_reward: Option<f64>,
    /// Sample standard deviation of the total reward of completed episodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_std: Option<f64>,
    /// Interval for the mean reward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_ci: Option<ConfidenceInterval>,
    /// Times each action was chosen over all episodes.
    pub action_histogram: BTreeMap<String, u64>,
}

impl Summary {
    /// Summarize `episodes`, with a reward interval at `confidence`.
    pub fn from_episodes(episodes: &[EpisodeReport], confidence: f64) -> Self {
        let completed: Vec<_> = episodes.iter().filter(|e| e.status.is_completed()).collect();
        let rewards: Vec<f64> = completed.iter().map(|e| e.total_reward).collect();

        let mut action_histogram = BTreeMap::new();
        for episode in episodes {
            for (action, count) in &episode.action_histogram {
                *action_histogram.entry(action.clone()).or_insert(0) += count;
            }
        }

        Self {
            completed: completed.len() as u32,
            aborted: (episodes.len() - completed.len()) as u32,
            total_steps: episodes.iter().map(|e| u64::from(e.steps)).sum(),
            mean_reward: mean(&rewards),
            reward_std: sample_std(&rewards),
            reward_ci: ConfidenceInterval::of_mean(&rewards, confidence),
            action_histogram,
        }
    }
}

/// Full evaluation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Reproducibility context.
    pub reproducibility: ReproducibilityInfo,
    /// When the evaluation started.
    pub started_at: DateTime<Utc>,
    /// When the evaluation finished.
    pub finished_at: DateTime<Utc>,
    /// Aggregate results.
    pub summary: Summary,
    /// Per-episode results, sorted by episode index.
    pub episodes: Vec<EpisodeReport>,
}

impl EvaluationReport {
    /// Assemble a report, sorting episodes by index. The reward interval
    /// is taken at `confidence`.
    pub fn new(
        reproducibility: ReproducibilityInfo,
        started_at: DateTime<Utc>,
        mut episodes: Vec<EpisodeReport>,
        confidence: f64,
    ) -> Self {
        episodes.sort_by_key(|e| e.episode);
        Self {
            reproducibility,
            started_at,
            finished_at: Utc::now(),
            summary: Summary::from_episodes(&episodes, confidence),
            episodes,
        }
    }
}

/// Export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Whether to pretty-print JSON output.
    pub pretty: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { pretty: true }
    }
}

/// Export a report to a JSON string.
pub fn to_json(report: &EvaluationReport, config: &ExportConfig) -> PolicyResult<String> {
    if config.pretty {
        Ok(serde_json::to_string_pretty(report)?)
    } else {
        Ok(serde_json::to_string(report)?)
    }
}

/// Export a report to a JSON file.
pub fn to_file(report: &EvaluationReport, path: &Path, config: &ExportConfig) -> PolicyResult<()> {
    let json = to_json(report, config)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)?;
    Ok(())
}
