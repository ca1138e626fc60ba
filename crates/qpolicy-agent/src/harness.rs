//! Episode harness.
//!
//! Every step runs build → execute → decode → log before the environment
//! sees the action. Episodes are independent: each holds its own snapshot
//! reference and logger, and an error aborts only the episode it occurred
//! in. Seeded runs give each episode its own backend, so results do not
//! depend on the order concurrent episodes are polled in.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use qpolicy_hal::CalibrationSnapshot;

use crate::builder::CircuitBuilder;
use crate::decoder::decode;
use crate::env::Environment;
use crate::error::{PolicyError, PolicyResult};
use crate::executor::Executor;
use crate::logger::{AuditSink, ResultLogger};
use crate::params::ParameterStore;
use crate::provider::{
    BackendHandle, EpisodeBackends, RefreshCadence, RefreshOutcome, RefreshPolicy,
};
use crate::report::{EpisodeReport, EpisodeStatus};

/// Harness settings.
#[derive(Debug, Clone)]
pub struct HarnessSettings {
    /// Step limit per episode.
    pub max_steps: u32,
    /// Episodes run at the same time.
    pub concurrency: usize,
    /// Shots per step.
    pub shots: u32,
    /// Deadline of one execution.
    pub execution_timeout: Duration,
    /// Retry rules for calibration refresh.
    pub refresh_policy: RefreshPolicy,
    /// When episodes refresh calibration.
    pub cadence: RefreshCadence,
}

impl HarnessSettings {
    /// Settings with defaults, using `shots` shots per step.
    pub fn new(shots: u32) -> Self {
        Self {
            max_steps: 200,
            concurrency: 1,
            shots,
            execution_timeout: Duration::from_secs(30),
            refresh_policy: RefreshPolicy::default(),
            cadence: RefreshCadence::PerEpisode,
        }
    }
}

/// Callback run as each episode finishes.
pub type EpisodeCallback = Arc<dyn Fn(&EpisodeReport) + Send + Sync>;

/// Runs a policy against environments on one backend.
#[derive(Clone)]
pub struct EvaluationHarness {
    store: Arc<ParameterStore>,
    builder: Arc<CircuitBuilder>,
    executor: Executor,
    sink: Arc<dyn AuditSink>,
    settings: HarnessSettings,
    on_episode: Option<EpisodeCallback>,
    episode_backends: Option<EpisodeBackends>,
}

impl EvaluationHarness {
    /// Create a harness.
    pub fn new(
        store: Arc<ParameterStore>,
        handle: BackendHandle,
        sink: Arc<dyn AuditSink>,
        settings: HarnessSettings,
    ) -> PolicyResult<Self> {
        let builder = Arc::new(CircuitBuilder::new(store.hyperparameters())?);
        let executor = Executor::new(handle, settings.execution_timeout);
        Ok(Self {
            store,
            builder,
            executor,
            sink,
            settings,
            on_episode: None,
            episode_backends: None,
        })
    }

    /// Call `callback` as each episode finishes.
    #[must_use]
    pub fn on_episode(mut self, callback: EpisodeCallback) -> Self {
        self.on_episode = Some(callback);
        self
    }

    /// Run every episode on its own backend from `backends` instead of the
    /// shared handle.
    #[must_use]
    pub fn with_episode_backends(mut self, backends: EpisodeBackends) -> Self {
        self.episode_backends = Some(backends);
        self
    }

    /// The backend handle.
    pub fn handle(&self) -> &BackendHandle {
        self.executor.handle()
    }

    /// Run `episodes` episodes, creating each environment with `make_env`.
    ///
    /// Reports are returned sorted by episode index.
    pub async fn run<F, E>(&self, episodes: u32, make_env: F) -> Vec<EpisodeReport>
    where
        F: Fn(u32) -> PolicyResult<E>,
        E: Environment,
    {
        info!(
            episodes,
            concurrency = self.settings.concurrency,
            backend = %self.handle().name(),
            "Starting evaluation"
        );
        let mut reports: Vec<EpisodeReport> = stream::iter(0..episodes)
            .map(|episode| {
                let env = make_env(episode);
                async move {
                    let report = match env {
                        Ok(env) => self.run_episode(episode, env).await,
                        Err(e) => aborted(EpisodeReport::new(episode), &e),
                    };
                    if let Some(callback) = &self.on_episode {
                        callback(&report);
                    }
                    report
                }
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;
        reports.sort_by_key(|r| r.episode);
        reports
    }

    /// Run a single episode.
    pub async fn run_episode<E: Environment>(&self, episode: u32, mut env: E) -> EpisodeReport {
        let mut report = EpisodeReport::new(episode);
        let executor = match &self.episode_backends {
            Some(backends) => match backends(episode) {
                Ok(handle) => Executor::new(handle, self.settings.execution_timeout),
                Err(e) => return aborted(report, &e),
            },
            None => self.executor.clone(),
        };
        let mut logger = ResultLogger::new(Arc::clone(&self.sink), episode);

        let result = self
            .episode_loop(&executor, &mut env, &mut logger, &mut report)
            .await;
        report.log_failures = logger.failures();

        match result {
            Ok(()) => {
                info!(
                    episode,
                    steps = report.steps,
                    reward = report.total_reward,
                    "Episode completed"
                );
                report
            }
            Err(e) => aborted(report, &e),
        }
    }

    async fn episode_loop<E: Environment>(
        &self,
        executor: &Executor,
        env: &mut E,
        logger: &mut ResultLogger,
        report: &mut EpisodeReport,
    ) -> PolicyResult<()> {
        let hyperparameters = self.store.hyperparameters();
        let mut snapshot: Option<Arc<CalibrationSnapshot>> = None;
        let mut fallback = false;
        let mut observation = env.reset()?;

        for step in 0..self.settings.max_steps {
            let expired = snapshot.as_ref().is_none_or(|s| s.is_expired());
            if self.settings.cadence.is_due(step) || expired {
                let outcome = self.refresh(executor.handle(), report).await?;
                fallback = outcome.fallback;
                snapshot = Some(outcome.snapshot);
            }
            let Some(current) = snapshot.as_deref() else {
                return Err(PolicyError::StaleCalibration(
                    "no calibration snapshot has been fetched".into(),
                ));
            };

            let spec = self.builder.build(&observation, &self.store)?;
            let raw = executor
                .run(&spec, Some(current), self.settings.shots)
                .await?;
            let decoded = decode(&raw, hyperparameters)?;
            logger.record(step, &raw, &decoded, current.id, &spec.fingerprint, fallback);

            if !report.snapshot_ids.contains(&current.id) {
                report.snapshot_ids.push(current.id);
            }
            *report
                .action_histogram
                .entry(decoded.action.label())
                .or_insert(0) += 1;
            report.steps += 1;

            debug!(episode = report.episode, step, action = %decoded.action, "Step done");

            let transition = env.step(&decoded.action)?;
            report.total_reward += transition.reward;
            if transition.done {
                break;
            }
            observation = transition.observation;
        }
        Ok(())
    }

    async fn refresh(
        &self,
        handle: &BackendHandle,
        report: &mut EpisodeReport,
    ) -> PolicyResult<RefreshOutcome> {
        let result = handle.refresh(&self.settings.refresh_policy).await;
        match &result {
            Ok(outcome) => {
                report.refreshes += 1;
                report.refresh_failures += outcome.failures.len() as u32;
                if outcome.fallback {
                    report.fallback_refreshes += 1;
                }
            }
            Err(PolicyError::BackendUnavailable { attempts, .. }) => {
                report.refresh_failures += attempts;
            }
            Err(_) => {}
        }
        result
    }
}

fn aborted(mut report: EpisodeReport, error: &PolicyError) -> EpisodeReport {
    warn!(
        episode = report.episode,
        steps = report.steps,
        kind = error.kind(),
        error = %error,
        "Episode aborted"
    );
    report.status = EpisodeStatus::Aborted {
        kind: error.kind().to_string(),
        reason: error.to_string(),
    };
    report
}
