//! End-to-end evaluation from an [`EvaluationConfig`].

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use qpolicy_hal::BackendRegistry;

use crate::config::EvaluationConfig;
use crate::env::{ReplayEnvironment, Trace};
use crate::error::{PolicyError, PolicyResult};
use crate::harness::{EpisodeCallback, EvaluationHarness, HarnessSettings};
use crate::logger::{AuditSink, JsonlSink, NullSink};
use crate::params::ParameterStore;
use crate::provider::{connect, seeded_backends};
use crate::report::{EvaluationReport, ExportConfig, ReproducibilityInfo, to_file};

/// Everything an evaluation run needs, resolved from configuration.
pub struct Evaluation {
    config: EvaluationConfig,
    store: Arc<ParameterStore>,
    trace: Arc<Trace>,
    harness: EvaluationHarness,
}

impl Evaluation {
    /// Load the artifact and trace, open the audit log and connect.
    pub fn prepare(config: EvaluationConfig, registry: &BackendRegistry) -> PolicyResult<Self> {
        config.validate()?;
        let artifact = config
            .artifact
            .as_deref()
            .ok_or_else(|| PolicyError::Config("no policy artifact given".into()))?;
        let trace_path = config
            .trace
            .as_deref()
            .ok_or_else(|| PolicyError::Config("no observation trace given".into()))?;

        let store = Arc::new(ParameterStore::load(artifact)?);
        let trace = Arc::new(Trace::load(trace_path)?);

        let sink: Arc<dyn AuditSink> = match &config.audit_log {
            Some(path) => Arc::new(JsonlSink::open(path).map_err(|e| {
                PolicyError::Config(format!("cannot open audit log '{}': {e}", path.display()))
            })?),
            None => Arc::new(NullSink),
        };

        let handle = connect(registry, &config.backend, config.backend_config())?;
        let settings = HarnessSettings {
            max_steps: config.max_steps,
            concurrency: config.concurrency,
            shots: config.shots.unwrap_or(store.hyperparameters().shot_count),
            execution_timeout: config.execution_timeout(),
            refresh_policy: config.refresh.policy(),
            cadence: config.refresh.cadence,
        };
        let mut harness = EvaluationHarness::new(Arc::clone(&store), handle, sink, settings)?;
        if let Some(seed) = config.seed {
            harness = harness.with_episode_backends(seeded_backends(
                registry.clone(),
                config.backend.clone(),
                config.backend_config(),
                seed,
            ));
        }

        Ok(Self {
            config,
            store,
            trace,
            harness,
        })
    }

    /// Call `callback` as each episode finishes.
    #[must_use]
    pub fn on_episode(mut self, callback: EpisodeCallback) -> Self {
        self.harness = self.harness.on_episode(callback);
        self
    }

    /// The loaded parameter store.
    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    /// Run every episode and write the report if one is configured.
    pub async fn run(&self, cli_args: &[String]) -> PolicyResult<EvaluationReport> {
        let started_at = Utc::now();
        let trace = Arc::clone(&self.trace);
        let episodes = self
            .harness
            .run(self.config.episodes, |i| {
                Ok(ReplayEnvironment::new(Arc::clone(&trace), i as usize))
            })
            .await;

        let reproducibility = ReproducibilityInfo::capture(
            cli_args,
            self.store.fingerprint(),
            &self.config.backend,
            self.config.seed,
        );
        let report =
            EvaluationReport::new(reproducibility, started_at, episodes, self.config.confidence);

        if let Some(path) = &self.config.report {
            to_file(&report, path, &ExportConfig::default())?;
            info!(path = %path.display(), "Wrote evaluation report");
        }
        Ok(report)
    }
}
