//! End-to-end evaluation scenarios against the simulator.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use qpolicy_adapter_sim::SimulatorBackend;
use qpolicy_agent::{
    Action, BackendHandle, EpisodeStatus, Evaluation, EvaluationConfig, EvaluationHarness,
    Executor, HarnessSettings, Hyperparameters, MemorySink, ParameterStore, PolicyArtifact,
    PolicyError, RefreshPolicy, ReplayEnvironment, Trace, decode, read_jsonl,
};
use qpolicy_hal::{
    Backend, CalibrationSnapshot, Capabilities, Counts, ExecutionResult, HalError, HalResult,
};
use qpolicy_ir::Circuit;

/// Simulator wrapper with scripted refresh failures and a run counter.
struct ScriptedBackend {
    inner: SimulatorBackend,
    /// Refresh calls that succeed before failures start.
    succeed_first: u32,
    /// Refresh calls that fail once failures start; `u32::MAX` for forever.
    fail_next: u32,
    refreshes: AtomicU32,
    runs: AtomicU32,
}

impl ScriptedBackend {
    fn failing_first(fail_next: u32) -> Self {
        Self::new(0, fail_next)
    }

    fn new(succeed_first: u32, fail_next: u32) -> Self {
        Self {
            inner: SimulatorBackend::new().with_seed(5),
            succeed_first,
            fail_next,
            refreshes: AtomicU32::new(0),
            runs: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> &Capabilities {
        self.inner.capabilities()
    }

    async fn refresh(&self) -> HalResult<CalibrationSnapshot> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst);
        let failing = n >= self.succeed_first && n - self.succeed_first < self.fail_next;
        if failing {
            return Err(HalError::BackendUnavailable(format!(
                "calibration endpoint unreachable (call {})",
                n + 1
            )));
        }
        self.inner.refresh().await
    }

    async fn run(
        &self,
        circuit: &Circuit,
        snapshot: &CalibrationSnapshot,
        shots: u32,
    ) -> HalResult<ExecutionResult> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inner.run(circuit, snapshot, shots).await
    }
}

fn zero_store(qubits: u32, shots: u32) -> Arc<ParameterStore> {
    let artifact = PolicyArtifact::zeros(Hyperparameters::new(qubits, 2, shots, 4));
    Arc::new(ParameterStore::from_artifact(artifact).unwrap())
}

fn fast_policy() -> RefreshPolicy {
    RefreshPolicy {
        max_attempts: 3,
        retry_delay: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
        max_snapshot_age: Duration::from_secs(900),
    }
}

fn zero_trace(width: usize, len: usize) -> Arc<Trace> {
    Arc::new(Trace::from_observations(vec![vec![0.0; width]; len]).unwrap())
}

#[tokio::test]
async fn zero_observation_zero_parameters_is_neutral() {
    let store = zero_store(3, 100);
    let handle = BackendHandle::new(Arc::new(SimulatorBackend::new().with_seed(1)));
    let snapshot = handle.refresh(&fast_policy()).await.unwrap().snapshot;

    let builder = qpolicy_agent::CircuitBuilder::new(store.hyperparameters()).unwrap();
    let spec = builder.build(&[0.0, 0.0, 0.0], &store).unwrap();
    let executor = Executor::new(handle, Duration::from_secs(5));
    let raw = executor.run(&spec, Some(&*snapshot), 100).await.unwrap();

    assert_eq!(raw.counts.get("000"), 100);
    assert_eq!(raw.counts.len(), 1);
    let decoded = decode(&raw, store.hyperparameters()).unwrap();
    assert_eq!(decoded.action, Action::Discrete(0));
}

#[tokio::test]
async fn zero_policy_with_continuous_actions_decodes_to_upper_bound() {
    let artifact = PolicyArtifact::zeros(
        Hyperparameters::new(2, 2, 64, 1).with_continuous_actions(-1.0, 3.0),
    );
    let store = ParameterStore::from_artifact(artifact).unwrap();
    let handle = BackendHandle::new(Arc::new(SimulatorBackend::new().with_seed(4)));
    let snapshot = handle.refresh(&fast_policy()).await.unwrap().snapshot;

    let builder = qpolicy_agent::CircuitBuilder::new(store.hyperparameters()).unwrap();
    let spec = builder.build(&[0.0, 0.0], &store).unwrap();
    let raw = Executor::new(handle, Duration::from_secs(5))
        .run(&spec, Some(&*snapshot), 64)
        .await
        .unwrap();

    let decoded = decode(&raw, store.hyperparameters()).unwrap();
    assert_eq!(decoded.action, Action::Continuous(3.0));
    assert_eq!(decoded.distribution, vec![64, 0, 0]);
}

#[tokio::test]
async fn refresh_recovers_on_third_attempt() {
    let backend = Arc::new(ScriptedBackend::failing_first(2));
    let handle = BackendHandle::new(backend.clone());

    let outcome = handle.refresh(&fast_policy()).await.unwrap();
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.failures.len(), 2);
    assert!(outcome.failures[0].contains("call 1"));
    assert!(!outcome.fallback);

    // The same flakiness inside an episode does not abort it.
    let backend = Arc::new(ScriptedBackend::failing_first(2));
    let sink = Arc::new(MemorySink::new());
    let settings = HarnessSettings {
        refresh_policy: fast_policy(),
        ..HarnessSettings::new(64)
    };
    let harness = EvaluationHarness::new(
        zero_store(2, 64),
        BackendHandle::new(backend.clone()),
        sink.clone(),
        settings,
    )
    .unwrap();
    let report = harness
        .run_episode(0, ReplayEnvironment::new(zero_trace(2, 3), 0))
        .await;

    assert!(report.status.is_completed(), "{:?}", report.status);
    assert_eq!(report.refreshes, 1);
    assert_eq!(report.refresh_failures, 2);
    assert_eq!(report.fallback_refreshes, 0);
    assert_eq!(report.steps, 2);
    assert_eq!(backend.refreshes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn refresh_gives_up_after_max_attempts() {
    let backend = Arc::new(ScriptedBackend::failing_first(u32::MAX));
    let handle = BackendHandle::new(backend.clone());
    let err = handle.refresh(&fast_policy()).await.unwrap_err();
    assert!(matches!(
        err,
        PolicyError::BackendUnavailable {
            attempts: 3,
            last_good_age: None,
            ..
        }
    ));
    assert_eq!(backend.refreshes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failed_refresh_falls_back_to_last_good_snapshot() {
    let backend = Arc::new(ScriptedBackend::new(1, u32::MAX));
    let handle = BackendHandle::new(backend);

    let first = handle.refresh(&fast_policy()).await.unwrap();
    let second = handle.refresh(&fast_policy()).await.unwrap();
    assert!(second.fallback);
    assert_eq!(second.snapshot.id, first.snapshot.id);
    assert_eq!(second.failures.len(), 3);

    let strict = RefreshPolicy {
        max_snapshot_age: Duration::ZERO,
        ..fast_policy()
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let err = handle.refresh(&strict).await.unwrap_err();
    match err {
        PolicyError::BackendUnavailable { last_good_age, .. } => {
            assert!(last_good_age.is_some());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn fallback_is_recorded_in_episode_and_audit_log() {
    let backend = Arc::new(ScriptedBackend::new(1, u32::MAX));
    let sink = Arc::new(MemorySink::new());
    let settings = HarnessSettings {
        refresh_policy: fast_policy(),
        ..HarnessSettings::new(32)
    };
    let harness = EvaluationHarness::new(
        zero_store(2, 32),
        BackendHandle::new(backend),
        sink.clone(),
        settings,
    )
    .unwrap();

    let reports = harness
        .run(2, |i| Ok(ReplayEnvironment::new(zero_trace(2, 2), i as usize)))
        .await;

    assert!(reports.iter().all(|r| r.status.is_completed()));
    let fallbacks: u32 = reports.iter().map(|r| r.fallback_refreshes).sum();
    assert_eq!(fallbacks, 1);
    assert_eq!(reports[0].snapshot_ids, reports[1].snapshot_ids);
    assert_eq!(
        sink.records().iter().filter(|r| r.fallback_snapshot).count(),
        1
    );
}

#[tokio::test]
async fn short_observation_never_reaches_the_backend() {
    let backend = Arc::new(ScriptedBackend::failing_first(0));
    let sink = Arc::new(MemorySink::new());
    let harness = EvaluationHarness::new(
        zero_store(4, 16),
        BackendHandle::new(backend.clone()),
        sink.clone(),
        HarnessSettings::new(16),
    )
    .unwrap();

    let report = harness
        .run_episode(0, ReplayEnvironment::new(zero_trace(3, 5), 0))
        .await;

    match &report.status {
        EpisodeStatus::Aborted { kind, reason } => {
            assert_eq!(kind, "shape_mismatch");
            assert!(reason.contains("expects 4"));
        }
        EpisodeStatus::Completed => panic!("episode should abort"),
    }
    assert_eq!(backend.runs.load(Ordering::SeqCst), 0);
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn evaluation_writes_audit_log_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let artifact_path = dir.path().join("policy.json");
    let trace_path = dir.path().join("trace.jsonl");
    let audit_path = dir.path().join("logs").join("audit.jsonl");
    let report_path = dir.path().join("report.json");

    let artifact = PolicyArtifact::random(Hyperparameters::new(3, 2, 200, 3), 17)
        .with_metadata("trained_by", "ppo");
    ParameterStore::store(&artifact, &artifact_path).unwrap();
    std::fs::write(
        &trace_path,
        "[0.1, 0.2, 0.3]\n[0.0, -1.0, 2.0]\n{\"observation\": [1.0, 1.0, 1.0], \"reward\": 1.0, \"done\": true}\n\
         [0.5, 0.5, 0.5]\n{\"observation\": [0.0, 0.0, 0.0], \"reward\": 2.0}\n",
    )
    .unwrap();

    let config = EvaluationConfig {
        backend: "fake-5q".into(),
        seed: Some(42),
        artifact: Some(artifact_path),
        trace: Some(trace_path),
        audit_log: Some(audit_path.clone()),
        report: Some(report_path.clone()),
        episodes: 4,
        concurrency: 3,
        ..EvaluationConfig::default()
    };

    let evaluation = Evaluation::prepare(config, &qpolicy_agent::default_registry()).unwrap();
    let args = vec!["qpolicy".to_string(), "evaluate".to_string()];
    let report = evaluation.run(&args).await.unwrap();

    assert_eq!(report.episodes.len(), 4);
    assert_eq!(report.summary.completed, 4);
    assert_eq!(report.summary.total_steps, 2 + 1 + 2 + 1);
    assert_eq!(report.summary.mean_reward, Some(1.5));
    let std = report.summary.reward_std.unwrap();
    assert!((std - (1.0f64 / 3.0).sqrt()).abs() < 1e-12);
    let ci = report.summary.reward_ci.unwrap();
    assert_eq!(ci.confidence, 0.95);
    assert!(ci.low < 1.5 && ci.high > 1.5);
    assert_eq!(report.reproducibility.seed, Some(42));
    assert_eq!(
        report.reproducibility.artifact_fingerprint,
        evaluation.store().fingerprint()
    );

    let records = read_jsonl(&audit_path).unwrap();
    assert_eq!(records.len() as u64, report.summary.total_steps);
    for record in &records {
        assert_eq!(record.counts.total_shots(), 200);
        let episode = &report.episodes[record.episode as usize];
        assert!(episode.snapshot_ids.contains(&record.snapshot_id));
    }
    assert!(report_path.exists());
}

/// Audit log of one seeded evaluation, ordered by (episode, step).
async fn seeded_audit_log(dir: &std::path::Path, run: &str) -> Vec<(u32, u32, Counts)> {
    let artifact_path = dir.join("policy.json");
    let trace_path = dir.join("trace.jsonl");
    if !artifact_path.exists() {
        let artifact = PolicyArtifact::random(Hyperparameters::new(3, 2, 128, 4), 9);
        ParameterStore::store(&artifact, &artifact_path).unwrap();
        std::fs::write(
            &trace_path,
            "[0.3, -0.2, 0.9]\n[1.1, 0.4, -0.6]\n[0.0, 2.0, 0.5]\n\
             {\"observation\": [0.7, 0.7, -1.0], \"reward\": 1.0, \"done\": true}\n\
             [-0.5, 0.1, 0.2]\n[0.9, -0.9, 0.3]\n{\"observation\": [0.2, 0.2, 0.2], \"reward\": 0.5}\n",
        )
        .unwrap();
    }
    let audit_path = dir.join(format!("{run}.jsonl"));

    let mut backend_options = serde_json::Map::new();
    backend_options.insert("run_latency_ms".into(), serde_json::json!(1));
    let config = EvaluationConfig {
        backend: "fake-5q".into(),
        seed: Some(42),
        backend_options,
        artifact: Some(artifact_path),
        trace: Some(trace_path),
        audit_log: Some(audit_path.clone()),
        episodes: 8,
        concurrency: 4,
        ..EvaluationConfig::default()
    };
    let evaluation = Evaluation::prepare(config, &qpolicy_agent::default_registry()).unwrap();
    let report = evaluation.run(&[]).await.unwrap();
    assert_eq!(report.summary.completed, 8);

    let mut rows: Vec<_> = read_jsonl(&audit_path)
        .unwrap()
        .into_iter()
        .map(|r| (r.episode, r.step, r.counts))
        .collect();
    rows.sort_by_key(|(episode, step, _)| (*episode, *step));
    rows
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn seeded_concurrent_runs_are_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let first = seeded_audit_log(dir.path(), "first").await;
    let second = seeded_audit_log(dir.path(), "second").await;

    assert_eq!(first.len(), 4 * 3 + 4 * 2);
    assert_eq!(first, second);
    // Episodes replaying the same recorded trace still sample differently.
    let episode = |e: u32| -> Vec<&Counts> {
        first.iter().filter(|r| r.0 == e).map(|r| &r.2).collect()
    };
    assert_ne!(episode(0), episode(2));
}

#[tokio::test]
async fn evaluation_requires_artifact_and_trace() {
    let err = Evaluation::prepare(
        EvaluationConfig::default(),
        &qpolicy_agent::default_registry(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, PolicyError::Config(_)));
}
