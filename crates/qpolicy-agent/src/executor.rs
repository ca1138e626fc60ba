//! Circuit execution under a calibration snapshot.

use std::time::Duration;

use tracing::{debug, instrument};

use qpolicy_hal::{CalibrationSnapshot, ExecutionResult, ValidationResult};

use crate::builder::CircuitSpec;
use crate::error::{PolicyError, PolicyResult};
use crate::provider::BackendHandle;

/// Measurement counts of one step, attributed to a snapshot.
pub type RawResult = ExecutionResult;

/// Runs policy circuits on a backend.
#[derive(Debug, Clone)]
pub struct Executor {
    handle: BackendHandle,
    timeout: Duration,
}

impl Executor {
    /// Create an executor whose runs time out after `timeout`.
    pub fn new(handle: BackendHandle, timeout: Duration) -> Self {
        Self { handle, timeout }
    }

    /// The backend this executor submits to.
    pub fn handle(&self) -> &BackendHandle {
        &self.handle
    }

    /// Run `spec` for `shots` shots under `snapshot`.
    ///
    /// Nothing is submitted unless the shot count is positive and within the
    /// backend limit, and the snapshot is set, unexpired and belongs to this
    /// backend.
    #[instrument(skip_all, fields(backend = %self.handle.name(), shots = shots))]
    pub async fn run(
        &self,
        spec: &CircuitSpec,
        snapshot: Option<&CalibrationSnapshot>,
        shots: u32,
    ) -> PolicyResult<RawResult> {
        let snapshot = self.check(spec, snapshot, shots)?;
        let backend = self.handle.backend();

        let raw = tokio::time::timeout(self.timeout, backend.run(&spec.circuit, snapshot, shots))
            .await
            .map_err(|_| PolicyError::ExecutionTimeout {
                backend: self.handle.name().to_string(),
                timeout: self.timeout,
            })??;

        if raw.snapshot_id != snapshot.id {
            return Err(PolicyError::MalformedResult(format!(
                "result attributed to snapshot {} but ran under {}",
                raw.snapshot_id, snapshot.id
            )));
        }
        if !raw.is_consistent() || raw.shots != shots {
            return Err(PolicyError::MalformedResult(format!(
                "counts sum to {} for {shots} shots",
                raw.counts.total_shots()
            )));
        }

        debug!(
            circuit = %spec.fingerprint,
            outcomes = raw.counts.len(),
            elapsed_ms = raw.execution_time_ms,
            "Execution finished"
        );
        Ok(raw)
    }

    fn check<'a>(
        &self,
        spec: &CircuitSpec,
        snapshot: Option<&'a CalibrationSnapshot>,
        shots: u32,
    ) -> PolicyResult<&'a CalibrationSnapshot> {
        if shots == 0 {
            return Err(PolicyError::InvalidShotCount(
                "shot count must be positive".into(),
            ));
        }
        let max_shots = self.handle.capabilities().max_shots;
        if shots > max_shots {
            return Err(PolicyError::InvalidShotCount(format!(
                "{shots} shots exceed the backend limit of {max_shots}"
            )));
        }

        let snapshot = snapshot.ok_or_else(|| {
            PolicyError::StaleCalibration("no calibration snapshot has been fetched".into())
        })?;
        if snapshot.backend != self.handle.name() {
            return Err(PolicyError::StaleCalibration(format!(
                "snapshot {} belongs to '{}', not '{}'",
                snapshot.id,
                snapshot.backend,
                self.handle.name()
            )));
        }
        if snapshot.is_expired() {
            return Err(PolicyError::StaleCalibration(format!(
                "snapshot {} is {}s old, valid for {}s",
                snapshot.id,
                snapshot.age().as_secs(),
                snapshot.valid_for.as_secs()
            )));
        }

        if let ValidationResult::Invalid { reasons } = self.handle.backend().validate(&spec.circuit)
        {
            return Err(PolicyError::IncompatibleCircuit(reasons));
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{Duration as ChronoDuration, Utc};
    use qpolicy_adapter_sim::SimulatorBackend;
    use qpolicy_hal::Backend;

    use crate::builder::build;
    use crate::params::Hyperparameters;

    fn spec() -> CircuitSpec {
        let h = Hyperparameters::new(2, 1, 10, 2);
        build(&[0.0, 0.0], &vec![0.0; h.parameter_count()], &h).unwrap()
    }

    fn executor(backend: SimulatorBackend) -> Executor {
        Executor::new(
            BackendHandle::new(Arc::new(backend)),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_run_attributes_snapshot() {
        let exec = executor(SimulatorBackend::new().with_seed(3));
        let snapshot = exec.handle().backend().refresh().await.unwrap();
        let raw = exec.run(&spec(), Some(&snapshot), 64).await.unwrap();
        assert_eq!(raw.snapshot_id, snapshot.id);
        assert_eq!(raw.counts.get("00"), 64);
    }

    #[tokio::test]
    async fn test_rejects_zero_shots() {
        let exec = executor(SimulatorBackend::new());
        let snapshot = exec.handle().backend().refresh().await.unwrap();
        let err = exec.run(&spec(), Some(&snapshot), 0).await.unwrap_err();
        assert!(matches!(err, PolicyError::InvalidShotCount(_)));
        let err = exec.run(&spec(), Some(&snapshot), 1_000_000).await.unwrap_err();
        assert!(matches!(err, PolicyError::InvalidShotCount(_)));
    }

    #[tokio::test]
    async fn test_rejects_unset_and_expired_snapshot() {
        let exec = executor(SimulatorBackend::new());
        let err = exec.run(&spec(), None, 10).await.unwrap_err();
        assert!(matches!(err, PolicyError::StaleCalibration(_)));

        let snapshot = exec
            .handle()
            .backend()
            .refresh()
            .await
            .unwrap()
            .with_fetched_at(Utc::now() - ChronoDuration::hours(2));
        let err = exec.run(&spec(), Some(&snapshot), 10).await.unwrap_err();
        assert!(matches!(err, PolicyError::StaleCalibration(ref m) if m.contains("valid for")));
    }

    #[tokio::test]
    async fn test_rejects_foreign_snapshot() {
        let exec = executor(SimulatorBackend::new());
        let other = SimulatorBackend::with_device(
            "elsewhere",
            qpolicy_adapter_sim::DeviceDescription::ideal(2),
        );
        let snapshot = other.refresh().await.unwrap();
        let err = exec.run(&spec(), Some(&snapshot), 10).await.unwrap_err();
        assert!(matches!(err, PolicyError::StaleCalibration(ref m) if m.contains("elsewhere")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timeout() {
        let exec = Executor::new(
            BackendHandle::new(Arc::new(
                SimulatorBackend::new().with_run_latency(Duration::from_secs(30)),
            )),
            Duration::from_secs(1),
        );
        let snapshot = exec.handle().backend().refresh().await.unwrap();
        let err = exec.run(&spec(), Some(&snapshot), 10).await.unwrap_err();
        assert!(matches!(err, PolicyError::ExecutionTimeout { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_rejects_uncoupled_pairs() {
        let backend = SimulatorBackend::with_device(
            "fake-5q",
            qpolicy_adapter_sim::DeviceDescription::fake_5q(),
        );
        let exec = executor(backend);
        let h = Hyperparameters::new(5, 1, 10, 2)
            .with_entanglement(crate::params::EntanglementPattern::Full);
        let spec = build(&[0.0; 5], &vec![0.0; h.parameter_count()], &h).unwrap();
        let snapshot = exec.handle().backend().refresh().await.unwrap();
        let err = exec.run(&spec, Some(&snapshot), 10).await.unwrap_err();
        assert!(matches!(err, PolicyError::IncompatibleCircuit(_)));
    }
}
