//! Backend connection and calibration refresh.
//!
//! [`connect`] resolves a backend identifier into a [`BackendHandle`]. The
//! handle remembers the last snapshot that was fetched successfully, so a
//! failed [`BackendHandle::refresh`] can fall back to it while it is still
//! fresh enough.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use qpolicy_hal::{Backend, BackendConfig, BackendRegistry, CalibrationSnapshot, Capabilities};

use crate::error::{PolicyError, PolicyResult};

/// Retry and fallback rules for calibration refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Attempts before falling back.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Deadline of a single attempt.
    pub timeout: Duration,
    /// Oldest last-good snapshot that may stand in for a failed refresh.
    pub max_snapshot_age: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(200),
            timeout: Duration::from_secs(10),
            max_snapshot_age: Duration::from_secs(900),
        }
    }
}

/// When an episode pulls fresh calibration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshCadence {
    /// Once at the start of every episode.
    #[default]
    PerEpisode,
    /// At the start of every episode and then every `n` steps.
    EverySteps(u32),
}

impl RefreshCadence {
    /// Whether a refresh is due before `step` (zero-based) of an episode.
    pub fn is_due(self, step: u32) -> bool {
        match self {
            RefreshCadence::PerEpisode => step == 0,
            RefreshCadence::EverySteps(n) => step == 0 || (n > 0 && step % n == 0),
        }
    }
}

/// What a refresh handed out and how it got there.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    /// Snapshot to execute under.
    pub snapshot: Arc<CalibrationSnapshot>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Messages of the failed attempts.
    pub failures: Vec<String>,
    /// Whether `snapshot` is the last good one rather than a new fetch.
    pub fallback: bool,
}

/// Cheap-to-clone connection to a backend.
#[derive(Clone)]
pub struct BackendHandle {
    backend: Arc<dyn Backend>,
    last_good: Arc<Mutex<Option<Arc<CalibrationSnapshot>>>>,
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("backend", &self.backend.name())
            .field("last_good", &self.last_good().map(|s| s.id))
            .finish()
    }
}

/// Registry with every built-in backend.
pub fn default_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    qpolicy_adapter_sim::register(&mut registry);
    registry
}

/// Resolve `identifier` through `registry`.
pub fn connect(
    registry: &BackendRegistry,
    identifier: &str,
    config: BackendConfig,
) -> PolicyResult<BackendHandle> {
    let backend = registry
        .create(identifier, config)
        .map_err(|e| PolicyError::BackendUnavailable {
            backend: identifier.into(),
            attempts: 0,
            last_good_age: None,
            reason: e.to_string(),
        })?;
    debug!(backend = identifier, "Connected to backend");
    Ok(BackendHandle::new(backend))
}

/// Builds the backend an episode runs on from its index.
pub type EpisodeBackends = Arc<dyn Fn(u32) -> PolicyResult<BackendHandle> + Send + Sync>;

/// Seed of episode `episode` in a run seeded with `seed`.
pub fn episode_seed(seed: u64, episode: u32) -> u64 {
    seed ^ u64::from(episode).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// A fresh backend per episode, seeded with [`episode_seed`].
///
/// Sampling and calibration drift of an episode then depend only on its
/// index, not on how concurrent episodes interleave. Episodes do not share
/// a last-good snapshot.
pub fn seeded_backends(
    registry: BackendRegistry,
    identifier: impl Into<String>,
    config: BackendConfig,
    seed: u64,
) -> EpisodeBackends {
    let identifier = identifier.into();
    Arc::new(move |episode| {
        let config = config.clone().with_seed(episode_seed(seed, episode));
        connect(&registry, &identifier, config)
    })
}

impl BackendHandle {
    /// Wrap an already constructed backend.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            last_good: Arc::new(Mutex::new(None)),
        }
    }

    /// Backend name.
    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// The backend itself.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Backend capabilities.
    pub fn capabilities(&self) -> &Capabilities {
        self.backend.capabilities()
    }

    /// Last snapshot fetched successfully through this handle.
    pub fn last_good(&self) -> Option<Arc<CalibrationSnapshot>> {
        self.last_good
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember(&self, snapshot: Arc<CalibrationSnapshot>) {
        *self.last_good.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    /// Fetch new calibration, retrying and falling back per `policy`.
    ///
    /// Every attempt runs under `policy.timeout`. After `max_attempts`
    /// failures the last good snapshot is handed out if it is younger than
    /// `max_snapshot_age` and not expired; otherwise the call fails with
    /// [`PolicyError::BackendUnavailable`] carrying that snapshot's age.
    #[instrument(skip_all, fields(backend = %self.name()))]
    pub async fn refresh(&self, policy: &RefreshPolicy) -> PolicyResult<RefreshOutcome> {
        let max_attempts = policy.max_attempts.max(1);
        let mut failures = Vec::new();

        for attempt in 1..=max_attempts {
            let failure = match tokio::time::timeout(policy.timeout, self.backend.refresh()).await {
                Ok(Ok(snapshot)) => match self.accept(snapshot) {
                    Ok(snapshot) => {
                        info!(
                            attempt,
                            snapshot = %snapshot.id,
                            "Calibration refreshed"
                        );
                        return Ok(RefreshOutcome {
                            snapshot,
                            attempts: attempt,
                            failures,
                            fallback: false,
                        });
                    }
                    Err(e) => e.to_string(),
                },
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("refresh timed out after {:?}", policy.timeout),
            };

            warn!(attempt, max_attempts, error = %failure, "Calibration refresh failed");
            failures.push(failure);

            if attempt < max_attempts && !policy.retry_delay.is_zero() {
                tokio::time::sleep(policy.retry_delay).await;
            }
        }

        let last_good = self.last_good();
        let reason = failures.last().cloned().unwrap_or_default();
        match last_good {
            Some(snapshot)
                if snapshot.age() <= policy.max_snapshot_age && !snapshot.is_expired() =>
            {
                warn!(
                    snapshot = %snapshot.id,
                    age_secs = snapshot.age().as_secs(),
                    "Falling back to last good calibration"
                );
                Ok(RefreshOutcome {
                    snapshot,
                    attempts: max_attempts,
                    failures,
                    fallback: true,
                })
            }
            last_good => Err(PolicyError::BackendUnavailable {
                backend: self.name().to_string(),
                attempts: max_attempts,
                last_good_age: last_good.map(|s| s.age()),
                reason,
            }),
        }
    }

    fn accept(&self, snapshot: CalibrationSnapshot) -> PolicyResult<Arc<CalibrationSnapshot>> {
        snapshot.validate()?;
        if snapshot.backend != self.name() {
            return Err(PolicyError::StaleCalibration(format!(
                "refresh of '{}' returned a snapshot of '{}'",
                self.name(),
                snapshot.backend
            )));
        }
        let snapshot = Arc::new(snapshot);
        self.remember(Arc::clone(&snapshot));
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qpolicy_adapter_sim::SimulatorBackend;

    #[test]
    fn test_cadence() {
        assert!(RefreshCadence::PerEpisode.is_due(0));
        assert!(!RefreshCadence::PerEpisode.is_due(5));
        let every = RefreshCadence::EverySteps(3);
        assert!(every.is_due(0));
        assert!(!every.is_due(2));
        assert!(every.is_due(3));
        assert!(every.is_due(6));
        assert!(!RefreshCadence::EverySteps(0).is_due(4));
    }

    #[test]
    fn test_connect_unknown_backend() {
        let err = connect(&default_registry(), "ibm_torino", BackendConfig::default()).unwrap_err();
        assert!(matches!(err, PolicyError::BackendUnavailable { attempts: 0, .. }));
    }

    #[tokio::test]
    async fn test_refresh_remembers_snapshot() {
        let handle = connect(&default_registry(), "fake-5q", BackendConfig::default().with_seed(1)).unwrap();
        assert!(handle.last_good().is_none());
        let outcome = handle.refresh(&RefreshPolicy::default()).await.unwrap();
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.fallback);
        assert_eq!(handle.last_good().unwrap().id, outcome.snapshot.id);

        let again = handle.refresh(&RefreshPolicy::default()).await.unwrap();
        assert_ne!(again.snapshot.id, outcome.snapshot.id);
    }

    #[test]
    fn test_episode_seeds_are_distinct() {
        assert_eq!(episode_seed(42, 0), 42);
        let seeds: std::collections::HashSet<u64> = (0..64).map(|e| episode_seed(42, e)).collect();
        assert_eq!(seeds.len(), 64);
    }

    #[tokio::test]
    async fn test_seeded_backends_replay_calibration() {
        let backends = seeded_backends(default_registry(), "fake-5q", BackendConfig::default(), 7);
        let first = backends(3).unwrap().refresh(&RefreshPolicy::default()).await.unwrap();
        let other = backends(4).unwrap().refresh(&RefreshPolicy::default()).await.unwrap();
        let again = backends(3).unwrap().refresh(&RefreshPolicy::default()).await.unwrap();

        assert_eq!(first.snapshot.qubits, again.snapshot.qubits);
        assert_ne!(first.snapshot.qubits, other.snapshot.qubits);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_timeout_without_fallback() {
        let backend = SimulatorBackend::new().with_refresh_latency(Duration::from_secs(60));
        let handle = BackendHandle::new(Arc::new(backend));
        let policy = RefreshPolicy {
            max_attempts: 2,
            retry_delay: Duration::from_millis(10),
            timeout: Duration::from_secs(1),
            ..RefreshPolicy::default()
        };
        let err = handle.refresh(&policy).await.unwrap_err();
        match err {
            PolicyError::BackendUnavailable {
                attempts,
                last_good_age,
                ref reason,
                ..
            } => {
                assert_eq!(attempts, 2);
                assert!(last_good_age.is_none());
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
