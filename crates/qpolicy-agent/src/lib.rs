//! Calibration-aware evaluation of variational quantum RL policies.
//!
//! A trained policy is a parameter vector for a fixed circuit ansatz. At
//! evaluation time every environment step turns into one circuit execution:
//!
//! ```text
//! observation ──► CircuitBuilder ──► Executor ──► decode ──► Action ──► env
//!                                       ▲                     │
//!                    CalibrationSnapshot│                     ▼
//!                                       │               ResultLogger
//!                              BackendHandle::refresh
//! ```
//!
//! # Components
//!
//! - [`ParameterStore`]: loads and validates the policy artifact
//! - [`BackendHandle`]: backend connection with retrying calibration refresh
//! - [`CircuitBuilder`]: binds an observation into the policy circuit
//! - [`Executor`]: runs a circuit under a calibration snapshot
//! - [`decode`]: turns measurement counts into an [`Action`]
//! - [`ResultLogger`]: append-only audit log of raw results
//! - [`EvaluationHarness`]: runs episodes, concurrently if asked
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use qpolicy_agent::*;
//! use qpolicy_hal::BackendConfig;
//!
//! let registry = default_registry();
//! let store = Arc::new(ParameterStore::load("policy.json".as_ref())?);
//! let handle = connect(&registry, "fake-5q", BackendConfig::default())?;
//! let settings = HarnessSettings::new(store.hyperparameters().shot_count);
//! let harness = EvaluationHarness::new(store, handle, Arc::new(NullSink), settings)?;
//!
//! let trace = Arc::new(Trace::load("trace.jsonl".as_ref())?);
//! let reports = harness
//!     .run(4, |i| Ok(ReplayEnvironment::new(trace.clone(), i as usize)))
//!     .await;
//! ```

pub mod builder;
pub mod config;
pub mod decoder;
pub mod env;
pub mod error;
pub mod executor;
pub mod harness;
pub mod logger;
pub mod params;
pub mod provider;
pub mod report;
pub mod session;

pub use builder::{CircuitBuilder, CircuitSpec, build, encode_angle};
pub use config::{EvaluationConfig, RefreshConfig};
pub use decoder::{Action, Decoded, bucket_of, decode};
pub use env::{Environment, ReplayEnvironment, Trace, TraceEntry, Transition};
pub use error::{PolicyError, PolicyResult};
pub use executor::{Executor, RawResult};
pub use harness::{EpisodeCallback, EvaluationHarness, HarnessSettings};
pub use logger::{
    AuditRecord, AuditSink, JsonlSink, MemorySink, NullSink, ResultLogger, read_jsonl,
};
pub use params::{
    ANSATZ_ID, ActionSpace, EntanglementPattern, FORMAT_VERSION, Hyperparameters, ParameterStore,
    PolicyArtifact,
};
pub use provider::{
    BackendHandle, EpisodeBackends, RefreshCadence, RefreshOutcome, RefreshPolicy, connect,
    default_registry, episode_seed, seeded_backends,
};
pub use report::{
    ConfidenceInterval, DEFAULT_CONFIDENCE, EpisodeReport, EpisodeStatus, EvaluationReport,
    ReproducibilityInfo, Summary,
};
pub use session::Evaluation;
