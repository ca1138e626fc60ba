//! Calibration-aware hardware abstraction layer.
//!
//! This crate defines the two-operation backend contract that policy
//! evaluation depends on:
//!
//! - [`Backend::refresh`] pulls a new [`CalibrationSnapshot`]
//! - [`Backend::run`] executes a bound circuit under a snapshot and returns
//!   an [`ExecutionResult`] attributed to that snapshot
//!
//! Backends are resolved by identifier through a [`BackendRegistry`].

pub mod backend;
pub mod calibration;
pub mod capability;
pub mod error;
pub mod registry;
pub mod result;

pub use backend::{Backend, BackendConfig, BackendFactory, ValidationResult};
pub use calibration::{CalibrationSnapshot, EdgeCalibration, QubitCalibration, SnapshotId};
pub use capability::{Capabilities, GateSet, NoiseProfile, Topology, TopologyKind};
pub use error::{HalError, HalResult};
pub use registry::BackendRegistry;
pub use result::{Counts, ExecutionResult};
