//! Calibration-aware statevector simulator.
//!
//! This crate provides a local backend for policy evaluation. It simulates
//! circuits exactly and then applies the noise described by the calibration
//! snapshot it is given, so a run is only as clean as the snapshot says the
//! device is.
//!
//! # Device sources
//!
//! | Identifier | Device | Refresh behaviour |
//! |------------|--------|-------------------|
//! | `simulator`, `sim` | noiseless, all-to-all | unchanged |
//! | `fake-5q` | 5-qubit ring with realistic noise | drifts a little every refresh |
//! | any name with `device_file` set | JSON description | file re-read every refresh |
//!
//! # Example
//!
//! ```ignore
//! use qpolicy_adapter_sim::SimulatorBackend;
//! use qpolicy_hal::Backend;
//! use qpolicy_ir::Circuit;
//!
//! let backend = SimulatorBackend::new().with_seed(7);
//! let snapshot = backend.refresh().await?;
//! let result = backend.run(&Circuit::bell()?, &snapshot, 1000).await?;
//! assert_eq!(result.snapshot_id, snapshot.id);
//! ```

mod device;
mod simulator;
mod statevector;

use qpolicy_hal::BackendRegistry;

pub use device::DeviceDescription;
pub use simulator::SimulatorBackend;

/// Identifiers served by [`SimulatorBackend`].
pub const BACKEND_NAMES: [&str; 3] = ["simulator", "sim", "fake-5q"];

/// Register every simulator identifier in `registry`.
pub fn register(registry: &mut BackendRegistry) {
    for name in BACKEND_NAMES {
        registry.register::<SimulatorBackend>(name);
    }
}
