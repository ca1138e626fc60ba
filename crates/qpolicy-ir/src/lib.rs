//! Circuit intermediate representation for quantum policy circuits.
//!
//! A policy circuit is built once as a symbolic template and bound to
//! concrete angles for every environment step. This crate provides the
//! data structures for both stages.
//!
//! # Core Components
//!
//! - **Qubits and Classical Bits**: [`QubitId`], [`ClbitId`]
//! - **Gates**: [`Gate`], the ansatz rotations, CX and the Paulis
//! - **Parameters**: [`ParameterExpression`] for symbolic angles such as `theta[3]`
//! - **Instructions**: [`Instruction`] combining gates with their operands
//! - **Circuit**: [`Circuit`] validated builder API with depth and fingerprinting
//!
//! # Example: Binding a Template
//!
//! ```rust
//! use qpolicy_ir::{Circuit, ParameterExpression, QubitId};
//! use rustc_hash::FxHashMap;
//!
//! let mut template = Circuit::with_size("policy", 1, 1);
//! template
//!     .ry(ParameterExpression::indexed("theta", 0), QubitId(0))
//!     .unwrap()
//!     .measure_all()
//!     .unwrap();
//!
//! let mut values = FxHashMap::default();
//! values.insert("theta[0]".to_string(), 0.5);
//!
//! let bound = template.bind_parameters(&values).unwrap();
//! assert!(!bound.is_parameterized());
//! assert_eq!(bound.fingerprint().len(), 32);
//! ```

pub mod circuit;
pub mod error;
pub mod fingerprint;
pub mod gate;
pub mod instruction;
pub mod parameter;
pub mod qubit;

pub use circuit::Circuit;
pub use error::{IrError, IrResult};
pub use fingerprint::content_fingerprint;
pub use gate::Gate;
pub use instruction::{Instruction, InstructionKind};
pub use parameter::{ParameterExpression, indexed_name};
pub use qubit::{ClbitId, QubitId};
