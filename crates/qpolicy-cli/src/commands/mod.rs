//! CLI command implementations.

pub mod backends;
pub mod calibration;
pub mod common;
pub mod evaluate;
pub mod init;
pub mod inspect;
pub mod version;
