//! Calibration command implementation.

use std::path::Path;

use anyhow::Result;
use console::style;

use qpolicy_agent::{RefreshPolicy, connect, default_registry};
use qpolicy_hal::BackendConfig;

use super::common::print_snapshot;

/// Execute the calibration command.
pub async fn execute(
    backend: &str,
    device_file: Option<&Path>,
    seed: Option<u64>,
    as_json: bool,
) -> Result<()> {
    let mut config = BackendConfig::new(backend);
    if let Some(path) = device_file {
        config = config.with_device_file(path);
    }
    if let Some(seed) = seed {
        config = config.with_seed(seed);
    }

    let handle = connect(&default_registry(), backend, config)?;
    if !as_json {
        eprintln!(
            "{} Refreshing calibration of {}",
            style("→").cyan().bold(),
            style(backend).yellow()
        );
    }

    let outcome = handle.refresh(&RefreshPolicy::default()).await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(outcome.snapshot.as_ref())?);
        return Ok(());
    }

    if outcome.attempts > 1 {
        eprintln!(
            "  {} succeeded after {} attempts",
            style("!").yellow().bold(),
            outcome.attempts
        );
    }
    print_snapshot(&outcome.snapshot);
    Ok(())
}
