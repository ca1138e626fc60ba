//! Shared helpers for CLI commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use console::style;

use qpolicy_agent::EvaluationConfig;
use qpolicy_hal::CalibrationSnapshot;

/// Default configuration file (`<config dir>/qpolicy/config.yaml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("qpolicy").join("config.yaml"))
}

/// Load configuration from `path`, or from the default location if it
/// exists, then apply `QPOLICY_*` environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<EvaluationConfig> {
    let mut config = match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            EvaluationConfig::from_file(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?
        }
        None => match default_config_path().filter(|p| p.exists()) {
            Some(default) => EvaluationConfig::from_file(&default)
                .with_context(|| format!("Failed to load config: {}", default.display()))?,
            None => EvaluationConfig::default(),
        },
    };
    config.apply_env()?;
    Ok(config)
}

/// Parse `LOW,HIGH` action bounds.
pub fn parse_bounds(text: &str) -> Result<(f64, f64)> {
    let (low, high) = text
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("Expected bounds as LOW,HIGH, got '{text}'"))?;
    let low: f64 = low
        .trim()
        .parse()
        .with_context(|| format!("Invalid lower bound '{low}'"))?;
    let high: f64 = high
        .trim()
        .parse()
        .with_context(|| format!("Invalid upper bound '{high}'"))?;
    if !low.is_finite() || !high.is_finite() || low >= high {
        anyhow::bail!("Lower bound {low} must be below upper bound {high}");
    }
    Ok((low, high))
}

/// Print a calibration snapshot as a table.
pub fn print_snapshot(snapshot: &CalibrationSnapshot) {
    println!(
        "\n{} Calibration {} ({})",
        style("✓").green().bold(),
        style(snapshot.id).dim(),
        style(&snapshot.backend).yellow()
    );
    println!("  Fetched:   {}", snapshot.fetched_at.to_rfc3339());
    println!("  Valid for: {}s", snapshot.valid_for.as_secs());
    println!();
    println!(
        "  {:>5} {:>9} {:>9} {:>10} {:>9} {:>9}",
        "qubit", "T1 (μs)", "T2 (μs)", "gate err", "p(1|0)", "p(0|1)"
    );
    for (index, qubit) in snapshot.qubits.iter().enumerate() {
        println!(
            "  {:>5} {:>9.1} {:>9.1} {:>10.2e} {:>9.4} {:>9.4}",
            style(index).cyan(),
            qubit.t1,
            qubit.t2,
            qubit.gate_error,
            qubit.readout_p01,
            qubit.readout_p10
        );
    }

    if !snapshot.edges.is_empty() {
        println!();
        for edge in &snapshot.edges {
            println!(
                "  {}-{}: two-qubit error {:.2e}",
                edge.qubits.0, edge.qubits.1, edge.gate_error
            );
        }
    }
    println!(
        "  Default two-qubit error: {:.2e}",
        snapshot.default_two_qubit_error
    );
}
