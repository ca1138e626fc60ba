//! Inspect command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use serde_json::json;

use qpolicy_agent::{ActionSpace, CircuitBuilder, ParameterStore};

/// Execute the inspect command.
pub fn execute(artifact: &Path, as_json: bool) -> Result<()> {
    let store = ParameterStore::load(artifact)
        .with_context(|| format!("Failed to load {}", artifact.display()))?;
    let h = store.hyperparameters();
    let builder = CircuitBuilder::new(h)?;
    let template = builder.template();
    let (min, max, mean) = parameter_stats(store.parameters());

    if as_json {
        let summary = json!({
            "artifact": artifact.display().to_string(),
            "fingerprint": store.fingerprint(),
            "format_version": store.artifact().format_version,
            "ansatz": store.artifact().ansatz,
            "hyperparameters": h,
            "parameter_count": store.parameters().len(),
            "parameter_range": [min, max],
            "parameter_mean": mean,
            "circuit": {
                "qubits": template.num_qubits(),
                "gates": template.gate_count(),
                "depth": template.depth(),
            },
            "metadata": store.metadata(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{} {} ({})",
        style("Policy").cyan().bold(),
        style(artifact.display()).green(),
        style(&store.artifact().ansatz).dim()
    );
    println!("  Fingerprint:  {}", style(store.fingerprint()).dim());
    println!("  Qubits:       {}", h.qubit_count);
    println!("  Depth:        {}", h.circuit_depth);
    println!("  Entanglement: {}", h.entanglement_pattern);
    println!("  Shots:        {}", h.shot_count);
    match h.action_space {
        ActionSpace::Discrete => println!("  Actions:      {} discrete", h.action_space_size),
        ActionSpace::Continuous { low, high } => {
            println!("  Actions:      continuous in [{low}, {high}]");
        }
    }
    println!(
        "  Parameters:   {} (min {:.4}, max {:.4}, mean {:.4})",
        store.parameters().len(),
        min,
        max,
        mean
    );
    println!(
        "  Circuit:      {} gates, depth {}",
        template.gate_count(),
        template.depth()
    );

    if !store.metadata().is_empty() {
        println!();
        println!("{}", style("Metadata").bold().underlined());
        for (key, value) in store.metadata() {
            println!("  {key}: {value}");
        }
    }
    Ok(())
}

/// Minimum, maximum and mean of `values`; zeros when empty.
pub fn parameter_stats(values: &[f64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (min, max, mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_stats() {
        assert_eq!(parameter_stats(&[]), (0.0, 0.0, 0.0));
        assert_eq!(parameter_stats(&[-1.0, 0.5, 3.5]), (-1.0, 3.5, 1.0));
    }
}
