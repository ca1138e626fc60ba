//! Init command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use console::style;

use qpolicy_agent::{EntanglementPattern, Hyperparameters, ParameterStore, PolicyArtifact};

use super::common::parse_bounds;

/// Arguments of `qpolicy init`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Output file
    #[arg(short, long, default_value = "policy.json")]
    pub output: PathBuf,

    /// Number of qubits (observation width)
    #[arg(short, long)]
    pub qubits: u32,

    /// Number of ansatz layers
    #[arg(short, long, default_value = "2")]
    pub depth: u32,

    /// Shots per step
    #[arg(short, long, default_value = "1024")]
    pub shots: u32,

    /// Number of discrete actions
    #[arg(short, long, default_value = "2")]
    pub actions: u32,

    /// Continuous action bounds as LOW,HIGH (replaces discrete actions)
    #[arg(long, allow_hyphen_values = true)]
    pub continuous: Option<String>,

    /// Entanglement pattern (linear, circular, full)
    #[arg(long, default_value = "linear")]
    pub entanglement: String,

    /// Draw parameters uniformly from [-π, π) with this seed instead of zeros
    #[arg(long)]
    pub seed: Option<u64>,

    /// Overwrite an existing file
    #[arg(short, long)]
    pub force: bool,
}

/// Build the artifact described by `args`.
pub fn build_artifact(args: &InitArgs) -> Result<PolicyArtifact> {
    let pattern: EntanglementPattern = args.entanglement.parse()?;
    let mut hyperparameters =
        Hyperparameters::new(args.qubits, args.depth, args.shots, args.actions)
            .with_entanglement(pattern);
    if let Some(bounds) = &args.continuous {
        let (low, high) = parse_bounds(bounds)?;
        hyperparameters = hyperparameters.with_continuous_actions(low, high);
    }
    hyperparameters
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid hyperparameters: {e}"))?;

    let artifact = match args.seed {
        Some(seed) => PolicyArtifact::random(hyperparameters, seed).with_metadata("seed", seed),
        None => PolicyArtifact::zeros(hyperparameters),
    };
    Ok(artifact.with_metadata("created_by", format!("qpolicy {}", env!("CARGO_PKG_VERSION"))))
}

/// Execute the init command.
pub fn execute(args: &InitArgs) -> Result<()> {
    if args.output.exists() && !args.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            args.output.display()
        );
    }

    let artifact = build_artifact(args)?;
    ParameterStore::store(&artifact, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    let fingerprint = artifact.fingerprint()?;

    println!(
        "{} Wrote {} ({} parameters, {})",
        style("✓").green().bold(),
        style(args.output.display()).green(),
        artifact.parameters.len(),
        if args.seed.is_some() { "random" } else { "zeros" }
    );
    println!("  Fingerprint: {}", style(fingerprint).dim());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qpolicy_agent::ActionSpace;

    fn args(qubits: u32) -> InitArgs {
        InitArgs {
            output: PathBuf::from("policy.json"),
            qubits,
            depth: 2,
            shots: 128,
            actions: 2,
            continuous: None,
            entanglement: "linear".into(),
            seed: None,
            force: false,
        }
    }

    #[test]
    fn test_zero_artifact() {
        let artifact = build_artifact(&args(3)).unwrap();
        assert_eq!(artifact.parameters.len(), 12);
        assert!(artifact.parameters.iter().all(|&p| p == 0.0));
        assert!(artifact.metadata.contains_key("created_by"));
    }

    #[test]
    fn test_seeded_artifact_is_reproducible() {
        let seeded = InitArgs {
            seed: Some(5),
            entanglement: "ring".into(),
            ..args(2)
        };
        let a = build_artifact(&seeded).unwrap();
        let b = build_artifact(&seeded).unwrap();
        assert_eq!(a.parameters, b.parameters);
        assert_eq!(
            a.hyperparameters.entanglement_pattern,
            EntanglementPattern::Circular
        );
    }

    #[test]
    fn test_continuous_bounds() {
        let continuous = InitArgs {
            continuous: Some("-2,2".into()),
            ..args(2)
        };
        let artifact = build_artifact(&continuous).unwrap();
        assert_eq!(
            artifact.hyperparameters.action_space,
            ActionSpace::Continuous {
                low: -2.0,
                high: 2.0
            }
        );
    }

    #[test]
    fn test_rejects_unreachable_actions() {
        let too_many = InitArgs {
            actions: 5,
            ..args(2)
        };
        assert!(build_artifact(&too_many).is_err());
        let bad_pattern = InitArgs {
            entanglement: "star".into(),
            ..args(2)
        };
        assert!(build_artifact(&bad_pattern).is_err());
    }

    #[test]
    fn test_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("policy.json");
        let first = InitArgs {
            output: output.clone(),
            ..args(2)
        };
        execute(&first).unwrap();
        assert!(execute(&first).is_err());
        let forced = InitArgs {
            force: true,
            ..first
        };
        execute(&forced).unwrap();
    }
}
