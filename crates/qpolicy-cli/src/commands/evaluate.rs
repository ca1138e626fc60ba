//! Evaluate command implementation.
//!
//! `qpolicy evaluate --artifact policy.json --trace trace.jsonl [--episodes N] [--output report.json]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use qpolicy_agent::report::{ExportConfig, to_json};
use qpolicy_agent::{
    EpisodeReport, EpisodeStatus, Evaluation, EvaluationConfig, EvaluationReport,
    default_registry,
};

use super::common::load_config;

/// Arguments of `qpolicy evaluate`. Flags override the configuration file
/// and `QPOLICY_*` environment variables.
#[derive(Args, Debug, Default)]
pub struct EvaluateArgs {
    /// Configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Policy artifact (JSON)
    #[arg(short, long)]
    pub artifact: Option<PathBuf>,

    /// Observation trace to replay (JSON Lines)
    #[arg(short, long)]
    pub trace: Option<PathBuf>,

    /// Backend to evaluate on
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Device description file for the simulator
    #[arg(long)]
    pub device_file: Option<PathBuf>,

    /// Number of episodes
    #[arg(short, long)]
    pub episodes: Option<u32>,

    /// Step limit per episode
    #[arg(long)]
    pub max_steps: Option<u32>,

    /// Episodes run at the same time
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Shots per step (defaults to the artifact's shot count)
    #[arg(short, long)]
    pub shots: Option<u32>,

    /// Backend sampling seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Audit log destination (JSON Lines)
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    /// Confidence level of the mean-reward interval, in (0, 1)
    #[arg(long)]
    pub confidence: Option<f64>,

    /// Evaluation report destination (stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl EvaluateArgs {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut EvaluationConfig) {
        if let Some(artifact) = &self.artifact {
            config.artifact = Some(artifact.clone());
        }
        if let Some(trace) = &self.trace {
            config.trace = Some(trace.clone());
        }
        if let Some(backend) = &self.backend {
            config.backend.clone_from(backend);
        }
        if let Some(path) = &self.device_file {
            config.device_file = Some(path.clone());
        }
        if let Some(episodes) = self.episodes {
            config.episodes = episodes;
        }
        if let Some(max_steps) = self.max_steps {
            config.max_steps = max_steps;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(shots) = self.shots {
            config.shots = Some(shots);
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(path) = &self.audit_log {
            config.audit_log = Some(path.clone());
        }
        if let Some(confidence) = self.confidence {
            config.confidence = confidence;
        }
        if let Some(path) = &self.output {
            config.report = Some(path.clone());
        }
    }
}

/// Execute the evaluate command.
pub async fn execute(args: &EvaluateArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    eprintln!(
        "{} Evaluating {} on {} ({} episodes)",
        style("→").cyan().bold(),
        style(display_path(config.artifact.as_ref())).green(),
        style(&config.backend).yellow(),
        config.episodes
    );

    let registry = default_registry();
    let mut evaluation = Evaluation::prepare(config.clone(), &registry)?;
    let store = evaluation.store();
    eprintln!(
        "  Policy: {} qubits, depth {}, {} parameters ({})",
        store.hyperparameters().qubit_count,
        store.hyperparameters().circuit_depth,
        store.parameters().len(),
        style(short_fingerprint(store.fingerprint())).dim()
    );

    let progress = if args.no_progress {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(u64::from(config.episodes));
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:30.cyan/dim}] {pos}/{len} episodes {msg}")?
                .progress_chars("=> "),
        );
        bar
    };
    let bar = progress.clone();
    evaluation = evaluation.on_episode(Arc::new(move |report: &EpisodeReport| {
        if let EpisodeStatus::Aborted { reason, .. } = &report.status {
            bar.println(format!(
                "  {} episode {} aborted after {} steps: {}",
                style("✗").red(),
                report.episode,
                report.steps,
                reason
            ));
        }
        bar.inc(1);
    }));

    let cli_args: Vec<String> = std::env::args().collect();
    let report = evaluation.run(&cli_args).await?;
    progress.finish_and_clear();

    match &config.report {
        Some(path) => eprintln!(
            "{} Report written to {}",
            style("OK").green().bold(),
            path.display()
        ),
        None => println!("{}", to_json(&report, &ExportConfig::default())?),
    }
    if let Some(path) = &config.audit_log {
        eprintln!("  Audit log: {}", path.display());
    }

    print_summary(&report);

    if report.summary.completed == 0 {
        anyhow::bail!("All {} episodes aborted", report.summary.aborted);
    }
    Ok(())
}

fn print_summary(report: &EvaluationReport) {
    let summary = &report.summary;
    eprintln!();
    eprintln!("{}", style("Evaluation Summary").bold().underlined());
    eprintln!(
        "  Episodes:    {} completed, {} aborted",
        style(summary.completed).green(),
        if summary.aborted > 0 {
            style(summary.aborted).red()
        } else {
            style(summary.aborted).dim()
        }
    );
    eprintln!("  Steps:       {}", summary.total_steps);
    if let Some(mean) = summary.mean_reward {
        eprintln!("  Mean reward: {}", style(format!("{mean:.4}")).yellow());
    }
    if let Some(std) = summary.reward_std {
        eprintln!("  Reward std:  {std:.4}");
    }
    if let Some(ci) = &summary.reward_ci {
        eprintln!(
            "  {:.0}% CI:     [{:.4}, {:.4}] (±{:.4})",
            ci.confidence * 100.0,
            ci.low,
            ci.high,
            ci.half_width()
        );
    }

    let fallbacks: u32 = report.episodes.iter().map(|e| e.fallback_refreshes).sum();
    let log_failures: u64 = report.episodes.iter().map(|e| e.log_failures).sum();
    if fallbacks > 0 {
        eprintln!(
            "  {} {} refreshes fell back to the last good calibration",
            style("!").yellow().bold(),
            fallbacks
        );
    }
    if log_failures > 0 {
        eprintln!(
            "  {} {} audit records could not be written",
            style("!").yellow().bold(),
            log_failures
        );
    }

    if !summary.action_histogram.is_empty() {
        eprintln!();
        eprintln!("{}", style("Actions").bold().underlined());
        let total = summary.total_steps.max(1) as f64;
        for (action, count) in &summary.action_histogram {
            let share = *count as f64 / total * 100.0;
            let bar: String = "█".repeat((share / 2.0).round() as usize);
            eprintln!(
                "  {:>8}: {:>6} ({:>5.1}%) {}",
                style(action).cyan(),
                count,
                share,
                style(bar).green()
            );
        }
    }
}

fn display_path(path: Option<&PathBuf>) -> String {
    path.map_or_else(|| "-".to_string(), |p| p.display().to_string())
}

fn short_fingerprint(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}
