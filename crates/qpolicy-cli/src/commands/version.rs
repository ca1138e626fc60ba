//! Version command implementation.

use console::style;

use qpolicy_agent::{ANSATZ_ID, FORMAT_VERSION};

/// Execute the version command.
pub fn execute() {
    let version = env!("CARGO_PKG_VERSION");

    println!(
        "{} {} - calibration-aware quantum policy evaluation",
        style("qpolicy").cyan().bold(),
        style(format!("v{version}")).yellow()
    );
    println!();
    println!("Components:");
    println!("  qpolicy-ir           Parameterized circuit representation");
    println!("  qpolicy-hal          Calibration-aware backend abstraction");
    println!("  qpolicy-agent        Policy evaluation pipeline");
    println!("  qpolicy-adapter-sim  Noisy statevector simulator");
    println!("  qpolicy-cli          Command-line interface");
    println!();
    println!("Artifact format: v{FORMAT_VERSION} ({ANSATZ_ID})");
    println!("License:         {}", style("Apache-2.0").dim());
}
