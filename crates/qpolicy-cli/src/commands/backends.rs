//! Backends command implementation.

use anyhow::Result;
use console::style;

use qpolicy_agent::default_registry;
use qpolicy_hal::BackendConfig;

/// Execute the backends command.
pub fn execute() -> Result<()> {
    println!("{} Available backends:\n", style("qpolicy").cyan().bold());

    let registry = default_registry();
    let mut names = registry.available_backends();
    names.sort();

    for name in names {
        let backend = match registry.create(&name, BackendConfig::new(&name)) {
            Ok(backend) => backend,
            Err(e) => {
                println!("  {} {} ({e})", style("○").red(), style(&name).dim());
                println!();
                continue;
            }
        };
        let caps = backend.capabilities();

        println!(
            "  {} {} {}",
            style("●").green(),
            style(&name).bold(),
            if caps.is_simulator { "(local)" } else { "" }
        );
        println!("    Qubits: {}", caps.num_qubits);
        println!("    Max shots: {}", caps.max_shots);
        println!("    Topology: {:?}", caps.topology.kind);
        println!(
            "    Gates: {}",
            caps.gate_set
                .single_qubit
                .iter()
                .chain(&caps.gate_set.two_qubit)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
        if !caps.features.is_empty() {
            println!("    Features: {}", caps.features.join(", "));
        }
        println!();
    }

    Ok(())
}
