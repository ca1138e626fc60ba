//! Device description files are re-read on every refresh.

use std::io::Write;

use qpolicy_adapter_sim::SimulatorBackend;
use qpolicy_hal::{Backend, BackendConfig, BackendFactory, BackendRegistry, HalError};
use qpolicy_ir::{Circuit, QubitId};

fn write_device(path: &std::path::Path, readout_p01: f64) {
    let mut file = std::fs::File::create(path).unwrap();
    write!(
        file,
        r#"{{
            "name": "lab-2q",
            "num_qubits": 2,
            "valid_for_secs": 120,
            "qubits": [{{"t1": 80.0, "t2": 60.0, "gate_error": 0.0, "readout_p01": {readout_p01}, "readout_p10": 0.0}}],
            "edges": [{{"qubits": [0, 1], "gate_error": 0.0}}]
        }}"#
    )
    .unwrap();
}

#[tokio::test]
async fn test_refresh_rereads_device_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device.json");
    write_device(&path, 0.0);

    let backend = SimulatorBackend::from_config(
        BackendConfig::new("lab").with_device_file(&path).with_seed(5),
    )
    .unwrap();
    assert_eq!(backend.capabilities().num_qubits, 2);

    let first = backend.refresh().await.unwrap();
    assert_eq!(first.qubits[1].readout_p01, 0.0);
    assert_eq!(first.valid_for.as_secs(), 120);

    write_device(&path, 0.25);
    let second = backend.refresh().await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.qubits[0].readout_p01, 0.25);
    assert_eq!(second.qubits[1].readout_p01, 0.25);

    // The first snapshot is untouched and still usable.
    let mut circuit = Circuit::with_size("idle", 2, 2);
    circuit.measure_all().unwrap();
    let clean = backend.run(&circuit, &first, 200).await.unwrap();
    assert_eq!(clean.counts.get("00"), 200);
    assert_eq!(clean.snapshot_id, first.id);
}

#[tokio::test]
async fn test_missing_device_file_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device.json");
    write_device(&path, 0.0);

    let backend =
        SimulatorBackend::from_config(BackendConfig::new("lab").with_device_file(&path)).unwrap();
    std::fs::remove_file(&path).unwrap();

    let err = backend.refresh().await.unwrap_err();
    assert!(matches!(err, HalError::BackendUnavailable(_)));
}

#[tokio::test]
async fn test_registry_resolves_presets() {
    let mut registry = BackendRegistry::new();
    qpolicy_adapter_sim::register(&mut registry);
    assert_eq!(
        registry.available_backends(),
        vec!["fake-5q", "sim", "simulator"]
    );

    let backend = registry
        .create("fake-5q", BackendConfig::new("").with_seed(1))
        .unwrap();
    assert_eq!(backend.name(), "fake-5q");

    let snapshot = backend.refresh().await.unwrap();
    let mut circuit = Circuit::with_size("pair", 5, 5);
    circuit
        .h(QubitId(0))
        .unwrap()
        .cx(QubitId(0), QubitId(1))
        .unwrap()
        .measure_all()
        .unwrap();
    assert!(backend.validate(&circuit).is_valid());

    let result = backend.run(&circuit, &snapshot, 300).await.unwrap();
    assert!(result.is_consistent());
}
