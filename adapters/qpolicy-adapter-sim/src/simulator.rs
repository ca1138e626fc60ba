//! Simulator backend implementation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, instrument};

use qpolicy_hal::{
    Backend, BackendConfig, BackendFactory, CalibrationSnapshot, Capabilities, Counts,
    ExecutionResult, HalError, HalResult, NoiseProfile,
};
use qpolicy_ir::{Circuit, InstructionKind};

use crate::device::DeviceDescription;
use crate::statevector::{Pauli, Statevector};

/// Default relative drift applied to presets on each refresh.
const DEFAULT_DRIFT: f64 = 0.05;

/// Where calibration comes from.
#[derive(Debug, Clone)]
enum DeviceSource {
    /// Built-in description, drifted on every refresh.
    Preset(DeviceDescription),
    /// JSON file re-read on every refresh.
    File(PathBuf),
}

/// Calibration-aware statevector simulator.
///
/// Noise is taken from the snapshot passed to [`Backend::run`]:
///
/// - a depolarizing Pauli error after every gate, sampled per shot
/// - readout bit flips on every measured qubit
///
/// Noiseless snapshots evolve the state once and sample all shots from it.
/// Sampling is seeded, so a backend created with the same seed replays the
/// same counts for the same sequence of runs.
pub struct SimulatorBackend {
    /// Backend configuration.
    config: BackendConfig,
    /// Capabilities cached at construction.
    capabilities: Capabilities,
    /// Calibration source.
    source: DeviceSource,
    /// Relative drift per refresh for presets.
    drift: f64,
    /// Artificial latency of `refresh`.
    refresh_latency: Duration,
    /// Artificial latency of `run`.
    run_latency: Duration,
    /// Master RNG; each run draws its own seed from it.
    rng: Arc<Mutex<StdRng>>,
    /// Number of refreshes served.
    refreshes: AtomicU64,
}

impl SimulatorBackend {
    /// Create a noiseless simulator with default settings.
    pub fn new() -> Self {
        Self::with_device("simulator", DeviceDescription::ideal(12))
    }

    /// Create a simulator over a preset device description.
    pub fn with_device(name: impl Into<String>, device: DeviceDescription) -> Self {
        let config = BackendConfig::new(name);
        Self::build(config, DeviceSource::Preset(device.clone()), &device)
    }

    /// Set the sampling seed.
    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
            StdRng::seed_from_u64(seed);
        self
    }

    /// Set the relative drift applied to presets on each refresh.
    #[must_use]
    pub fn with_drift(mut self, drift: f64) -> Self {
        self.drift = drift;
        self
    }

    /// Set an artificial latency for `refresh`.
    #[must_use]
    pub fn with_refresh_latency(mut self, latency: Duration) -> Self {
        self.refresh_latency = latency;
        self
    }

    /// Set an artificial latency for `run`.
    #[must_use]
    pub fn with_run_latency(mut self, latency: Duration) -> Self {
        self.run_latency = latency;
        self
    }

    /// Number of refreshes served so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    fn build(config: BackendConfig, source: DeviceSource, device: &DeviceDescription) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let capabilities = Capabilities::simulator(device.num_qubits)
            .with_name(config.name.clone())
            .with_topology(device.topology())
            .with_noise_profile(device_noise_profile(device));
        let capabilities = if device.is_noiseless() {
            capabilities
        } else {
            capabilities.with_feature("noisy")
        };

        Self {
            config,
            capabilities,
            source,
            drift: DEFAULT_DRIFT,
            refresh_latency: Duration::ZERO,
            run_latency: Duration::ZERO,
            rng: Arc::new(Mutex::new(rng)),
            refreshes: AtomicU64::new(0),
        }
    }

    fn current_description(&self) -> HalResult<DeviceDescription> {
        match &self.source {
            DeviceSource::Preset(device) => {
                let mut rng = self
                    .rng
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                Ok(device.drifted(self.drift, &mut *rng))
            }
            DeviceSource::File(path) => DeviceDescription::from_file(path),
        }
    }

    fn check_run(
        &self,
        circuit: &Circuit,
        snapshot: &CalibrationSnapshot,
        shots: u32,
    ) -> HalResult<()> {
        if shots == 0 {
            return Err(HalError::InvalidShots("shot count must be positive".into()));
        }
        if shots > self.capabilities.max_shots {
            return Err(HalError::InvalidShots(format!(
                "{shots} shots exceed the limit of {}",
                self.capabilities.max_shots
            )));
        }
        if snapshot.backend != self.config.name {
            return Err(HalError::StaleCalibration(format!(
                "snapshot {} belongs to '{}', not '{}'",
                snapshot.id, snapshot.backend, self.config.name
            )));
        }
        if circuit.num_qubits() > snapshot.num_qubits() {
            return Err(HalError::CircuitTooLarge(format!(
                "Circuit has {} qubits but the device calibrates {}",
                circuit.num_qubits(),
                snapshot.num_qubits()
            )));
        }
        if let Some(symbol) = circuit.free_symbols().into_iter().next() {
            return Err(HalError::UnboundParameter(symbol));
        }
        Ok(())
    }
}

impl Default for SimulatorBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn device_noise_profile(device: &DeviceDescription) -> NoiseProfile {
    device
        .snapshot("capabilities")
        .map(|snapshot| snapshot.noise_profile())
        .unwrap_or_default()
}

/// Raises its flag when dropped.
///
/// Held by [`Backend::run`] across the blocking simulation, so a caller
/// that gives up on the run (for example on timeout) stops the shot loop.
struct CancelOnDrop(Arc<AtomicBool>);

impl CancelOnDrop {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Run shots of `circuit` under `snapshot`.
///
/// Bitstring character `i` is classical bit `i`. A circuit without
/// measurements is read out on every qubit. `cancelled` is checked before
/// every shot.
fn simulate(
    circuit: &Circuit,
    snapshot: &CalibrationSnapshot,
    shots: u32,
    rng: &mut StdRng,
    cancelled: &AtomicBool,
) -> HalResult<Counts> {
    let num_qubits = circuit.num_qubits();

    let mut readout: Vec<(usize, usize)> = circuit
        .instructions()
        .iter()
        .filter(|inst| matches!(inst.kind, InstructionKind::Measure))
        .flat_map(|inst| {
            inst.qubits
                .iter()
                .zip(&inst.clbits)
                .map(|(q, c)| (q.index(), c.index()))
        })
        .collect();
    let width = if readout.is_empty() {
        readout = (0..num_qubits).map(|q| (q, q)).collect();
        num_qubits
    } else {
        circuit.num_clbits()
    };

    let gates: Vec<_> = circuit
        .instructions()
        .iter()
        .filter_map(|inst| {
            inst.as_gate().map(|gate| {
                let qubits: Vec<usize> = inst.qubits.iter().map(|q| q.index()).collect();
                (gate.clone(), qubits)
            })
        })
        .collect();

    let gate_error = |qubits: &[usize]| -> f64 {
        match qubits {
            [q] => snapshot.qubit(*q).map_or(0.0, |c| c.gate_error),
            [a, b] => snapshot.two_qubit_error(*a as u32, *b as u32),
            _ => 0.0,
        }
    };
    let noisy_gates = gates.iter().any(|(_, qubits)| gate_error(qubits) > 0.0);

    let evolve = |rng: &mut StdRng, with_noise: bool| -> HalResult<Statevector> {
        let mut sv = Statevector::new(num_qubits);
        for (gate, qubits) in &gates {
            sv.apply_gate(gate, qubits)?;
            if with_noise {
                let p = gate_error(qubits);
                if p > 0.0 && rng.r#gen::<f64>() < p {
                    inject_depolarizing(&mut sv, qubits, rng);
                }
            }
        }
        Ok(sv)
    };

    let shared = if noisy_gates {
        None
    } else {
        Some(evolve(rng, false)?)
    };

    let mut counts = Counts::new();
    for shot in 0..shots {
        if cancelled.load(Ordering::Relaxed) {
            return Err(HalError::Timeout(format!(
                "simulation cancelled after {shot} of {shots} shots"
            )));
        }
        let outcome = match &shared {
            Some(sv) => sv.sample(rng),
            None => evolve(rng, true)?.sample(rng),
        };

        let mut bits = vec!['0'; width];
        for &(qubit, clbit) in &readout {
            let mut bit = (outcome >> qubit) & 1 == 1;
            if let Some(cal) = snapshot.qubit(qubit) {
                let flip = if bit { cal.readout_p10 } else { cal.readout_p01 };
                if flip > 0.0 && rng.r#gen::<f64>() < flip {
                    bit = !bit;
                }
            }
            if let Some(slot) = bits.get_mut(clbit) {
                *slot = if bit { '1' } else { '0' };
            }
        }
        counts.insert(bits.into_iter().collect::<String>(), 1);

        if shot > 0 && shot % 1000 == 0 {
            debug!("Completed {} shots", shot);
        }
    }

    Ok(counts)
}

/// Apply a uniformly random non-identity Pauli string on `qubits`.
fn inject_depolarizing(sv: &mut Statevector, qubits: &[usize], rng: &mut StdRng) {
    let choices = 4usize.pow(qubits.len() as u32);
    let mut pick = rng.gen_range(1..choices);
    for &q in qubits {
        sv.apply_pauli(q, Pauli::from_index(pick % 4));
        pick /= 4;
    }
}

#[async_trait]
impl Backend for SimulatorBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    #[instrument(skip(self), fields(backend = %self.config.name))]
    async fn refresh(&self) -> HalResult<CalibrationSnapshot> {
        if !self.refresh_latency.is_zero() {
            tokio::time::sleep(self.refresh_latency).await;
        }

        let description = self.current_description()?;
        if description.num_qubits < self.capabilities.num_qubits {
            return Err(HalError::Calibration(format!(
                "device now reports {} qubits, expected {}",
                description.num_qubits, self.capabilities.num_qubits
            )));
        }

        let snapshot = description.snapshot(&self.config.name)?;
        let n = self.refreshes.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Refresh #{} produced snapshot {}", n, snapshot.id);
        Ok(snapshot)
    }

    #[instrument(skip(self, circuit, snapshot), fields(snapshot = %snapshot.id))]
    async fn run(
        &self,
        circuit: &Circuit,
        snapshot: &CalibrationSnapshot,
        shots: u32,
    ) -> HalResult<ExecutionResult> {
        self.check_run(circuit, snapshot, shots)?;

        if !self.run_latency.is_zero() {
            tokio::time::sleep(self.run_latency).await;
        }

        let seed: u64 = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .r#gen();

        debug!(
            "Starting simulation: {} qubits, {} shots",
            circuit.num_qubits(),
            shots
        );

        let circuit = circuit.clone();
        let snapshot = snapshot.clone();
        let start = Instant::now();
        let cancel = CancelOnDrop::new();
        let cancelled = cancel.flag();
        let (counts, snapshot_id) = tokio::task::spawn_blocking(move || {
            let mut rng = StdRng::seed_from_u64(seed);
            simulate(&circuit, &snapshot, shots, &mut rng, &cancelled).map(|c| (c, snapshot.id))
        })
        .await
        .map_err(|e| HalError::Backend(format!("simulation task failed: {e}")))??;

        let elapsed = start.elapsed();
        debug!("Simulation completed in {:?}", elapsed);

        Ok(ExecutionResult::new(counts, shots, snapshot_id)
            .with_execution_time(elapsed.as_millis() as u64))
    }
}

impl BackendFactory for SimulatorBackend {
    fn from_config(config: BackendConfig) -> HalResult<Self> {
        let extra_f64 = |key: &str| config.extra.get(key).and_then(serde_json::Value::as_f64);
        let extra_u64 = |key: &str| config.extra.get(key).and_then(serde_json::Value::as_u64);

        let drift = extra_f64("drift").unwrap_or(DEFAULT_DRIFT);
        if !(0.0..1.0).contains(&drift) {
            return Err(HalError::Configuration(format!(
                "drift must be in [0, 1), got {drift}"
            )));
        }
        let refresh_latency = Duration::from_millis(extra_u64("refresh_latency_ms").unwrap_or(0));
        let run_latency = Duration::from_millis(extra_u64("run_latency_ms").unwrap_or(0));

        let (source, device) = match &config.device_file {
            Some(path) => {
                let device = DeviceDescription::from_file(path)?;
                (DeviceSource::File(path.clone()), device)
            }
            None => {
                let device = match config.name.as_str() {
                    "fake-5q" => DeviceDescription::fake_5q(),
                    _ => {
                        let qubits = extra_u64("max_qubits").map_or(12, |v| v as u32);
                        if qubits == 0 || qubits > 24 {
                            return Err(HalError::Configuration(format!(
                                "max_qubits must be in 1..=24, got {qubits}"
                            )));
                        }
                        DeviceDescription::ideal(qubits)
                    }
                };
                (DeviceSource::Preset(device.clone()), device)
            }
        };

        let mut backend = Self::build(config, source, &device);
        backend.drift = drift;
        backend.refresh_latency = refresh_latency;
        backend.run_latency = run_latency;
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qpolicy_ir::{ClbitId, QubitId};

    #[tokio::test]
    async fn test_simulator_capabilities() {
        let backend = SimulatorBackend::new();
        let caps = backend.capabilities();

        assert!(caps.is_simulator);
        assert_eq!(caps.num_qubits, 12);
        assert!(!caps.has_feature("noisy"));
    }

    #[tokio::test]
    async fn test_refresh_produces_fresh_snapshots() {
        let backend = SimulatorBackend::new();
        let a = backend.refresh().await.unwrap();
        let b = backend.refresh().await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.backend, "simulator");
        assert_eq!(backend.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_simulator_bell_state() {
        let backend = SimulatorBackend::new().with_seed(42);
        let snapshot = backend.refresh().await.unwrap();

        let result = backend
            .run(&Circuit::bell().unwrap(), &snapshot, 1000)
            .await
            .unwrap();
        assert_eq!(result.shots, 1000);
        assert_eq!(result.snapshot_id, snapshot.id);

        let counts = &result.counts;
        assert_eq!(counts.get("00") + counts.get("11"), 1000);
        assert_eq!(counts.get("01") + counts.get("10"), 0);
    }

    #[tokio::test]
    async fn test_bitstring_order_matches_clbits() {
        let backend = SimulatorBackend::new();
        let snapshot = backend.refresh().await.unwrap();

        let mut circuit = Circuit::with_size("x0", 3, 3);
        circuit.x(QubitId(0)).unwrap().measure_all().unwrap();
        let result = backend.run(&circuit, &snapshot, 10).await.unwrap();
        assert_eq!(result.counts.get("100"), 10);

        let mut swapped = Circuit::with_size("swap", 2, 2);
        swapped
            .x(QubitId(0))
            .unwrap()
            .measure(QubitId(0), ClbitId(1))
            .unwrap()
            .measure(QubitId(1), ClbitId(0))
            .unwrap();
        let result = backend.run(&swapped, &snapshot, 10).await.unwrap();
        assert_eq!(result.counts.get("01"), 10);
    }

    #[tokio::test]
    async fn test_seeded_runs_replay() {
        let mut h = Circuit::with_size("h", 2, 2);
        h.h(QubitId(0)).unwrap().h(QubitId(1)).unwrap().measure_all().unwrap();

        let mut runs = vec![];
        for _ in 0..2 {
            let backend = SimulatorBackend::with_device("fake-5q", DeviceDescription::fake_5q())
                .with_seed(9)
                .with_drift(0.0);
            let snapshot = backend.refresh().await.unwrap();
            runs.push(backend.run(&h, &snapshot, 500).await.unwrap().counts);
        }
        assert_eq!(runs[0], runs[1]);
    }

    #[tokio::test]
    async fn test_noise_spreads_counts() {
        let mut device = DeviceDescription::ideal(1);
        device.qubits[0].readout_p01 = 0.5;
        let backend = SimulatorBackend::with_device("noisy", device).with_seed(1);
        let snapshot = backend.refresh().await.unwrap();

        let mut circuit = Circuit::with_size("id", 1, 1);
        circuit.measure_all().unwrap();
        let result = backend.run(&circuit, &snapshot, 2000).await.unwrap();
        let ones = result.counts.get("1");
        assert!(ones > 800 && ones < 1200, "got {ones} ones");
    }

    #[tokio::test]
    async fn test_rejects_zero_shots() {
        let backend = SimulatorBackend::new();
        let snapshot = backend.refresh().await.unwrap();
        let result = backend.run(&Circuit::bell().unwrap(), &snapshot, 0).await;
        assert!(matches!(result, Err(HalError::InvalidShots(_))));
    }

    #[tokio::test]
    async fn test_rejects_foreign_snapshot() {
        let backend = SimulatorBackend::new();
        let other = SimulatorBackend::with_device("other", DeviceDescription::ideal(2));
        let snapshot = other.refresh().await.unwrap();
        let result = backend.run(&Circuit::bell().unwrap(), &snapshot, 10).await;
        assert!(matches!(result, Err(HalError::StaleCalibration(_))));
    }

    #[tokio::test]
    async fn test_rejects_too_many_qubits() {
        let backend = SimulatorBackend::with_device("small", DeviceDescription::ideal(2));
        let snapshot = backend.refresh().await.unwrap();
        let circuit = Circuit::ghz(3).unwrap();
        let result = backend.run(&circuit, &snapshot, 10).await;
        assert!(matches!(result, Err(HalError::CircuitTooLarge(_))));
    }

    #[test]
    fn test_cancelled_simulation_stops() {
        let snapshot = CalibrationSnapshot::ideal("simulator", 2, Duration::from_secs(60));
        let circuit = Circuit::bell().unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        let cancel = CancelOnDrop::new();
        let flag = cancel.flag();
        assert!(simulate(&circuit, &snapshot, 10, &mut rng, &flag).is_ok());

        drop(cancel);
        assert!(flag.load(Ordering::Relaxed));
        let result = simulate(&circuit, &snapshot, 10, &mut rng, &flag);
        assert!(matches!(result, Err(HalError::Timeout(_))));
    }

    #[test]
    fn test_from_config_presets() {
        let fake = SimulatorBackend::from_config(BackendConfig::new("fake-5q")).unwrap();
        assert_eq!(fake.capabilities().num_qubits, 5);
        assert!(fake.capabilities().has_feature("noisy"));

        let sim = SimulatorBackend::from_config(
            BackendConfig::new("sim").with_extra("max_qubits", serde_json::json!(4)),
        )
        .unwrap();
        assert_eq!(sim.capabilities().num_qubits, 4);

        let bad = SimulatorBackend::from_config(
            BackendConfig::new("sim").with_extra("drift", serde_json::json!(2.0)),
        );
        assert!(matches!(bad, Err(HalError::Configuration(_))));
    }
}
