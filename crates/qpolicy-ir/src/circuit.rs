//! High-level circuit builder API.

use std::fmt::Write as _;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{IrError, IrResult};
use crate::fingerprint::content_fingerprint;
use crate::gate::Gate;
use crate::instruction::{Instruction, InstructionKind};
use crate::parameter::ParameterExpression;
use crate::qubit::{ClbitId, QubitId};

/// A quantum circuit.
///
/// Instructions are kept in program order. Every appended instruction is
/// validated against the circuit's qubit and classical bit counts, so a
/// `Circuit` value is always well-formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    /// Name of the circuit.
    name: String,
    /// Number of qubits.
    num_qubits: u32,
    /// Number of classical bits.
    num_clbits: u32,
    /// Instructions in program order.
    instructions: Vec<Instruction>,
}

impl Circuit {
    /// Create a new empty circuit with no qubits.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_size(name, 0, 0)
    }

    /// Create a circuit with a given number of qubits and classical bits.
    pub fn with_size(name: impl Into<String>, num_qubits: u32, num_clbits: u32) -> Self {
        Self {
            name: name.into(),
            num_qubits,
            num_clbits,
            instructions: vec![],
        }
    }

    /// Append an instruction after validating its operands.
    pub fn apply(&mut self, instruction: Instruction) -> IrResult<&mut Self> {
        let gate_name = match &instruction.kind {
            InstructionKind::Gate(gate) => Some(gate.name().to_string()),
            _ => None,
        };

        if let InstructionKind::Gate(gate) = &instruction.kind {
            let expected = gate.num_qubits();
            let got = instruction.qubits.len() as u32;
            if expected != got {
                return Err(IrError::QubitCountMismatch {
                    gate_name: gate.name().to_string(),
                    expected,
                    got,
                });
            }
        }

        if instruction.is_measure() && instruction.qubits.len() != instruction.clbits.len() {
            return Err(IrError::MeasureArity {
                qubits: instruction.qubits.len(),
                clbits: instruction.clbits.len(),
            });
        }

        for &qubit in &instruction.qubits {
            if qubit.0 >= self.num_qubits {
                return Err(IrError::QubitNotFound {
                    qubit,
                    gate_name: gate_name.clone(),
                });
            }
        }

        for &clbit in &instruction.clbits {
            if clbit.0 >= self.num_clbits {
                return Err(IrError::ClbitNotFound {
                    clbit,
                    gate_name: gate_name.clone(),
                });
            }
        }

        let mut seen = FxHashSet::default();
        for &qubit in &instruction.qubits {
            if !seen.insert(qubit) {
                return Err(IrError::DuplicateQubit { qubit, gate_name });
            }
        }

        self.instructions.push(instruction);
        Ok(self)
    }

    // =========================================================================
    // Gates
    // =========================================================================

    /// Apply Hadamard gate.
    pub fn h(&mut self, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(Gate::H, [qubit])
    }

    /// Apply Pauli-X gate.
    pub fn x(&mut self, qubit: QubitId) -> IrResult<&mut Self> {
        self.gate(Gate::X, [qubit])
    }

    /// Apply Ry rotation gate.
    pub fn ry(
        &mut self,
        theta: impl Into<ParameterExpression>,
        qubit: QubitId,
    ) -> IrResult<&mut Self> {
        self.gate(Gate::Ry(theta.into()), [qubit])
    }

    /// Apply Rz rotation gate.
    pub fn rz(
        &mut self,
        theta: impl Into<ParameterExpression>,
        qubit: QubitId,
    ) -> IrResult<&mut Self> {
        self.gate(Gate::Rz(theta.into()), [qubit])
    }

    /// Apply CNOT (CX) gate.
    pub fn cx(&mut self, control: QubitId, target: QubitId) -> IrResult<&mut Self> {
        self.gate(Gate::CX, [control, target])
    }

    /// Apply `gate` to `qubits`.
    pub fn gate(
        &mut self,
        gate: Gate,
        qubits: impl IntoIterator<Item = QubitId>,
    ) -> IrResult<&mut Self> {
        self.apply(Instruction::gate(gate, qubits))
    }

    // =========================================================================
    // Other operations
    // =========================================================================

    /// Measure a qubit into a classical bit.
    pub fn measure(&mut self, qubit: QubitId, clbit: ClbitId) -> IrResult<&mut Self> {
        self.apply(Instruction::measure(qubit, clbit))
    }

    /// Measure qubit `i` into classical bit `i` for every qubit.
    ///
    /// Grows the classical register if it is smaller than the qubit count.
    pub fn measure_all(&mut self) -> IrResult<&mut Self> {
        self.num_clbits = self.num_clbits.max(self.num_qubits);
        for i in 0..self.num_qubits {
            self.measure(QubitId(i), ClbitId(i))?;
        }
        Ok(self)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the circuit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of qubits.
    pub fn num_qubits(&self) -> usize {
        self.num_qubits as usize
    }

    /// Get the number of classical bits.
    pub fn num_clbits(&self) -> usize {
        self.num_clbits as usize
    }

    /// Instructions in program order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of gate instructions, measurements excluded.
    pub fn gate_count(&self) -> usize {
        self.instructions.iter().filter(|i| !i.is_measure()).count()
    }

    /// Get the circuit depth.
    ///
    /// Each gate or measurement sits one layer above the deepest qubit it
    /// touches.
    pub fn depth(&self) -> usize {
        let mut layers = vec![0usize; self.num_qubits()];
        let mut max_depth = 0usize;

        for inst in &self.instructions {
            let front = inst
                .qubits
                .iter()
                .filter_map(|q| layers.get(q.index()).copied())
                .max()
                .unwrap_or(0);
            let node_depth = front + 1;
            for q in &inst.qubits {
                if let Some(layer) = layers.get_mut(q.index()) {
                    *layer = node_depth;
                }
            }
            max_depth = max_depth.max(node_depth);
        }

        max_depth
    }

    /// All free parameter symbols, sorted.
    pub fn free_symbols(&self) -> Vec<String> {
        let mut symbols = std::collections::BTreeSet::new();
        for inst in &self.instructions {
            if let Some(p) = inst.as_gate().and_then(Gate::angle) {
                symbols.extend(p.symbols());
            }
        }
        symbols.into_iter().collect()
    }

    /// Check if any gate still carries a free symbol.
    pub fn is_parameterized(&self) -> bool {
        self.instructions
            .iter()
            .filter_map(Instruction::as_gate)
            .any(Gate::is_parameterized)
    }

    /// Bind parameter symbols, returning a fully concrete circuit.
    ///
    /// Fails with [`IrError::UnboundParameter`] naming the first symbol that
    /// `values` does not cover.
    pub fn bind_parameters(&self, values: &FxHashMap<String, f64>) -> IrResult<Self> {
        let instructions = self
            .instructions
            .iter()
            .map(|inst| match &inst.kind {
                InstructionKind::Gate(gate) => {
                    let bound = gate.bind_all(values);
                    if let Some(name) = bound.angle().and_then(|p| p.symbols().pop_first()) {
                        return Err(IrError::UnboundParameter(name));
                    }
                    Ok(Instruction {
                        kind: InstructionKind::Gate(bound),
                        qubits: inst.qubits.clone(),
                        clbits: inst.clbits.clone(),
                    })
                }
                InstructionKind::Measure => Ok(inst.clone()),
            })
            .collect::<IrResult<Vec<_>>>()?;

        Ok(Self {
            name: self.name.clone(),
            num_qubits: self.num_qubits,
            num_clbits: self.num_clbits,
            instructions,
        })
    }

    /// Deterministic content fingerprint of the circuit.
    ///
    /// Computed over a canonical text rendering, one instruction per line.
    /// Angles are written in shortest round-trip form, so two circuits share
    /// a fingerprint exactly when their instructions are equal.
    pub fn fingerprint(&self) -> String {
        content_fingerprint(self.canonical_text().as_bytes())
    }

    fn canonical_text(&self) -> String {
        let mut out = format!("circuit {} {} {}\n", self.name, self.num_qubits, self.num_clbits);
        for inst in &self.instructions {
            out.push_str(inst.name());
            if let Some(p) = inst.as_gate().and_then(Gate::angle) {
                let _ = write!(out, "({p})");
            }
            for q in &inst.qubits {
                let _ = write!(out, " {q}");
            }
            for c in &inst.clbits {
                let _ = write!(out, " -> {c}");
            }
            out.push('\n');
        }
        out
    }

    // =========================================================================
    // Pre-built circuits
    // =========================================================================

    /// Create a Bell state circuit.
    pub fn bell() -> IrResult<Self> {
        let mut circuit = Self::with_size("bell", 2, 2);
        let q0 = QubitId(0);
        let q1 = QubitId(1);

        circuit
            .h(q0)?
            .cx(q0, q1)?
            .measure(q0, ClbitId(0))?
            .measure(q1, ClbitId(1))?;

        Ok(circuit)
    }

    /// Create a GHZ state circuit.
    pub fn ghz(n: u32) -> IrResult<Self> {
        if n == 0 {
            return Ok(Self::new("ghz_0"));
        }

        let mut circuit = Self::with_size("ghz", n, n);
        circuit.h(QubitId(0))?;
        for i in 0..n - 1 {
            circuit.cx(QubitId(i), QubitId(i + 1))?;
        }
        circuit.measure_all()?;

        Ok(circuit)
    }
}
