// This module defines the platform-independent input of the back-end pipeline: the
// ComputationModule. A module owns one entry Computation, a graph of element-wise
// instructions in a fixed schedule (every operand refers to an earlier instruction), plus a
// ModuleConfig carrying the debug options that steer the back end. Modules are immutable
// once built; cloning produces an independent copy with a fresh unique id so the same
// logical program can be compiled for several devices. ComputationBuilder is the only way
// to assemble a Computation and validates operand order, shapes and parameter numbering.
// The text form (Display + parser) mirrors the builder one to one.

//! Computation modules consumed by the back-end compiler.
//!
//! ```text
//! HloModule add_one
//! ENTRY main {
//!   p0 = f32[4] parameter(0)
//!   one = f32[4] constant(1)
//!   ROOT sum = f32[4] add(p0, one)
//! }
//! ```

pub mod parser;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub use parser::{parse_module, parse_module_with_config, ParseError};

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

fn next_module_id() -> u64 {
    NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Errors raised while assembling a computation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("Computation {name} has no instructions")]
    EmptyComputation { name: String },

    #[error("Instruction {instruction} uses operand {operand} which is not scheduled before it")]
    OperandOutOfOrder { instruction: String, operand: u32 },

    #[error("Instruction {instruction} expects {expected} operands, got {actual}")]
    OperandCount {
        instruction: String,
        expected: usize,
        actual: usize,
    },

    #[error("Instruction {instruction} has shape {actual}, operand requires {expected}")]
    ShapeMismatch {
        instruction: String,
        expected: Shape,
        actual: Shape,
    },

    #[error("Parameter numbers must be dense from 0, missing parameter({missing})")]
    ParameterGap { missing: u32 },

    #[error("Parameter({number}) is declared twice")]
    DuplicateParameter { number: u32 },

    #[error("Root instruction {root} does not exist")]
    InvalidRoot { root: u32 },

    #[error("Instruction {instruction} has shape {shape} whose byte size overflows u64")]
    ShapeTooLarge { instruction: String, shape: Shape },
}

/// Element types supported by the element-wise back ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    S32,
    F32,
}

impl ElementType {
    pub fn byte_size(self) -> u64 {
        4
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::S32 => "s32",
            ElementType::F32 => "f32",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Array shape: element type plus dimensions. Empty `dims` is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    pub element_type: ElementType,
    pub dims: Vec<u64>,
}

impl Shape {
    pub fn new(element_type: ElementType, dims: impl Into<Vec<u64>>) -> Self {
        Self {
            element_type,
            dims: dims.into(),
        }
    }

    pub fn scalar(element_type: ElementType) -> Self {
        Self::new(element_type, Vec::new())
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// `None` when the product of the dimensions does not fit in a `u64`.
    pub fn checked_element_count(&self) -> Option<u64> {
        self.dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d))
    }

    pub fn checked_byte_size(&self) -> Option<u64> {
        self.checked_element_count()?
            .checked_mul(self.element_type.byte_size())
    }

    /// Saturates at `u64::MAX`. Shapes of a built [`Computation`] never do.
    pub fn element_count(&self) -> u64 {
        self.checked_element_count().unwrap_or(u64::MAX)
    }

    pub fn byte_size(&self) -> u64 {
        self.checked_byte_size().unwrap_or(u64::MAX)
    }

    fn same_dims(&self, other: &Shape) -> bool {
        self.dims == other.dims
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.element_type)?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("]")
    }
}

/// Scalar literal; constants broadcast it to their declared shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    S32(i32),
    F32(f32),
}

impl Literal {
    pub fn element_type(self) -> ElementType {
        match self {
            Literal::S32(_) => ElementType::S32,
            Literal::F32(_) => ElementType::F32,
        }
    }

    /// Raw 32-bit pattern of the value.
    pub fn to_bits(self) -> u32 {
        match self {
            Literal::S32(v) => v as u32,
            Literal::F32(v) => v.to_bits(),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::S32(v) => write!(f, "{v}"),
            Literal::F32(v) => write!(f, "{v:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Opcode {
    Parameter(u32),
    Constant(Literal),
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,
    Negate,
    Convert,
}

impl Opcode {
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Parameter(_) => "parameter",
            Opcode::Constant(_) => "constant",
            Opcode::Add => "add",
            Opcode::Subtract => "subtract",
            Opcode::Multiply => "multiply",
            Opcode::Divide => "divide",
            Opcode::Maximum => "maximum",
            Opcode::Minimum => "minimum",
            Opcode::Negate => "negate",
            Opcode::Convert => "convert",
        }
    }

    /// Number of operands the opcode takes.
    pub fn arity(&self) -> usize {
        match self {
            Opcode::Parameter(_) | Opcode::Constant(_) => 0,
            Opcode::Negate | Opcode::Convert => 1,
            _ => 2,
        }
    }

    pub fn from_name(name: &str) -> Option<Opcode> {
        Some(match name {
            "add" => Opcode::Add,
            "subtract" => Opcode::Subtract,
            "multiply" => Opcode::Multiply,
            "divide" => Opcode::Divide,
            "maximum" => Opcode::Maximum,
            "minimum" => Opcode::Minimum,
            "negate" => Opcode::Negate,
            "convert" => Opcode::Convert,
            _ => return None,
        })
    }
}

/// Index of an instruction within its computation's schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstructionId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub id: InstructionId,
    pub name: String,
    pub opcode: Opcode,
    pub shape: Shape,
    pub operands: Vec<InstructionId>,
}

/// A validated, scheduled instruction graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Computation {
    name: String,
    instructions: Vec<Instruction>,
    root: InstructionId,
    parameter_count: u32,
}

impl Computation {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instructions in schedule order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instruction(&self, id: InstructionId) -> &Instruction {
        &self.instructions[id.0 as usize]
    }

    pub fn root(&self) -> &Instruction {
        self.instruction(self.root)
    }

    pub fn parameter_count(&self) -> u32 {
        self.parameter_count
    }

    /// Parameter instructions ordered by parameter number.
    pub fn parameters(&self) -> Vec<&Instruction> {
        let mut params: Vec<_> = self
            .instructions
            .iter()
            .filter(|inst| matches!(inst.opcode, Opcode::Parameter(_)))
            .collect();
        params.sort_by_key(|inst| match inst.opcode {
            Opcode::Parameter(n) => n,
            _ => u32::MAX,
        });
        params
    }
}

/// Builds a [`Computation`] in schedule order.
#[derive(Debug)]
pub struct ComputationBuilder {
    name: String,
    instructions: Vec<Instruction>,
    root: Option<InstructionId>,
}

impl ComputationBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Vec::new(),
            root: None,
        }
    }

    /// Append an instruction. Validation is deferred to [`build`](Self::build).
    pub fn add_instruction(
        &mut self,
        name: impl Into<String>,
        opcode: Opcode,
        shape: Shape,
        operands: &[InstructionId],
    ) -> InstructionId {
        let id = InstructionId(self.instructions.len() as u32);
        self.instructions.push(Instruction {
            id,
            name: name.into(),
            opcode,
            shape,
            operands: operands.to_vec(),
        });
        id
    }

    pub fn parameter(&mut self, number: u32, name: impl Into<String>, shape: Shape) -> InstructionId {
        self.add_instruction(name, Opcode::Parameter(number), shape, &[])
    }

    /// Constant with a scalar shape matching the literal.
    pub fn constant(&mut self, name: impl Into<String>, literal: Literal) -> InstructionId {
        let shape = Shape::scalar(literal.element_type());
        self.add_instruction(name, Opcode::Constant(literal), shape, &[])
    }

    pub fn binary(
        &mut self,
        name: impl Into<String>,
        opcode: Opcode,
        lhs: InstructionId,
        rhs: InstructionId,
    ) -> InstructionId {
        let shape = self.shape_of(lhs);
        self.add_instruction(name, opcode, shape, &[lhs, rhs])
    }

    pub fn unary(&mut self, name: impl Into<String>, opcode: Opcode, operand: InstructionId) -> InstructionId {
        let shape = self.shape_of(operand);
        self.add_instruction(name, opcode, shape, &[operand])
    }

    pub fn convert(
        &mut self,
        name: impl Into<String>,
        operand: InstructionId,
        to: ElementType,
    ) -> InstructionId {
        let mut shape = self.shape_of(operand);
        shape.element_type = to;
        self.add_instruction(name, Opcode::Convert, shape, &[operand])
    }

    pub fn set_root(&mut self, root: InstructionId) {
        self.root = Some(root);
    }

    fn shape_of(&self, id: InstructionId) -> Shape {
        self.instructions
            .get(id.0 as usize)
            .map(|inst| inst.shape.clone())
            .unwrap_or_else(|| Shape::scalar(ElementType::F32))
    }

    pub fn build(self) -> Result<Computation, ModuleError> {
        if self.instructions.is_empty() {
            return Err(ModuleError::EmptyComputation { name: self.name });
        }

        let mut parameter_numbers = Vec::new();
        for inst in &self.instructions {
            if inst.shape.checked_byte_size().is_none() {
                return Err(ModuleError::ShapeTooLarge {
                    instruction: inst.name.clone(),
                    shape: inst.shape.clone(),
                });
            }
            if inst.operands.len() != inst.opcode.arity() {
                return Err(ModuleError::OperandCount {
                    instruction: inst.name.clone(),
                    expected: inst.opcode.arity(),
                    actual: inst.operands.len(),
                });
            }

            for operand in &inst.operands {
                if operand.0 >= inst.id.0 {
                    return Err(ModuleError::OperandOutOfOrder {
                        instruction: inst.name.clone(),
                        operand: operand.0,
                    });
                }
                let operand_shape = &self.instructions[operand.0 as usize].shape;
                let types_must_match = !matches!(inst.opcode, Opcode::Convert);
                if !operand_shape.same_dims(&inst.shape)
                    || (types_must_match && operand_shape.element_type != inst.shape.element_type)
                {
                    return Err(ModuleError::ShapeMismatch {
                        instruction: inst.name.clone(),
                        expected: operand_shape.clone(),
                        actual: inst.shape.clone(),
                    });
                }
            }

            match inst.opcode {
                Opcode::Parameter(n) => {
                    if parameter_numbers.contains(&n) {
                        return Err(ModuleError::DuplicateParameter { number: n });
                    }
                    parameter_numbers.push(n);
                }
                Opcode::Constant(lit) if lit.element_type() != inst.shape.element_type => {
                    return Err(ModuleError::ShapeMismatch {
                        instruction: inst.name.clone(),
                        expected: Shape::new(lit.element_type(), inst.shape.dims.clone()),
                        actual: inst.shape.clone(),
                    });
                }
                _ => {}
            }
        }

        parameter_numbers.sort_unstable();
        for (expected, actual) in parameter_numbers.iter().enumerate() {
            if *actual != expected as u32 {
                return Err(ModuleError::ParameterGap {
                    missing: expected as u32,
                });
            }
        }

        let root = match self.root {
            Some(root) if (root.0 as usize) < self.instructions.len() => root,
            Some(root) => return Err(ModuleError::InvalidRoot { root: root.0 }),
            None => InstructionId(self.instructions.len() as u32 - 1),
        };

        Ok(Computation {
            name: self.name,
            parameter_count: parameter_numbers.len() as u32,
            instructions: self.instructions,
            root,
        })
    }
}

/// Back-end debug options carried by a module's config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugOptions {
    /// 0 disables constant folding and dead value elimination.
    pub backend_optimization_level: u8,
    /// Target passes to skip, by name.
    pub disabled_passes: Vec<String>,
    /// Threads per block for accelerator kernels.
    pub kernel_block_size: u32,
}

impl Default for DebugOptions {
    fn default() -> Self {
        Self {
            backend_optimization_level: 2,
            disabled_passes: Vec::new(),
            kernel_block_size: 256,
        }
    }
}

impl DebugOptions {
    pub fn is_pass_disabled(&self, name: &str) -> bool {
        self.disabled_passes.iter().any(|p| p == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleConfig {
    pub debug_options: DebugOptions,
}

/// An optimized computation graph plus its configuration.
///
/// `Clone` produces an independent copy with a fresh [`unique_id`](Self::unique_id).
#[derive(Debug)]
pub struct ComputationModule {
    name: String,
    unique_id: u64,
    config: ModuleConfig,
    entry: Computation,
}

impl ComputationModule {
    pub fn new(name: impl Into<String>, config: ModuleConfig, entry: Computation) -> Self {
        Self {
            name: name.into(),
            unique_id: next_module_id(),
            config,
            entry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn entry_computation(&self) -> &Computation {
        &self.entry
    }

    /// Shape produced by the entry computation's root.
    pub fn result_shape(&self) -> &Shape {
        &self.entry.root().shape
    }

    /// Clone under the name `<name>.<suffix>`.
    pub fn clone_with_suffix(&self, suffix: &str) -> Self {
        let mut cloned = self.clone();
        cloned.name = format!("{}.{}", self.name, suffix);
        cloned
    }
}

impl Clone for ComputationModule {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            unique_id: next_module_id(),
            config: self.config.clone(),
            entry: self.entry.clone(),
        }
    }
}

impl fmt::Display for ComputationModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "HloModule {}", self.name)?;
        writeln!(f, "ENTRY {} {{", self.entry.name)?;
        let root = self.entry.root;
        for inst in &self.entry.instructions {
            f.write_str("  ")?;
            if inst.id == root {
                f.write_str("ROOT ")?;
            }
            write!(f, "{} = {} {}(", inst.name, inst.shape, inst.opcode.name())?;
            match inst.opcode {
                Opcode::Parameter(n) => write!(f, "{n}")?,
                Opcode::Constant(lit) => write!(f, "{lit}")?,
                _ => {
                    for (i, op) in inst.operands.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        f.write_str(&self.entry.instruction(*op).name)?;
                    }
                }
            }
            writeln!(f, ")")?;
        }
        writeln!(f, "}}")
    }
}
