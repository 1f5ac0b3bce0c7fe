// This module defines the low-level representation (LIR) that sits between the computation
// module and target code generation, and that hooks observe. A LirModule lives in the
// compilation session's bumpalo arena: names are interned there and functions and their
// instruction lists are bump-allocated vectors, so the whole module disappears with the
// session. Each LirFunction computes one output element per index from its parameters in
// a straight-line body (LoadParam, Const, Binary, Unary, Convert, StoreOutput); the function
// form says how indices are produced, either a host loop over all elements or a device
// kernel launched with block/grid dimensions. The textual form printed by Display is what
// instrumentation hooks typically inspect.

//! Low-level representation handed to hooks and target code generators.

pub mod lower;
pub mod passes;

use bumpalo::collections::Vec as BumpVec;
use std::fmt;

pub use lower::{lower_module, LoweringTarget};
pub use passes::{
    AssignLaunchDimensions, EliminateDeadValues, FoldConstants, LirPass, PassPipeline, VerifyLir,
};

/// SSA value number, unique within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    I32,
    F32,
}

impl ScalarType {
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::I32 => "i32",
            ScalarType::F32 => "f32",
        }
    }

    pub fn byte_size(self) -> u32 {
        4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

impl BinOp {
    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Max => "max",
            BinOp::Min => "min",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LirInst {
    /// Element `index` of parameter `param`, or element 0 when `broadcast`.
    LoadParam {
        dst: ValueId,
        ty: ScalarType,
        param: u32,
        broadcast: bool,
    },
    /// 32-bit constant given by its bit pattern.
    Const { dst: ValueId, ty: ScalarType, bits: u32 },
    Binary {
        dst: ValueId,
        op: BinOp,
        ty: ScalarType,
        lhs: ValueId,
        rhs: ValueId,
    },
    Unary {
        dst: ValueId,
        op: UnOp,
        ty: ScalarType,
        src: ValueId,
    },
    Convert {
        dst: ValueId,
        from: ScalarType,
        to: ScalarType,
        src: ValueId,
    },
    /// Write `src` to element `index` of the output buffer.
    StoreOutput { ty: ScalarType, src: ValueId },
}

impl LirInst {
    /// Value defined by the instruction.
    pub fn dst(&self) -> Option<ValueId> {
        match *self {
            LirInst::LoadParam { dst, .. }
            | LirInst::Const { dst, .. }
            | LirInst::Binary { dst, .. }
            | LirInst::Unary { dst, .. }
            | LirInst::Convert { dst, .. } => Some(dst),
            LirInst::StoreOutput { .. } => None,
        }
    }

    /// Values read by the instruction.
    pub fn operands(&self) -> impl Iterator<Item = ValueId> {
        let (a, b) = match *self {
            LirInst::LoadParam { .. } | LirInst::Const { .. } => (None, None),
            LirInst::Binary { lhs, rhs, .. } => (Some(lhs), Some(rhs)),
            LirInst::Unary { src, .. }
            | LirInst::Convert { src, .. }
            | LirInst::StoreOutput { src, .. } => (Some(src), None),
        };
        a.into_iter().chain(b)
    }

    /// Type of the value produced (or stored).
    pub fn ty(&self) -> ScalarType {
        match *self {
            LirInst::LoadParam { ty, .. }
            | LirInst::Const { ty, .. }
            | LirInst::Binary { ty, .. }
            | LirInst::Unary { ty, .. }
            | LirInst::StoreOutput { ty, .. } => ty,
            LirInst::Convert { to, .. } => to,
        }
    }
}

impl fmt::Display for LirInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LirInst::LoadParam {
                dst,
                ty,
                param,
                broadcast,
            } => {
                let suffix = if broadcast { ".bcast" } else { "" };
                write!(f, "{dst} = load.param{suffix} {} {param}", ty.name())
            }
            LirInst::Const { dst, ty, bits } => match ty {
                ScalarType::I32 => write!(f, "{dst} = const i32 {}", bits as i32),
                ScalarType::F32 => write!(f, "{dst} = const f32 {:#010x}", bits),
            },
            LirInst::Binary {
                dst,
                op,
                ty,
                lhs,
                rhs,
            } => write!(f, "{dst} = {} {} {lhs}, {rhs}", op.name(), ty.name()),
            LirInst::Unary { dst, ty, src, .. } => write!(f, "{dst} = neg {} {src}", ty.name()),
            LirInst::Convert { dst, from, to, src } => {
                write!(f, "{dst} = convert {} {src} to {}", from.name(), to.name())
            }
            LirInst::StoreOutput { ty, src } => write!(f, "store.out {} {src}", ty.name()),
        }
    }
}

/// A parameter or output buffer of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LirBuffer {
    pub ty: ScalarType,
    pub element_count: u64,
}

/// How the per-element body is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionForm {
    /// One call loops over every element.
    HostLoop,
    /// One thread per element; `grid_size` is 0 until launch dimensions are assigned.
    Kernel { block_size: u32, grid_size: u32 },
}

pub struct LirFunction<'a> {
    pub(crate) name: &'a str,
    pub(crate) params: BumpVec<'a, LirBuffer>,
    pub(crate) output: LirBuffer,
    pub(crate) body: BumpVec<'a, LirInst>,
    pub(crate) value_count: u32,
    pub(crate) form: FunctionForm,
}

impl<'a> LirFunction<'a> {
    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn params(&self) -> &[LirBuffer] {
        &self.params
    }

    pub fn output(&self) -> LirBuffer {
        self.output
    }

    pub fn body(&self) -> &[LirInst] {
        &self.body
    }

    /// Upper bound on value numbers used by the body.
    pub fn value_count(&self) -> u32 {
        self.value_count
    }

    pub fn form(&self) -> FunctionForm {
        self.form
    }
}

impl fmt::Display for LirFunction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.form {
            FunctionForm::HostLoop => f.write_str("define host_loop")?,
            FunctionForm::Kernel {
                block_size,
                grid_size,
            } => write!(f, "define kernel(block={block_size}, grid={grid_size})")?,
        }
        write!(f, " void @{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            write!(f, "{}* %param.{i}, ", param.ty.name())?;
        }
        writeln!(
            f,
            "{}* %out) [elements={}] {{",
            self.output.ty.name(),
            self.output.element_count
        )?;
        for inst in self.body.iter() {
            writeln!(f, "  {inst}")?;
        }
        writeln!(f, "}}")
    }
}

/// Lowered module, allocated in a compilation session arena.
pub struct LirModule<'a> {
    pub(crate) name: &'a str,
    pub(crate) source_module_id: u64,
    pub(crate) target_triple: &'a str,
    pub(crate) data_layout: &'a str,
    pub(crate) functions: BumpVec<'a, LirFunction<'a>>,
}

impl<'a> LirModule<'a> {
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Unique id of the computation module this was lowered from.
    pub fn source_module_id(&self) -> u64 {
        self.source_module_id
    }

    pub fn target_triple(&self) -> &'a str {
        self.target_triple
    }

    pub fn data_layout(&self) -> &'a str {
        self.data_layout
    }

    pub fn functions(&self) -> &[LirFunction<'a>] {
        &self.functions
    }

    /// The entry function. Lowering always produces exactly one.
    pub fn entry(&self) -> &LirFunction<'a> {
        &self.functions[0]
    }

    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(|func| func.body.len()).sum()
    }
}

impl fmt::Display for LirModule<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        writeln!(f, "target datalayout = \"{}\"", self.data_layout)?;
        writeln!(f, "target triple = \"{}\"", self.target_triple)?;
        for func in self.functions.iter() {
            writeln!(f)?;
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for LirModule<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LirModule")
            .field("name", &self.name)
            .field("target_triple", &self.target_triple)
            .field("functions", &self.functions.len())
            .finish()
    }
}
