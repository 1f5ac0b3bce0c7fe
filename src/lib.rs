//! tpde-hlo - target back-end compilation for computation modules.
//!
//! Takes an already-optimized computation module (an element-wise graph with
//! a fixed schedule), lowers it to a small arena-allocated low-level IR,
//! lets callers observe that IR through pre- and post-codegen hooks, and
//! produces executables bound to a concrete execution device. One compiler
//! contract covers the host (x86-64 ELF objects) and two accelerator
//! families (PTX and AMDGCN kernels); batches of modules can be compiled
//! against many devices at once.
//!
//! # Primary Usage
//!
//! ```no_run
//! use tpde_hlo::compiler::{Compiler, Target};
//! use tpde_hlo::core::{Backend, BackendOptions, PlatformRegistry};
//! use tpde_hlo::hlo::parse_module;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = PlatformRegistry::with_host();
//! let platform = registry.find_by_name("Host")?;
//! let backend = Backend::create(BackendOptions::new(platform))?;
//!
//! let module = parse_module(
//!     "HloModule add_one\nENTRY main {\n  p0 = f32[4] parameter(0)\n  one = f32[4] constant(1)\n  ROOT sum = f32[4] add(p0, one)\n}\n",
//! )?;
//! let compiler = Compiler::new(Target::Host);
//! let executable = compiler.run_backend(module, backend.default_device(), None)?;
//! println!("{executable}");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`core`] - platforms, backends, allocators, sessions, errors
//! - [`hlo`] - computation modules and their text format
//! - [`lir`] - the low-level IR, lowering and target passes
//! - [`compiler`] - hooks, back-end variants, single and batch pipelines
//! - [`x64`] - host machine code and ELF objects
//! - [`gpu`] - PTX and AMDGCN kernels

pub mod compiler;
pub mod core;
pub mod gpu;
pub mod hlo;
pub mod lir;
pub mod x64;

pub use crate::compiler::{
    BatchParallelism, Compiler, CompilerOptions, Executable, ExecutablePayload, HookError,
    HookPolicy, HookStage, Target,
};
pub use crate::core::{
    Backend, BackendOptions, CompilationSession, CompileError, CompileResult, DeviceAllocator,
    ExecutionDevice, Platform, PlatformKind, PlatformRegistry, SessionStats,
};
pub use crate::hlo::{ComputationModule, ModuleConfig};
pub use crate::lir::LirModule;
