// This module provides the back-end compiler: one Compiler type parameterized by a Target
// variant, so orchestration exists once and variants only differ in lowering, target passes
// and code generation. The caller chooses the Target from the platform it resolved; the
// compiler never looks at a platform to pick one. run_backend compiles one module for one
// device. compile takes parallel sequences of modules and device sets, validates all of them
// before any work starts (matching lengths, non-empty device sets, devices and allocator from
// the right platform), then compiles every module/device pair. When a module has several
// devices the first device receives the module itself and each further device an independent
// clone with its own unique id. Pairs run on a rayon pool by default or sequentially on the
// calling thread. A compiler created for a backend owns a pool sized by the backend's
// intra-op parallelism, otherwise the global rayon pool is used; results come back in module order, then device order within a module. Any
// failure fails the whole batch and no partial results are returned.

//! The back-end compiler.
//!
//! ```no_run
//! use tpde_hlo::compiler::{Compiler, Target};
//! use tpde_hlo::core::{Backend, BackendOptions, PlatformRegistry};
//! use tpde_hlo::hlo::parse_module;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = PlatformRegistry::with_host();
//! let backend = Backend::create(BackendOptions::new(registry.find_by_name("Host")?))?;
//! let compiler = Compiler::new(Target::Host);
//! compiler.set_pre_codegen_hook(|lir| {
//!     println!("{lir}");
//!     Ok(())
//! });
//! let module = parse_module("HloModule m\nENTRY e {\n  ROOT p = f32[4] parameter(0)\n}\n")?;
//! let executable = compiler.run_backend(module, backend.default_device(), None)?;
//! # Ok(())
//! # }
//! ```

pub mod buffer_assignment;
pub mod executable;
pub mod hooks;
mod pipeline;
pub mod target;

pub use buffer_assignment::{BufferAllocation, BufferAssignment, BufferKind};
pub use executable::{Executable, ExecutablePayload};
pub use hooks::{Hook, HookError, HookPolicy, HookStage};
pub use target::Target;

use crate::core::{Backend, CompileError, CompileResult, DeviceAllocator, ExecutionDevice};
use crate::hlo::ComputationModule;
use crate::lir::LirModule;
use hooks::HookRegistry;
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;

/// How the pairs of a batch are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchParallelism {
    /// Compile pairs concurrently on the compiler's rayon pool.
    #[default]
    Parallel,
    /// Compile pairs one after another on the calling thread.
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompilerOptions {
    pub hook_policy: HookPolicy,
    pub batch_parallelism: BatchParallelism,
}

/// Back-end compiler for one target variant.
pub struct Compiler {
    target: Target,
    options: CompilerOptions,
    hooks: HookRegistry,
    pool: Option<rayon::ThreadPool>,
}

impl Compiler {
    pub fn new(target: Target) -> Self {
        Self::with_options(target, CompilerOptions::default())
    }

    pub fn with_options(target: Target, options: CompilerOptions) -> Self {
        Self {
            target,
            options,
            hooks: HookRegistry::new(options.hook_policy),
            pool: None,
        }
    }

    /// Compiler for the variant matching `backend`'s platform. Parallel batches
    /// run on a dedicated pool of `backend.intra_op_parallelism_threads()` threads.
    pub fn for_backend(backend: &Backend, options: CompilerOptions) -> CompileResult<Self> {
        let platform = backend.platform();
        let threads = backend.intra_op_parallelism_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("hlo-compile-{i}"))
            .build()
            .map_err(|e| CompileError::BackendInitialization {
                platform: platform.name().to_string(),
                reason: format!("cannot start {threads} compilation threads: {e}"),
            })?;

        let mut compiler = Self::with_options(Target::for_kind(platform.kind()), options);
        compiler.pool = Some(pool);
        Ok(compiler)
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn options(&self) -> CompilerOptions {
        self.options
    }

    /// Threads available to a parallel batch.
    pub fn batch_threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, rayon::ThreadPool::current_num_threads)
    }

    /// Replace the hook run after lowering. Applies to calls started afterwards.
    pub fn set_pre_codegen_hook<F>(&self, hook: F)
    where
        F: Fn(&LirModule<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.hooks.set(HookStage::PreCodegen, Arc::new(hook));
    }

    /// Replace the hook run after the target passes. Applies to calls started afterwards.
    pub fn set_post_codegen_hook<F>(&self, hook: F)
    where
        F: Fn(&LirModule<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.hooks.set(HookStage::PostCodegen, Arc::new(hook));
    }

    pub fn clear_hooks(&self) {
        self.hooks.clear();
    }

    /// Compile `module` for `device`.
    pub fn run_backend(
        &self,
        module: ComputationModule,
        device: &ExecutionDevice,
        allocator: Option<&dyn DeviceAllocator>,
    ) -> CompileResult<Executable> {
        self.validate_device(device, allocator)?;
        let hooks = self.hooks.snapshot();
        self.compile_one(&module, device, allocator, &hooks)
    }

    /// Compile `modules[i]` for every device in `device_sets[i]`.
    ///
    /// Returns one executable per module/device pair, module-major. Fails as a
    /// whole if any pair fails.
    pub fn compile(
        &self,
        modules: Vec<ComputationModule>,
        device_sets: Vec<Vec<ExecutionDevice>>,
        allocator: Option<&dyn DeviceAllocator>,
    ) -> CompileResult<Vec<Executable>> {
        if modules.len() != device_sets.len() {
            return Err(CompileError::invalid_argument(format!(
                "got {} modules but {} device sets",
                modules.len(),
                device_sets.len()
            )));
        }
        for (module, devices) in modules.iter().zip(&device_sets) {
            if devices.is_empty() {
                return Err(CompileError::invalid_argument(format!(
                    "empty device set for module {}",
                    module.name()
                )));
            }
            for device in devices {
                self.validate_device(device, allocator)?;
            }
        }

        let hooks = self.hooks.snapshot();
        let jobs = replicate(modules, device_sets);
        log::info!(
            "Compiling batch of {} module/device pairs with the {} back end",
            jobs.len(),
            self.target
        );

        match self.options.batch_parallelism {
            BatchParallelism::Parallel => {
                let run = || -> CompileResult<Vec<Executable>> {
                    jobs.into_par_iter()
                        .map(|(module, device)| self.compile_one(&module, &device, allocator, &hooks))
                        .collect()
                };
                match &self.pool {
                    Some(pool) => pool.install(run),
                    None => run(),
                }
            }
            BatchParallelism::Sequential => jobs
                .into_iter()
                .map(|(module, device)| self.compile_one(&module, &device, allocator, &hooks))
                .collect(),
        }
    }
}

/// Pair every module with each of its devices; the first device gets the module itself.
fn replicate(
    modules: Vec<ComputationModule>,
    device_sets: Vec<Vec<ExecutionDevice>>,
) -> Vec<(ComputationModule, ExecutionDevice)> {
    let mut jobs = Vec::with_capacity(device_sets.iter().map(Vec::len).sum());
    for (module, devices) in modules.into_iter().zip(device_sets) {
        let clones: Vec<ComputationModule> = (1..devices.len()).map(|_| module.clone()).collect();
        let copies = std::iter::once(module).chain(clones);
        jobs.extend(copies.zip(devices));
    }
    jobs
}

impl fmt::Debug for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiler")
            .field("target", &self.target)
            .field("options", &self.options)
            .field("batch_threads", &self.batch_threads())
            .field("pre_codegen_hook", &self.hooks.is_set(HookStage::PreCodegen))
            .field("post_codegen_hook", &self.hooks.is_set(HookStage::PostCodegen))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Backend, BackendOptions, Platform};
    use crate::hlo::parse_module;

    fn module(name: &str) -> ComputationModule {
        parse_module(&format!(
            "HloModule {name}\nENTRY e {{\n  p = s32[4] parameter(0)\n  ROOT n = s32[4] negate(p)\n}}\n"
        ))
        .unwrap()
    }

    #[test]
    fn test_replicate_order_and_identity() {
        let backend = Backend::create(BackendOptions::new(Arc::new(Platform::host()))).unwrap();
        let device = backend.default_device().clone();
        let a = module("a");
        let b = module("b");
        let (a_id, b_id) = (a.unique_id(), b.unique_id());

        let jobs = replicate(
            vec![a, b],
            vec![vec![device.clone(), device.clone(), device.clone()], vec![device.clone()]],
        );
        let names: Vec<_> = jobs.iter().map(|(m, _)| m.name().to_string()).collect();
        assert_eq!(names, ["a", "a", "a", "b"]);
        assert_eq!(jobs[0].0.unique_id(), a_id);
        assert_ne!(jobs[1].0.unique_id(), a_id);
        assert_ne!(jobs[1].0.unique_id(), jobs[2].0.unique_id());
        assert_eq!(jobs[3].0.unique_id(), b_id);
    }

    #[test]
    fn test_for_backend_sizes_pool() {
        let platform = Arc::new(Platform::host());
        let backend = Backend::create(
            BackendOptions::new(platform).with_intra_op_parallelism_threads(2),
        )
        .unwrap();
        let compiler = Compiler::for_backend(&backend, CompilerOptions::default()).unwrap();
        assert_eq!(compiler.target(), Target::Host);
        assert_eq!(compiler.batch_threads(), 2);
        assert_eq!(Compiler::new(Target::Host).batch_threads(), rayon::current_num_threads());
    }

    #[test]
    fn test_debug_shows_hooks() {
        let compiler = Compiler::new(Target::Host);
        compiler.set_post_codegen_hook(|_| Ok(()));
        let text = format!("{compiler:?}");
        assert!(text.contains("pre_codegen_hook: false"));
        assert!(text.contains("post_codegen_hook: true"));
    }
}
