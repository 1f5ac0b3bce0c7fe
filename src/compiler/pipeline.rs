// This module implements the single-module pipeline shared by every back-end variant and the
// fail-fast validation that precedes it. One module/device pair is compiled in its own
// CompilationSession over a fresh bumpalo arena, in fixed stages: lower once, run the
// pre-codegen hook, run the target passes, run the post-codegen hook, assign buffers (and
// pre-plan them on accelerator devices when an allocator is given), then generate and link.
// A failing stage returns immediately, so a vetoing pre-codegen hook means the target passes,
// the post-codegen hook and code generation never run. Hooks come from the snapshot taken
// when the public call started and are invoked through the registry's policy.

use super::buffer_assignment::BufferAssignment;
use super::executable::Executable;
use super::hooks::{HookSnapshot, HookStage};
use super::Compiler;
use crate::core::{CompilationSession, CompileError, CompileResult, DeviceAllocator, ExecutionDevice};
use crate::hlo::ComputationModule;
use crate::lir::{lower_module, LirModule};
use bumpalo::Bump;

impl Compiler {
    /// Reject devices from another platform family and allocators for another platform.
    pub(crate) fn validate_device(
        &self,
        device: &ExecutionDevice,
        allocator: Option<&dyn DeviceAllocator>,
    ) -> CompileResult<()> {
        if device.platform_kind() != self.target().platform_kind() {
            return Err(CompileError::invalid_argument(format!(
                "device {device} belongs to a {} platform, but this compiler targets {}",
                device.platform_kind(),
                self.target()
            )));
        }
        if let Some(allocator) = allocator {
            if self.target().is_accelerator() && allocator.platform_name() != device.platform_name() {
                return Err(CompileError::invalid_argument(format!(
                    "allocator serves platform {}, but device {device} is on {}",
                    allocator.platform_name(),
                    device.platform_name()
                )));
            }
        }
        Ok(())
    }

    /// Compile one module for one device. Callers validate first.
    pub(crate) fn compile_one(
        &self,
        module: &ComputationModule,
        device: &ExecutionDevice,
        allocator: Option<&dyn DeviceAllocator>,
        hooks: &HookSnapshot,
    ) -> CompileResult<Executable> {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let options = &module.config().debug_options;
        let target = self.target();

        log::debug!(
            "Compiling module {} (id {}) for {device} with the {target} back end",
            module.name(),
            module.unique_id()
        );

        let mut lir = lower_module(module, &target.lowering_target(options), &session)?;

        self.run_hook(HookStage::PreCodegen, hooks, &lir, &session)?;

        target.pass_pipeline(options).run(&mut lir, options, &session)?;
        log::debug!(
            "Target passes left {} instructions in {}",
            lir.instruction_count(),
            lir.name()
        );

        self.run_hook(HookStage::PostCodegen, hooks, &lir, &session)?;

        let buffers = BufferAssignment::for_module(&lir);
        let preplanned_bytes = match allocator {
            Some(allocator) if target.is_accelerator() => Some(buffers.preplan(allocator, device)?),
            _ => None,
        };

        let payload = target.generate(&lir, device)?;
        session.record_code_size(payload.code_size());

        let executable = Executable {
            module_name: module.name().to_string(),
            module_id: module.unique_id(),
            device: device.clone(),
            entry_symbol: lir.entry().name().to_string(),
            payload,
            buffers,
            stats: session.stats(),
            preplanned_bytes,
        };
        log::debug!("Produced {executable}");
        Ok(executable)
    }

    fn run_hook(
        &self,
        stage: HookStage,
        hooks: &HookSnapshot,
        lir: &LirModule<'_>,
        session: &CompilationSession<'_>,
    ) -> CompileResult<()> {
        let Some(hook) = hooks.get(stage) else {
            return Ok(());
        };
        log::trace!("Running {stage} hook on {}", lir.name());
        self.hooks
            .invoke(hook, lir)
            .map_err(|source| CompileError::HookFailure {
                stage,
                module: lir.name().to_string(),
                source,
            })?;
        session.record_hook_invoked();
        Ok(())
    }
}
