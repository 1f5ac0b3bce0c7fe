// This module defines the closed set of back-end variants. A Target decides only the
// target-specific parts of the pipeline: how a module is lowered (triple, data layout and
// function form), which passes run over the lowered module, and how the final artifact is
// generated for a device. Orchestration, the hook contract and batching live in the compiler
// and are shared by every variant. Accelerator variants additionally pre-plan device memory
// when the caller supplies an allocator.

//! Back-end variants.

use super::executable::ExecutablePayload;
use crate::core::{CompileError, CompileResult, DeviceArch, ExecutionDevice, PlatformKind};
use crate::gpu::{self, AMDGPU_DATA_LAYOUT, AMDGPU_TRIPLE, NVPTX_DATA_LAYOUT, NVPTX_TRIPLE};
use crate::hlo::DebugOptions;
use crate::lir::{
    AssignLaunchDimensions, EliminateDeadValues, FoldConstants, FunctionForm, LirModule,
    LoweringTarget, PassPipeline, VerifyLir,
};
use crate::x64::{self, HOST_DATA_LAYOUT, HOST_TRIPLE};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// x86-64 host CPU.
    Host,
    /// CUDA devices via PTX.
    Nvptx,
    /// ROCm devices via AMDGCN.
    Amdgpu,
}

impl Target {
    pub fn name(self) -> &'static str {
        match self {
            Target::Host => "host",
            Target::Nvptx => "nvptx",
            Target::Amdgpu => "amdgpu",
        }
    }

    /// Kind of platform whose devices this variant compiles for.
    pub fn platform_kind(self) -> PlatformKind {
        match self {
            Target::Host => PlatformKind::Host,
            Target::Nvptx => PlatformKind::Cuda,
            Target::Amdgpu => PlatformKind::Rocm,
        }
    }

    /// Variant that compiles for devices of `kind`. Inverse of [`platform_kind`](Self::platform_kind).
    pub fn for_kind(kind: PlatformKind) -> Self {
        match kind {
            PlatformKind::Host => Target::Host,
            PlatformKind::Cuda => Target::Nvptx,
            PlatformKind::Rocm => Target::Amdgpu,
        }
    }

    pub fn is_accelerator(self) -> bool {
        !matches!(self, Target::Host)
    }

    pub fn triple(self) -> &'static str {
        match self {
            Target::Host => HOST_TRIPLE,
            Target::Nvptx => NVPTX_TRIPLE,
            Target::Amdgpu => AMDGPU_TRIPLE,
        }
    }

    pub(crate) fn lowering_target(self, options: &DebugOptions) -> LoweringTarget {
        let (data_layout, form) = match self {
            Target::Host => (HOST_DATA_LAYOUT, FunctionForm::HostLoop),
            Target::Nvptx | Target::Amdgpu => {
                let layout = if self == Target::Nvptx {
                    NVPTX_DATA_LAYOUT
                } else {
                    AMDGPU_DATA_LAYOUT
                };
                let form = FunctionForm::Kernel {
                    block_size: options.kernel_block_size,
                    grid_size: 0,
                };
                (layout, form)
            }
        };
        LoweringTarget {
            triple: self.triple(),
            data_layout,
            form,
        }
    }

    pub(crate) fn pass_pipeline(self, options: &DebugOptions) -> PassPipeline {
        let mut pipeline = PassPipeline::new();
        if options.backend_optimization_level > 0 {
            pipeline = pipeline.add(FoldConstants).add(EliminateDeadValues);
        }
        if self.is_accelerator() {
            pipeline = pipeline.add(AssignLaunchDimensions {
                block_size: options.kernel_block_size,
            });
        }
        pipeline.add(VerifyLir)
    }

    pub(crate) fn generate(
        self,
        module: &LirModule<'_>,
        device: &ExecutionDevice,
    ) -> CompileResult<ExecutablePayload> {
        let arch = &device.description().arch;
        match (self, arch) {
            (Target::Host, DeviceArch::X86_64) => x64::build_object(module)
                .map(ExecutablePayload::HostObject)
                .map_err(|e| CompileError::codegen(e.to_string())),
            (Target::Nvptx, DeviceArch::Cuda { major, minor }) => {
                gpu::ptx::emit_module(module, *major, *minor).map(ExecutablePayload::Kernel)
            }
            (Target::Amdgpu, DeviceArch::Rocm { gfx }) => {
                gpu::amdgcn::emit_module(module, gfx).map(ExecutablePayload::Kernel)
            }
            _ => Err(CompileError::codegen(format!(
                "{} back end cannot generate code for device {device} ({arch:?})",
                self.name()
            ))),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
