// This module groups the accelerator code generators. Kernel-form LIR functions are printed
// as PTX for CUDA devices (keyed by compute capability) and as AMDGCN assembly for ROCm
// devices (keyed by gfx architecture). Both produce a KernelImage holding the assembly text,
// the entry symbol and the launch dimensions assigned by the target passes. The triples and
// data layouts used while lowering for these targets are defined here as well.

//! Accelerator kernel generation.
//!
//! Both accelerator families print textual kernels; loading them into a
//! device context is the runtime's job.

pub mod amdgcn;
pub mod ptx;

pub const NVPTX_TRIPLE: &str = "nvptx64-nvidia-cuda";
pub const NVPTX_DATA_LAYOUT: &str = "e-i64:64-i128:128-v16:16-v32:32-n16:32:64";

pub const AMDGPU_TRIPLE: &str = "amdgcn-amd-amdhsa";
pub const AMDGPU_DATA_LAYOUT: &str =
    "e-p:64:64-p1:64:64-p2:32:32-p3:32:32-p4:64:64-p5:32:32-i64:64-v16:16-v24:32-v32:32-n32:64-S32-A5-G1";

/// A device kernel plus its launch configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelImage {
    pub assembly: String,
    pub entry: String,
    pub block_size: u32,
    pub grid_size: u32,
}
