// This module defines the Executable, the result of compiling one module for one device.
// Its payload is either a relocatable x86-64 ELF object from the host back end or a textual
// kernel from an accelerator back end. The executable records which module (by name and
// unique id) and which device it was built for, the buffer assignment of the entry function,
// the statistics of the compilation session and, when an allocator pre-planned device memory,
// how many bytes that plan covered.

//! Compiled executables.
//!
//! An [`Executable`] owns its payload and a copy of everything it needs to
//! describe itself, so it outlives both the input module and the compiler.

use super::buffer_assignment::BufferAssignment;
use crate::core::{ExecutionDevice, SessionStats};
use crate::gpu::KernelImage;
use crate::x64::ObjectCode;
use std::fmt;

/// Target-specific compiled code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutablePayload {
    /// Relocatable x86-64 ELF object.
    HostObject(ObjectCode),
    /// Textual device kernel (PTX or AMDGCN).
    Kernel(KernelImage),
}

impl ExecutablePayload {
    /// Bytes of the serialized payload.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ExecutablePayload::HostObject(object) => &object.bytes,
            ExecutablePayload::Kernel(kernel) => kernel.assembly.as_bytes(),
        }
    }

    pub fn code_size(&self) -> usize {
        match self {
            ExecutablePayload::HostObject(object) => object.code_size,
            ExecutablePayload::Kernel(kernel) => kernel.assembly.len(),
        }
    }
}

/// The artifact of one successful module compilation, bound to one device.
#[derive(Debug, Clone)]
pub struct Executable {
    pub(crate) module_name: String,
    pub(crate) module_id: u64,
    pub(crate) device: ExecutionDevice,
    pub(crate) entry_symbol: String,
    pub(crate) payload: ExecutablePayload,
    pub(crate) buffers: BufferAssignment,
    pub(crate) stats: SessionStats,
    pub(crate) preplanned_bytes: Option<u64>,
}

impl Executable {
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Unique id of the module this was compiled from.
    pub fn module_id(&self) -> u64 {
        self.module_id
    }

    /// The device this executable runs on.
    pub fn device(&self) -> &ExecutionDevice {
        &self.device
    }

    pub fn entry_symbol(&self) -> &str {
        &self.entry_symbol
    }

    pub fn payload(&self) -> &ExecutablePayload {
        &self.payload
    }

    pub fn buffer_assignment(&self) -> &BufferAssignment {
        &self.buffers
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Device memory reserved during pre-planning, if an allocator was used.
    pub fn preplanned_bytes(&self) -> Option<u64> {
        self.preplanned_bytes
    }
}

impl fmt::Display for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.payload {
            ExecutablePayload::HostObject(_) => "object",
            ExecutablePayload::Kernel(_) => "kernel",
        };
        write!(
            f,
            "{} (module {}, id {}) on {}: {kind}, {} bytes",
            self.entry_symbol,
            self.module_name,
            self.module_id,
            self.device,
            self.payload.as_bytes().len()
        )
    }
}
