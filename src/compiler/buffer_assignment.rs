// This module assigns device buffers to a lowered module: one allocation per entry parameter
// and one for the output, each sized by element count times element size. Accelerator back
// ends use the assignment to pre-plan device memory: every planned buffer is reserved through
// the caller's DeviceAllocator and then released again, so a device that cannot hold the
// executable's working set is reported at compile time. A failed reservation releases what
// was already reserved before the error is returned.

//! Buffer assignment and device memory pre-planning.

use crate::core::{CompileError, CompileResult, DeviceAllocator, DeviceMemory, ExecutionDevice};
use crate::lir::LirModule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Parameter(u32),
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAllocation {
    pub index: usize,
    pub kind: BufferKind,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferAssignment {
    allocations: Vec<BufferAllocation>,
}

impl BufferAssignment {
    /// Buffers of the module's entry function.
    pub fn for_module(module: &LirModule<'_>) -> Self {
        let entry = module.entry();
        let buffers = entry
            .params()
            .iter()
            .enumerate()
            .map(|(i, buf)| (BufferKind::Parameter(i as u32), buf))
            .chain(std::iter::once((BufferKind::Output, &entry.output)));

        let allocations = buffers
            .enumerate()
            .map(|(index, (kind, buf))| BufferAllocation {
                index,
                kind,
                size: buf.element_count.saturating_mul(u64::from(buf.ty.byte_size())),
            })
            .collect();
        Self { allocations }
    }

    pub fn allocations(&self) -> &[BufferAllocation] {
        &self.allocations
    }

    pub fn total_bytes(&self) -> u64 {
        self.allocations.iter().map(|a| a.size).sum()
    }

    /// Reserve and release every buffer on `device`. Returns the bytes reserved.
    pub fn preplan(
        &self,
        allocator: &dyn DeviceAllocator,
        device: &ExecutionDevice,
    ) -> CompileResult<u64> {
        let ordinal = device.ordinal();
        let mut reserved: Vec<DeviceMemory> = Vec::with_capacity(self.allocations.len());

        for allocation in &self.allocations {
            match allocator.allocate(ordinal, allocation.size) {
                Ok(memory) => reserved.push(memory),
                Err(err) => {
                    for memory in reserved {
                        if let Err(release) = allocator.deallocate(ordinal, memory) {
                            log::warn!("Failed to release pre-planned buffer on {device}: {release}");
                        }
                    }
                    return Err(CompileError::DeviceAllocation {
                        ordinal,
                        reason: format!("buffer {} ({} bytes): {err}", allocation.index, allocation.size),
                    });
                }
            }
        }

        for memory in reserved {
            allocator
                .deallocate(ordinal, memory)
                .map_err(|err| CompileError::DeviceAllocation {
                    ordinal,
                    reason: err.to_string(),
                })?;
        }

        let total = self.total_bytes();
        log::debug!("Pre-planned {total} bytes in {} buffers on {device}", self.allocations.len());
        Ok(total)
    }
}
