// This module defines the DeviceAllocator capability that callers may thread through a
// compilation. Allocators are borrowed for the duration of one compile call, never owned by
// the compiler, and must be Send + Sync because a parallel batch can hit them from several
// worker threads at once. Accelerator back ends use the allocator to pre-plan device memory
// (reserve the planned buffers and release them again); the host ignores it.
// TrackingAllocator is a capacity-limited reference implementation keyed by device ordinal,
// guarded by a parking_lot mutex, that records live bytes and allocation counts.

//! Device memory allocator binding.

use hashbrown::HashMap;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },

    #[error("unknown device ordinal {0}")]
    UnknownDevice(usize),

    #[error("allocation {0:#x} is not live")]
    NotLive(u64),
}

/// Opaque handle to device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceMemory {
    pub address: u64,
    pub size: u64,
}

/// Device memory allocator shared by concurrent compilations.
pub trait DeviceAllocator: Send + Sync {
    /// Platform whose devices this allocator serves.
    fn platform_name(&self) -> &str;

    fn allocate(&self, device_ordinal: usize, size: u64) -> Result<DeviceMemory, AllocationError>;

    fn deallocate(&self, device_ordinal: usize, memory: DeviceMemory) -> Result<(), AllocationError>;
}

#[derive(Debug, Default)]
struct DeviceArena {
    next_address: u64,
    live: HashMap<u64, u64>,
    live_bytes: u64,
    total_allocations: u64,
}

/// Capacity-limited allocator that tracks every allocation.
#[derive(Debug)]
pub struct TrackingAllocator {
    platform_name: String,
    capacity_per_device: u64,
    devices: Mutex<HashMap<usize, DeviceArena>>,
}

impl TrackingAllocator {
    pub fn new(platform_name: impl Into<String>, device_count: usize, capacity_per_device: u64) -> Self {
        let devices = (0..device_count)
            .map(|ordinal| {
                let arena = DeviceArena {
                    next_address: 0x1000,
                    ..DeviceArena::default()
                };
                (ordinal, arena)
            })
            .collect();
        Self {
            platform_name: platform_name.into(),
            capacity_per_device,
            devices: Mutex::new(devices),
        }
    }

    /// Bytes currently allocated on the device.
    pub fn live_bytes(&self, device_ordinal: usize) -> u64 {
        self.devices
            .lock()
            .get(&device_ordinal)
            .map_or(0, |arena| arena.live_bytes)
    }

    /// Allocations ever made on the device.
    pub fn total_allocations(&self, device_ordinal: usize) -> u64 {
        self.devices
            .lock()
            .get(&device_ordinal)
            .map_or(0, |arena| arena.total_allocations)
    }
}

impl DeviceAllocator for TrackingAllocator {
    fn platform_name(&self) -> &str {
        &self.platform_name
    }

    fn allocate(&self, device_ordinal: usize, size: u64) -> Result<DeviceMemory, AllocationError> {
        let mut devices = self.devices.lock();
        let arena = devices
            .get_mut(&device_ordinal)
            .ok_or(AllocationError::UnknownDevice(device_ordinal))?;

        let available = self.capacity_per_device - arena.live_bytes;
        if size > available {
            return Err(AllocationError::OutOfMemory {
                requested: size,
                available,
            });
        }

        let address = arena.next_address;
        // Keep addresses 256-byte aligned like real device allocators.
        arena.next_address += size.max(1).next_multiple_of(256);
        arena.live.insert(address, size);
        arena.live_bytes += size;
        arena.total_allocations += 1;
        Ok(DeviceMemory { address, size })
    }

    fn deallocate(&self, device_ordinal: usize, memory: DeviceMemory) -> Result<(), AllocationError> {
        let mut devices = self.devices.lock();
        let arena = devices
            .get_mut(&device_ordinal)
            .ok_or(AllocationError::UnknownDevice(device_ordinal))?;
        let size = arena
            .live
            .remove(&memory.address)
            .ok_or(AllocationError::NotLive(memory.address))?;
        arena.live_bytes -= size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_release() {
        let alloc = TrackingAllocator::new("CUDA", 2, 1024);
        let a = alloc.allocate(0, 100).unwrap();
        let b = alloc.allocate(0, 200).unwrap();
        assert_ne!(a.address, b.address);
        assert_eq!(alloc.live_bytes(0), 300);
        assert_eq!(alloc.live_bytes(1), 0);

        alloc.deallocate(0, a).unwrap();
        assert_eq!(alloc.live_bytes(0), 200);
        assert_eq!(alloc.total_allocations(0), 2);
        assert_eq!(alloc.deallocate(0, a), Err(AllocationError::NotLive(a.address)));
    }

    #[test]
    fn test_capacity_limit() {
        let alloc = TrackingAllocator::new("CUDA", 1, 512);
        alloc.allocate(0, 400).unwrap();
        assert_eq!(
            alloc.allocate(0, 200),
            Err(AllocationError::OutOfMemory {
                requested: 200,
                available: 112
            })
        );
    }

    #[test]
    fn test_unknown_device() {
        let alloc = TrackingAllocator::new("ROCM", 1, 512);
        assert_eq!(alloc.allocate(3, 8), Err(AllocationError::UnknownDevice(3)));
    }

    #[test]
    fn test_concurrent_use() {
        let alloc = TrackingAllocator::new("CUDA", 1, 1 << 20);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..16 {
                        let mem = alloc.allocate(0, 64).unwrap();
                        alloc.deallocate(0, mem).unwrap();
                    }
                });
            }
        });
        assert_eq!(alloc.live_bytes(0), 0);
        assert_eq!(alloc.total_allocations(0), 64);
    }
}
