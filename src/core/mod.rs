// This module is the hub for the setup-side infrastructure shared by every compiler variant:
// the error taxonomy, arena-backed compilation sessions, execution platforms and their
// registry, backends that own a platform's devices, and the device allocator binding. None
// of it depends on a particular target; the compiler and the target back ends build on it.

//! Core infrastructure.
//!
//! # Key Components
//!
//! - [`platform`]: platforms, device enumeration, the name-keyed registry
//! - [`backend`]: device ownership per platform
//! - [`allocator`]: the optional device memory allocator
//! - [`session`]: per-compilation arena and statistics
//! - [`error`]: `CompileError` and `CompileResult`

pub mod allocator;
pub mod backend;
pub mod error;
pub mod platform;
pub mod session;
pub mod test_utils;

pub use allocator::{AllocationError, DeviceAllocator, DeviceMemory, TrackingAllocator};
pub use backend::{Backend, BackendOptions, ExecutionDevice};
pub use error::{CompileError, CompileResult};
pub use platform::{
    DeviceArch, DeviceDescription, DeviceEnumerator, HostDevices, Platform, PlatformKind,
    PlatformRegistry, StaticDevices,
};
pub use session::{CompilationSession, SessionStats};
