//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use tpde_hlo::compiler::Target;
use tpde_hlo::core::{
    Backend, BackendOptions, DeviceArch, DeviceDescription, ExecutionDevice, Platform,
    PlatformKind, PlatformRegistry, StaticDevices,
};
use tpde_hlo::hlo::{parse_module, ComputationModule};

pub const ADD_ONE: &str = "\
HloModule add_one
ENTRY main {
  p0 = f32[4] parameter(0)
  one = f32[4] constant(1)
  ROOT sum = f32[4] add(p0, one)
}
";

pub const FOLDABLE: &str = "\
HloModule foldable
ENTRY main {
  x = s32[16] parameter(0)
  a = s32[16] constant(6)
  b = s32[16] constant(7)
  c = s32[16] multiply(a, b)
  ROOT r = s32[16] add(x, c)
}
";

pub const INT_DIVIDE: &str = "\
HloModule int_divide
ENTRY main {
  a = s32[8] parameter(0)
  b = s32[8] parameter(1)
  ROOT q = s32[8] divide(a, b)
}
";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn module(text: &str) -> ComputationModule {
    parse_module(text).unwrap()
}

/// Host plus simulated two-device CUDA and ROCM platforms.
pub fn registry() -> PlatformRegistry {
    let mut registry = PlatformRegistry::with_host();
    let cuda = (0..2)
        .map(|i| {
            DeviceDescription::new(
                format!("sim-a100-{i}"),
                DeviceArch::Cuda { major: 8, minor: 0 },
                40 << 30,
            )
        })
        .collect();
    registry
        .register(Platform::new("CUDA", PlatformKind::Cuda, StaticDevices(cuda)))
        .unwrap();
    let rocm = (0..2)
        .map(|i| {
            DeviceDescription::new(
                format!("sim-mi200-{i}"),
                DeviceArch::Rocm {
                    gfx: "gfx90a".to_string(),
                },
                64 << 30,
            )
        })
        .collect();
    registry
        .register(Platform::new("ROCM", PlatformKind::Rocm, StaticDevices(rocm)))
        .unwrap();
    registry
}

pub fn backend(name: &str) -> Backend {
    let platform = registry().find_by_name(name).unwrap();
    Backend::create(BackendOptions::new(platform)).unwrap()
}

/// Every back-end variant with a backend for its platform.
pub fn all_variants() -> Vec<(Target, Backend)> {
    ["Host", "CUDA", "ROCM"]
        .into_iter()
        .map(|name| {
            let backend = backend(name);
            (Target::for_kind(backend.platform().kind()), backend)
        })
        .collect()
}

pub fn devices(backend: &Backend) -> Vec<ExecutionDevice> {
    backend.devices().to_vec()
}

pub fn host_platform() -> Arc<Platform> {
    registry().find_by_name("Host").unwrap()
}
