// This module defines execution platforms and the registry that resolves them by name.
// A Platform is identified by its name ("Host", "CUDA", "ROCM", ...), belongs to one
// PlatformKind (which decides the compatible compiler variant) and owns a DeviceEnumerator:
// the seam behind which device driver enumeration lives. Enumeration is deferred until a
// Backend is created, so discovering a platform never touches devices. The registry keeps
// platforms in registration order behind shared Arc handles and indexes them by lower-case
// name in a hashbrown map; lookups are case-insensitive and accept the `cpu` alias for the
// host platform. Lookup failures are setup errors and never construct a backend.

//! Execution platforms and the platform registry.

use super::error::{CompileError, CompileResult};
use hashbrown::HashMap;
use std::fmt;
use std::sync::Arc;

/// Platform family. Each family has exactly one compiler variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformKind {
    Host,
    Cuda,
    Rocm,
}

impl PlatformKind {
    /// Canonical platform name for the family.
    pub fn canonical_name(self) -> &'static str {
        match self {
            PlatformKind::Host => "Host",
            PlatformKind::Cuda => "CUDA",
            PlatformKind::Rocm => "ROCM",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Architecture of a single device, as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceArch {
    X86_64,
    /// CUDA compute capability.
    Cuda { major: u32, minor: u32 },
    /// AMDGPU architecture name, e.g. `gfx90a`.
    Rocm { gfx: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceDescription {
    pub name: String,
    pub arch: DeviceArch,
    pub memory_bytes: u64,
}

impl DeviceDescription {
    pub fn new(name: impl Into<String>, arch: DeviceArch, memory_bytes: u64) -> Self {
        Self {
            name: name.into(),
            arch,
            memory_bytes,
        }
    }
}

/// Device enumeration for one platform.
///
/// Implemented by driver bindings; errors are reported as backend
/// initialization failures.
pub trait DeviceEnumerator: Send + Sync {
    fn enumerate(&self) -> Result<Vec<DeviceDescription>, String>;
}

/// The host exposes a single device. Host code is always x86-64 System V.
#[derive(Debug, Default)]
pub struct HostDevices;

impl DeviceEnumerator for HostDevices {
    fn enumerate(&self) -> Result<Vec<DeviceDescription>, String> {
        Ok(vec![DeviceDescription::new("host", DeviceArch::X86_64, 0)])
    }
}

/// A fixed device list, for drivers probed up front.
#[derive(Debug, Clone, Default)]
pub struct StaticDevices(pub Vec<DeviceDescription>);

impl DeviceEnumerator for StaticDevices {
    fn enumerate(&self) -> Result<Vec<DeviceDescription>, String> {
        Ok(self.0.clone())
    }
}

/// An execution platform. Immutable once registered.
pub struct Platform {
    name: String,
    kind: PlatformKind,
    enumerator: Box<dyn DeviceEnumerator>,
}

impl Platform {
    pub fn new(name: impl Into<String>, kind: PlatformKind, enumerator: impl DeviceEnumerator + 'static) -> Self {
        Self {
            name: name.into(),
            kind,
            enumerator: Box::new(enumerator),
        }
    }

    /// The host platform with its default enumerator.
    pub fn host() -> Self {
        Self::new(PlatformKind::Host.canonical_name(), PlatformKind::Host, HostDevices)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PlatformKind {
        self.kind
    }

    pub(crate) fn enumerate_devices(&self) -> Result<Vec<DeviceDescription>, String> {
        self.enumerator.enumerate()
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Name-keyed platform registry with stable enumeration order.
#[derive(Debug, Default)]
pub struct PlatformRegistry {
    platforms: Vec<Arc<Platform>>,
    by_name: HashMap<String, usize>,
}

impl PlatformRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry containing only the host platform.
    pub fn with_host() -> Self {
        let mut registry = Self::new();
        registry.platforms.push(Arc::new(Platform::host()));
        registry.by_name.insert("host".to_string(), 0);
        registry
    }

    pub fn register(&mut self, platform: Platform) -> CompileResult<Arc<Platform>> {
        let key = platform.name().to_lowercase();
        if self.by_name.contains_key(&key) {
            return Err(CompileError::invalid_argument(format!(
                "platform {} is already registered",
                platform.name()
            )));
        }

        log::debug!("Registered platform {} ({})", platform.name(), platform.kind());
        let platform = Arc::new(platform);
        self.by_name.insert(key, self.platforms.len());
        self.platforms.push(Arc::clone(&platform));
        Ok(platform)
    }

    /// All registered platforms, in registration order.
    pub fn list_supported_platforms(&self) -> CompileResult<Vec<Arc<Platform>>> {
        if self.platforms.is_empty() {
            return Err(CompileError::NoSupportedPlatforms);
        }
        Ok(self.platforms.clone())
    }

    /// Resolve a platform by name, case-insensitively.
    pub fn find_by_name(&self, name: &str) -> CompileResult<Arc<Platform>> {
        let key = name.to_lowercase();
        let idx = self.by_name.get(&key).copied().or_else(|| {
            if key == "cpu" {
                self.platforms.iter().position(|p| p.kind() == PlatformKind::Host)
            } else {
                None
            }
        });

        idx.map(|i| Arc::clone(&self.platforms[i]))
            .ok_or_else(|| CompileError::PlatformNotFound {
                name: name.to_string(),
            })
    }
}
