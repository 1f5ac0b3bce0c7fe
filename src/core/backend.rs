// This module implements the execution Backend: the owner of the device sequence of one
// platform. Backend::create enumerates devices through the platform's DeviceEnumerator,
// applies the optional allowed-devices filter and fails with BackendInitialization when the
// driver reports an error or no device survives. After construction the device list is
// non-empty and read-only, so default_device() is total and lookups are safe from any thread.
// ExecutionDevice is a small cloneable handle (platform name, platform kind, ordinal and the
// driver description); the compiler uses the kind to check that a device belongs to the
// variant it was asked to compile for.

//! Execution backends and device handles.

use super::error::{CompileError, CompileResult};
use super::platform::{DeviceDescription, Platform, PlatformKind};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Handle to one device of a platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionDevice {
    platform_name: Arc<str>,
    kind: PlatformKind,
    ordinal: usize,
    description: DeviceDescription,
}

impl ExecutionDevice {
    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    pub fn platform_kind(&self) -> PlatformKind {
        self.kind
    }

    /// Index of the device within its platform.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn description(&self) -> &DeviceDescription {
        &self.description
    }
}

impl fmt::Display for ExecutionDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform_name, self.ordinal)
    }
}

/// Options for [`Backend::create`].
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub platform: Arc<Platform>,
    /// Restrict the backend to these device ordinals.
    pub allowed_devices: Option<BTreeSet<usize>>,
    pub intra_op_parallelism_threads: Option<usize>,
}

impl BackendOptions {
    pub fn new(platform: Arc<Platform>) -> Self {
        Self {
            platform,
            allowed_devices: None,
            intra_op_parallelism_threads: None,
        }
    }

    pub fn with_allowed_devices(mut self, ordinals: impl IntoIterator<Item = usize>) -> Self {
        self.allowed_devices = Some(ordinals.into_iter().collect());
        self
    }

    pub fn with_intra_op_parallelism_threads(mut self, threads: usize) -> Self {
        self.intra_op_parallelism_threads = Some(threads);
        self
    }
}

/// Owner of the device sequence of one platform.
#[derive(Debug)]
pub struct Backend {
    platform: Arc<Platform>,
    devices: Vec<ExecutionDevice>,
    intra_op_parallelism_threads: usize,
}

impl Backend {
    pub fn create(options: BackendOptions) -> CompileResult<Self> {
        let platform = options.platform;
        let init_error = |reason: String| CompileError::BackendInitialization {
            platform: platform.name().to_string(),
            reason,
        };

        let descriptions = platform.enumerate_devices().map_err(init_error)?;
        let platform_name: Arc<str> = Arc::from(platform.name());
        let devices: Vec<_> = descriptions
            .into_iter()
            .enumerate()
            .filter(|(ordinal, _)| {
                options
                    .allowed_devices
                    .as_ref()
                    .map_or(true, |allowed| allowed.contains(ordinal))
            })
            .map(|(ordinal, description)| ExecutionDevice {
                platform_name: Arc::clone(&platform_name),
                kind: platform.kind(),
                ordinal,
                description,
            })
            .collect();

        if devices.is_empty() {
            let reason = if options.allowed_devices.is_some() {
                "no allowed device is present".to_string()
            } else {
                "no usable devices found".to_string()
            };
            return Err(init_error(reason));
        }

        let intra_op_parallelism_threads = options
            .intra_op_parallelism_threads
            .unwrap_or_else(rayon::current_num_threads)
            .max(1);

        log::info!(
            "Created backend for platform {} with {} device(s)",
            platform.name(),
            devices.len()
        );

        Ok(Self {
            platform,
            devices,
            intra_op_parallelism_threads,
        })
    }

    pub fn platform(&self) -> &Arc<Platform> {
        &self.platform
    }

    /// First device of the sequence.
    pub fn default_device(&self) -> &ExecutionDevice {
        &self.devices[0]
    }

    pub fn devices(&self) -> &[ExecutionDevice] {
        &self.devices
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Device with the given platform ordinal, if this backend owns it.
    pub fn device(&self, ordinal: usize) -> Option<&ExecutionDevice> {
        self.devices.iter().find(|d| d.ordinal == ordinal)
    }

    pub fn intra_op_parallelism_threads(&self) -> usize {
        self.intra_op_parallelism_threads
    }
}
