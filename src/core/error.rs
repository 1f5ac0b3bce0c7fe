// This module defines the error taxonomy of the back-end pipeline using the thiserror crate.
// CompileError separates setup failures (unknown platform, no platforms at all, backend
// initialization) from compile-time failures (invalid arguments to a compile call, a hook
// vetoing a module, target lowering/pass/encoding/linking failures, device memory that could
// not be pre-planned). Every variant carries the context a caller needs to report the
// failure: the platform or module name, the hook stage, the device ordinal. CompileResult<T>
// is the alias used throughout the crate. Nothing is retried; a failed stage ends the
// compilation of that module and, in a batch, the whole batch.

//! Error types for the back-end compilation pipeline.

use crate::compiler::hooks::{HookError, HookStage};
use thiserror::Error;

/// Main error type for platform setup and compilation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Platform not found: {name}")]
    PlatformNotFound { name: String },

    #[error("No supported platforms are registered")]
    NoSupportedPlatforms,

    #[error("Backend initialization failed for platform {platform}: {reason}")]
    BackendInitialization { platform: String, reason: String },

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("{stage} hook failed for module {module}: {source}")]
    HookFailure {
        stage: HookStage,
        module: String,
        #[source]
        source: HookError,
    },

    #[error("Code generation failed: {reason}")]
    CodeGeneration { reason: String },

    #[error("Device allocation failed on device {ordinal}: {reason}")]
    DeviceAllocation { ordinal: usize, reason: String },
}

impl CompileError {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn codegen(reason: impl Into<String>) -> Self {
        Self::CodeGeneration {
            reason: reason.into(),
        }
    }

    /// True for errors raised before any module entered the pipeline.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::PlatformNotFound { .. }
                | Self::NoSupportedPlatforms
                | Self::BackendInitialization { .. }
        )
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_failure_message() {
        let err = CompileError::HookFailure {
            stage: HookStage::PreCodegen,
            module: "add_one".to_string(),
            source: HookError::new("rejected"),
        };
        assert_eq!(
            err.to_string(),
            "pre-codegen hook failed for module add_one: rejected"
        );
        assert!(!err.is_setup_error());
    }

    #[test]
    fn test_setup_classification() {
        assert!(CompileError::NoSupportedPlatforms.is_setup_error());
        assert!(CompileError::PlatformNotFound {
            name: "TPU".to_string()
        }
        .is_setup_error());
        assert!(!CompileError::invalid_argument("x").is_setup_error());
    }
}
