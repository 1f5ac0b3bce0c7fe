// This module implements the per-compiler hook registry. A compiler holds at most one
// pre-codegen and one post-codegen hook; setting a hook replaces the previous one, there is no
// chaining. Hooks are owned callbacks (Arc'd closures) that see the lowered LIR module
// read-only and may veto the compilation by returning a HookError. Every compilation call
// takes a snapshot of both slots when it starts, so replacing a hook only affects calls that
// start afterwards. Under the default serialized policy all hook invocations from one compiler
// go through a single parking_lot mutex, which makes non-reentrant callbacks safe even when a
// batch runs module/device pairs on several rayon workers; the thread-safe policy skips the
// exclusion region for callers whose hooks handle concurrency themselves.

//! Pre- and post-codegen hooks.

use crate::lir::LirModule;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a hook. Aborts the compilation of the module it saw.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Point in the pipeline at which a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    /// After lowering, before the target passes.
    PreCodegen,
    /// After the target passes, before code generation.
    PostCodegen,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookStage::PreCodegen => "pre-codegen",
            HookStage::PostCodegen => "post-codegen",
        })
    }
}

/// A registered hook.
pub type Hook = Arc<dyn Fn(&LirModule<'_>) -> Result<(), HookError> + Send + Sync>;

/// How hook invocations from concurrent compilations are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookPolicy {
    /// One exclusive region for every hook call of a compiler.
    ///
    /// The region is not reentrant: a hook that compiles through the same
    /// [`Compiler`](super::Compiler) deadlocks. Such hooks need `ThreadSafe`.
    #[default]
    Serialized,
    /// Hooks may run concurrently on several workers.
    ThreadSafe,
}

#[derive(Clone, Default)]
struct HookSlots {
    pre: Option<Hook>,
    post: Option<Hook>,
}

/// Hooks captured at the start of one compilation call.
#[derive(Clone, Default)]
pub(crate) struct HookSnapshot {
    slots: HookSlots,
}

impl HookSnapshot {
    pub(crate) fn get(&self, stage: HookStage) -> Option<&Hook> {
        match stage {
            HookStage::PreCodegen => self.slots.pre.as_ref(),
            HookStage::PostCodegen => self.slots.post.as_ref(),
        }
    }
}

pub(crate) struct HookRegistry {
    slots: RwLock<HookSlots>,
    exclusive: Mutex<()>,
    policy: HookPolicy,
}

impl HookRegistry {
    pub(crate) fn new(policy: HookPolicy) -> Self {
        Self {
            slots: RwLock::new(HookSlots::default()),
            exclusive: Mutex::new(()),
            policy,
        }
    }

    pub(crate) fn set(&self, stage: HookStage, hook: Hook) {
        let mut slots = self.slots.write();
        match stage {
            HookStage::PreCodegen => slots.pre = Some(hook),
            HookStage::PostCodegen => slots.post = Some(hook),
        }
    }

    pub(crate) fn clear(&self) {
        *self.slots.write() = HookSlots::default();
    }

    pub(crate) fn is_set(&self, stage: HookStage) -> bool {
        let slots = self.slots.read();
        match stage {
            HookStage::PreCodegen => slots.pre.is_some(),
            HookStage::PostCodegen => slots.post.is_some(),
        }
    }

    pub(crate) fn snapshot(&self) -> HookSnapshot {
        HookSnapshot {
            slots: self.slots.read().clone(),
        }
    }

    /// Run `hook` under the registry's policy.
    pub(crate) fn invoke(&self, hook: &Hook, module: &LirModule<'_>) -> Result<(), HookError> {
        match self.policy {
            HookPolicy::Serialized => {
                let _guard = self.exclusive.lock();
                hook(module)
            }
            HookPolicy::ThreadSafe => hook(module),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> Hook {
        let counter = Arc::clone(counter);
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_set_replaces_previous_hook() {
        let registry = HookRegistry::new(HookPolicy::default());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        registry.set(HookStage::PreCodegen, counting(&first));
        let old = registry.snapshot();
        registry.set(HookStage::PreCodegen, counting(&second));
        let new = registry.snapshot();

        assert!(!Arc::ptr_eq(
            old.get(HookStage::PreCodegen).unwrap(),
            new.get(HookStage::PreCodegen).unwrap()
        ));
        assert!(new.get(HookStage::PostCodegen).is_none());
    }

    #[test]
    fn test_clear() {
        let registry = HookRegistry::new(HookPolicy::ThreadSafe);
        let counter = Arc::new(AtomicUsize::new(0));
        registry.set(HookStage::PostCodegen, counting(&counter));
        assert!(registry.is_set(HookStage::PostCodegen));
        registry.clear();
        assert!(!registry.is_set(HookStage::PostCodegen));
        assert!(registry.snapshot().get(HookStage::PostCodegen).is_none());
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(HookStage::PreCodegen.to_string(), "pre-codegen");
        assert_eq!(HookStage::PostCodegen.to_string(), "post-codegen");
        assert_eq!(HookError::new("nope").to_string(), "nope");
    }
}
