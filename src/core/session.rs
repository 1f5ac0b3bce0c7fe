// This module provides arena-based compilation session management using the bumpalo crate.
// One CompilationSession exists per module/device compilation: the lowered LIR module, its
// functions and instruction lists are all allocated in the session arena and share its
// lifetime, so a whole compilation is torn down by dropping one Bump. The session also keeps
// interned strings (function and symbol names) and SessionStats, which track what each
// pipeline stage did: instructions lowered, instructions left after the target passes, the
// passes that ran and the size of the generated code. Stats use interior mutability so
// stages only need a shared reference to the session. A SessionStats snapshot is copied
// into the Executable at the end of the pipeline.

//! Arena-based compilation session management.
//!
//! All compilation objects are tied to the session lifetime, eliminating
//! complex lifetime propagation.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for compilation objects.
    arena: &'arena Bump,

    /// Session statistics for debugging and optimization.
    stats: RefCell<SessionStats>,

    /// String interning for efficient storage.
    interned_strings: RefCell<HashMap<String, &'arena str>>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Record the output of lowering.
    pub fn record_lowered(&self, functions: usize, instructions: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.functions_lowered += functions;
        stats.instructions_lowered += instructions;
    }

    /// Record a target pass run and whether it changed the module.
    pub fn record_pass(&self, name: &'static str, changed: bool) {
        let mut stats = self.stats.borrow_mut();
        stats.passes_run.push(name);
        if changed {
            stats.passes_changed += 1;
        }
    }

    pub fn record_instructions_after_passes(&self, instructions: usize) {
        self.stats.borrow_mut().instructions_after_passes = instructions;
    }

    pub fn record_hook_invoked(&self) {
        self.stats.borrow_mut().hooks_invoked += 1;
    }

    pub fn record_code_size(&self, bytes: usize) {
        self.stats.borrow_mut().code_size += bytes;
    }

    /// Get a copy of the statistics gathered so far.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub functions_lowered: usize,
    pub instructions_lowered: usize,
    pub instructions_after_passes: usize,
    pub passes_run: Vec<&'static str>,
    pub passes_changed: usize,
    pub hooks_invoked: usize,
    /// Size of the generated code or kernel text, in bytes.
    pub code_size: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Functions lowered: {}", self.functions_lowered)?;
        writeln!(f, "  Instructions lowered: {}", self.instructions_lowered)?;
        writeln!(f, "  Instructions after passes: {}", self.instructions_after_passes)?;
        writeln!(f, "  Hooks invoked: {}", self.hooks_invoked)?;
        writeln!(f, "  Code size: {} bytes", self.code_size)?;

        if !self.passes_run.is_empty() {
            writeln!(
                f,
                "  Passes: {} ({} changed the module)",
                self.passes_run.join(", "),
                self.passes_changed
            )?;
        }

        Ok(())
    }
}
