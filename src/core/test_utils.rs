//! Test utilities for arena-based testing.
//!
//! Each compilation owns one bounded arena, the same way the compiler runs
//! one session per module/device pair.

#[cfg(test)]
pub mod test {
    use super::super::session::CompilationSession;
    use bumpalo::Bump;

    /// Test context that manages arena lifetime for tests.
    pub struct TestContext {
        arena: Bump,
    }

    impl TestContext {
        pub fn new() -> Self {
            Self { arena: Bump::new() }
        }

        /// Create a compilation session borrowing this context's arena.
        pub fn create_session(&self) -> CompilationSession<'_> {
            CompilationSession::new(&self.arena)
        }

        /// Bytes handed out by the arena so far.
        pub fn memory_used(&self) -> usize {
            self.arena.allocated_bytes()
        }

        /// Run a test with a session, ensuring proper cleanup.
        pub fn with_session<F, R>(&self, f: F) -> R
        where
            F: FnOnce(&CompilationSession<'_>) -> R,
        {
            let session = self.create_session();
            f(&session)
        }
    }

    impl Default for TestContext {
        fn default() -> Self {
            Self::new()
        }
    }

    #[test]
    fn test_context_tracks_arena_usage() {
        let ctx = TestContext::new();
        let before = ctx.memory_used();
        ctx.with_session(|session| {
            session.intern_str("a_fairly_long_symbol_name_for_the_arena");
        });
        assert!(ctx.memory_used() >= before);
    }
}
