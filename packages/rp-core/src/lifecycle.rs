//! Process lifecycle abstraction.
//!
//! Provides a [`Lifecycle`] trait for controlling process-level operations
//! like shutdown. `RPStream` and its callers use this rather than calling
//! `std::process::exit` directly, so the same orchestrator code runs
//! unmodified under a test harness.

/// Trait for process-level lifecycle operations.
///
/// Services that need to trigger process-level actions use this trait
/// rather than calling platform APIs directly.
pub trait Lifecycle: Send + Sync {
    /// Requests a graceful process shutdown.
    fn request_shutdown(&self);
}

/// Lifecycle implementation for the standalone driver binary.
///
/// Shutdown triggers a clean process exit; `apps/rp-server` instead prefers
/// to drive its own shutdown via a cancellation token and only falls back to
/// this path when asked to exit outside of its own signal handler.
pub struct ServerLifecycle;

impl Lifecycle for ServerLifecycle {
    fn request_shutdown(&self) {
        tracing::info!("shutdown requested");
        std::process::exit(0);
    }
}

/// No-op lifecycle for testing or embedding.
///
/// Does nothing on a shutdown request. Used by unit tests and by callers
/// that embed this crate and manage their own process lifecycle.
pub struct NoopLifecycle;

impl Lifecycle for NoopLifecycle {
    fn request_shutdown(&self) {
        tracing::debug!("shutdown requested (no-op)");
    }
}
