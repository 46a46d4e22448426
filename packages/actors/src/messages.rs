//! Message types for actor communication.

use ractor::RpcReplyPort;

/// Messages for the DispatcherActor.
#[derive(Debug)]
pub enum DispatcherMessage {
    /// Poll the queue for the next pending job.
    Tick,

    /// Stop once the in-flight job (if any) has finished.
    Shutdown,
}

/// Messages for the CleanupActor.
#[derive(Debug)]
pub enum CleanupMessage {
    /// Periodic eviction pass.
    Tick,

    /// Run an eviction pass now and report what was removed.
    RunNow { reply: RpcReplyPort<CleanupReport> },

    /// Stop the cleanup loop.
    Shutdown,
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub completed_evicted: usize,
    pub failed_evicted: usize,
    pub connections_pruned: usize,
}

impl CleanupReport {
    pub fn jobs_evicted(&self) -> usize {
        self.completed_evicted + self.failed_evicted
    }
}
