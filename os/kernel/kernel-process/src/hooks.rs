use crate::Pid;

/// A subsystem holding per-process resources outside this crate (IPC
/// endpoints, timers, signal queues).
///
/// Called once while the process exits, with the table lock held.
pub trait ResourceCleanup: Send {
    fn name(&self) -> &'static str;

    /// Release everything `pid` still holds; returns how many items.
    fn cleanup_for_process(&mut self, pid: Pid) -> usize;
}
