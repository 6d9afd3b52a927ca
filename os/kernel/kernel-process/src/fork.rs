use crate::process::Process;
use crate::table::TableState;
use crate::{Pid, ProcError, ProcessTable, Scheduler};
use log::{info, warn};

impl<S: Scheduler> ProcessTable<S> {
    /// Duplicate `parent` into a new Ready child and return the child's pid.
    ///
    /// The child shares every present page copy-on-write, holds clones of
    /// the parent's file references, inherits handlers and mask with nothing
    /// pending, and resumes from the parent's saved context with a return
    /// value of 0.
    ///
    /// # Errors
    /// - [`ProcError::NotFound`] if `parent` does not exist or has exited.
    /// - [`ProcError::TableFull`] if no slot is free; no pid is consumed.
    /// - [`ProcError::OutOfMemory`] if the child's tables cannot be built.
    pub fn fork(&self, parent: Pid) -> Result<Pid, ProcError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match self.fork_locked(state, parent) {
            Ok(child) => {
                state.stats.forks += 1;
                state.stats.processes_created += 1;
                info!("fork {parent} -> {child}");
                Ok(child)
            }
            Err(e) => {
                state.stats.forks_failed += 1;
                warn!("fork of {parent} failed: {e}");
                Err(e)
            }
        }
    }

    fn fork_locked(&self, state: &mut TableState, parent: Pid) -> Result<Pid, ProcError> {
        let parent_slot = state.live_slot(parent)?;
        let slot = state.free_slot()?;
        let pid = state.allocate_pid()?;

        let TableState {
            slots,
            memory,
            tlb,
            vm,
            ..
        } = state;
        let p = slots
            .get_mut(parent_slot)
            .and_then(Option::as_mut)
            .ok_or(ProcError::NotFound(parent))?;
        let space = p
            .space
            .as_mut()
            .ok_or(ProcError::NotFound(parent))?
            .duplicate_for_fork(memory, &mut **tlb, vm, pid.as_u32())?;

        let mut child = Process::new(pid, &p.name, p.priority, space);
        child.context = p.context.for_child();
        child.fds = p.fds.clone();
        child.signals = p.signals.for_child();
        let priority = child.priority;

        state.install(slot, child, Some(parent_slot));
        self.scheduler.enqueue_ready(pid, priority);
        Ok(pid)
    }
}
