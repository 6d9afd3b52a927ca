//! # Waiting for Children
//!
//! A zombie is reaped exactly once: reaping detaches it from its parent's
//! zombie list and frees its slot in the same critical section.

use crate::process::SlotId;
use crate::table::TableState;
use crate::{Pid, ProcError, ProcessState, ProcessTable, Scheduler, WaitStatus, WaitTarget};
use log::{debug, info};

impl TableState {
    /// Free a zombie's slot and return its pid and status.
    pub(crate) fn reap(&mut self, zombie: SlotId) -> Option<(Pid, WaitStatus)> {
        let z = self.get_mut(zombie)?;
        if z.state != ProcessState::Zombie {
            return None;
        }
        z.state = ProcessState::Terminated;
        let status = z.exit_status().unwrap_or_default();
        self.remove_zombie(zombie);
        let process = self.release_slot(zombie)?;
        debug!("reaped {} \"{}\"", process.pid, process.name);
        Some((process.pid, status))
    }

    /// Reap one zombie child of `caller` matching `target`.
    ///
    /// `Ok(None)` means a matching child is still alive.
    fn try_reap(
        &mut self,
        caller: Pid,
        target: WaitTarget,
    ) -> Result<Option<(Pid, WaitStatus)>, ProcError> {
        let slot = self.live_slot(caller)?;
        let matches = |state: &Self, s: SlotId| state.pid_of(s).is_some_and(|p| target.matches(p));

        let this: &Self = self;
        let found = this.zombies_of(slot).find(|z| matches(this, *z));
        if let Some(zombie) = found {
            let reaped = self.reap(zombie);
            if reaped.is_some() {
                self.stats.zombies_reaped += 1;
            }
            return Ok(reaped);
        }
        let this: &Self = self;
        if this.children_of(slot).any(|c| matches(this, c)) {
            Ok(None)
        } else {
            Err(ProcError::NoChildren)
        }
    }
}

impl<S: Scheduler> ProcessTable<S> {
    /// Collect the exit status of a child of `caller`.
    ///
    /// With `nonblocking` set, returns `Ok(None)` when matching children
    /// exist but none has exited. Otherwise the caller is blocked and the
    /// scheduler runs other processes until a matching child exits.
    ///
    /// # Errors
    /// - [`ProcError::NoChildren`] if no child (living or zombie) matches.
    /// - [`ProcError::NotFound`] if `caller` does not exist or was killed
    ///   while waiting.
    pub fn wait(
        &self,
        caller: Pid,
        target: WaitTarget,
        nonblocking: bool,
    ) -> Result<Option<(Pid, WaitStatus)>, ProcError> {
        loop {
            {
                let mut guard = self.state.lock();
                let state = &mut *guard;
                match state.try_reap(caller, target) {
                    Ok(Some((child, status))) => {
                        state.stats.waits += 1;
                        info!("pid {caller} reaped {child} (status {:#06x})", status.into_bits());
                        return Ok(Some((child, status)));
                    }
                    Ok(None) if nonblocking => {
                        state.stats.waits += 1;
                        return Ok(None);
                    }
                    Ok(None) => self.block_locked(state, caller, target),
                    Err(e) => {
                        state.stats.waits_failed += 1;
                        return Err(e);
                    }
                }
            }
            self.scheduler.yield_to_scheduler();
        }
    }

    fn block_locked(&self, state: &mut TableState, caller: Pid, target: WaitTarget) {
        if let Ok(p) = state.process_mut(caller) {
            p.state = ProcessState::Blocked(target);
        }
        if state.current == Some(caller) {
            state.current = None;
        }
        self.scheduler.block_current(caller);
    }
}
