//! # Process Exit
//!
//! One path for every way a process can end: voluntary exit, fatal signal,
//! unresolvable page fault, failed exec. The process keeps its slot as a
//! zombie holding only the exit cause until its parent reaps it.

use crate::process::SlotId;
use crate::table::TableState;
use alloc::vec::Vec;
use crate::{ExitCause, Pid, ProcError, ProcessState, ProcessTable, Scheduler};
use kernel_info::signal::SIGCHLD;
use log::{info, warn};

impl<S: Scheduler> ProcessTable<S> {
    /// Voluntary exit with `code`.
    ///
    /// Returns `false` if the process had already exited; repeating the call
    /// changes nothing.
    ///
    /// # Errors
    /// [`ProcError::NotFound`] if `pid` has no slot.
    pub fn exit(&self, pid: Pid, code: u8) -> Result<bool, ProcError> {
        self.terminate(pid, ExitCause::Exited(code))
    }

    /// End `pid` for `cause`. Same idempotence as [`exit`](Self::exit).
    ///
    /// # Errors
    /// [`ProcError::NotFound`] if `pid` has no slot.
    pub fn terminate(&self, pid: Pid, cause: ExitCause) -> Result<bool, ProcError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let slot = state.slot_of(pid)?;
        Ok(self.exit_locked(state, slot, cause))
    }

    pub(crate) fn exit_locked(&self, state: &mut TableState, slot: SlotId, cause: ExitCause) -> bool {
        let now = state.now_ms;
        let Some(p) = state.get_mut(slot) else {
            return false;
        };
        let pid = p.pid;
        if !p.state.is_alive() {
            warn!("pid {pid}: exit while already {}", p.state);
            return false;
        }

        let files = p.fds.close_all();
        p.signals.clear();
        let space = p.space.take();
        p.exit = Some(cause);
        p.state = ProcessState::Zombie;
        p.zombie_since_ms = now;

        let cleaned: usize = state
            .cleanups
            .iter_mut()
            .map(|hook| hook.cleanup_for_process(pid))
            .sum();
        let view: &TableState = state;
        let inherited: Vec<Pid> = view.zombies_of(slot).filter_map(|z| view.pid_of(z)).collect();
        let adopted = state.reparent_children(slot);
        if let Some(init) = state.init_slot().filter(|i| *i != slot) {
            for zombie in inherited {
                self.wake_waiter(state, init, zombie);
            }
        }
        if let Some(space) = space {
            space.destroy(&mut state.memory);
        }
        self.scheduler.remove_from_ready(pid);
        if state.current == Some(pid) {
            state.current = None;
        }

        let parent = state.get(slot).and_then(|p| p.links.parent);
        if let Some(parent) = parent {
            state.unlink_child(slot);
            state.push_zombie(parent, slot);
            if let Some(pp) = state.get_mut(parent) {
                pp.signals.mark_pending(SIGCHLD);
            }
            self.wake_waiter(state, parent, pid);
        }

        let stats = &mut state.stats;
        stats.exits += 1;
        match cause {
            ExitCause::Exited(_) => stats.exits_normal += 1,
            ExitCause::Signaled(_) | ExitCause::Fault(_) => stats.exits_killed += 1,
        }
        stats.zombies_created += 1;
        stats.orphans_adopted += adopted as u64;
        stats.resources_cleaned += cleaned as u64;
        stats.files_closed += files as u64;

        info!("pid {pid} exited ({cause}), {files} files closed, {adopted} orphans");
        true
    }

    /// Make `waiter` runnable if it is blocked waiting for `zombie`.
    fn wake_waiter(&self, state: &mut TableState, waiter: SlotId, zombie: Pid) {
        if let Some(w) = state.get_mut(waiter)
            && let ProcessState::Blocked(target) = w.state
            && target.matches(zombie)
        {
            w.state = ProcessState::Ready;
            self.scheduler.enqueue_ready(w.pid, w.priority);
        }
    }
}
