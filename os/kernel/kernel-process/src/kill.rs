use crate::process::SlotId;
use crate::signals::{Disposition, is_valid};
use crate::table::TableState;
use crate::{ExitCause, Pid, ProcError, ProcessState, ProcessTable, Scheduler};
use alloc::vec::Vec;
use log::{debug, warn};

impl<S: Scheduler> ProcessTable<S> {
    /// Send `sig` to `pid`.
    ///
    /// Signal 0 only checks that the process exists. Returns the disposition
    /// the signal received.
    ///
    /// # Errors
    /// - [`ProcError::InvalidParam`] for a signal number out of range.
    /// - [`ProcError::NotFound`] if `pid` does not exist or has exited.
    /// - [`ProcError::PermissionDenied`] for a terminating signal sent to init.
    pub fn kill(&self, pid: Pid, sig: u8) -> Result<Disposition, ProcError> {
        if sig != 0 && !is_valid(sig) {
            return Err(ProcError::InvalidParam);
        }
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let slot = state.live_slot(pid)?;
        if sig == 0 {
            return Ok(Disposition::Discard);
        }

        let Some(p) = state.get_mut(slot) else {
            return Err(ProcError::NotFound(pid));
        };
        if pid.is_init() && p.signals.would_terminate(sig) {
            return Err(ProcError::PermissionDenied);
        }
        let disposition = p.signals.deliver(sig);
        debug!("signal {sig} -> {pid}: {disposition:?}");
        if disposition == Disposition::Terminate {
            self.exit_locked(state, slot, ExitCause::Signaled(sig));
        }
        Ok(disposition)
    }

    /// Advance the table clock; every sweep interval, reap orphan zombies
    /// that nobody collected in time.
    ///
    /// Returns the number of zombies reaped.
    pub fn timer_tick(&self, now_ms: u64) -> usize {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.now_ms = now_ms;
        if now_ms.saturating_sub(state.last_sweep_ms) < state.config.sweep_interval_ms {
            return 0;
        }
        state.last_sweep_ms = now_ms;

        let init = state.init_slot();
        let max_age = state.config.zombie_max_age_ms;
        let this: &TableState = state;
        let stale: Vec<SlotId> = this
            .index
            .values()
            .copied()
            .filter(|slot| {
                this.get(*slot).is_some_and(|p| {
                    p.state == ProcessState::Zombie
                        && (p.links.parent.is_none() || p.links.parent == init)
                        && now_ms.saturating_sub(p.zombie_since_ms) >= max_age
                })
            })
            .collect();

        let mut reaped = 0;
        for slot in stale {
            if let Some((pid, _)) = state.reap(slot) {
                warn!("sweep: force-reaped zombie {pid}");
                state.stats.zombies_force_reaped += 1;
                reaped += 1;
            }
        }
        reaped
    }
}
