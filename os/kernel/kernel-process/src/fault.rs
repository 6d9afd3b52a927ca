use crate::{ExitCause, Pid, ProcError, ProcessTable, Scheduler};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmm::{FaultResolution, PageFaultError};
use log::warn;

impl<S: Scheduler> ProcessTable<S> {
    /// Page-fault entry for user mode.
    ///
    /// A resolved fault returns how it was repaired and the process resumes.
    /// A fatal fault terminates the process with the fault's signal; it
    /// never resumes.
    ///
    /// # Errors
    /// - [`ProcError::FatalFault`] after the process has been terminated.
    /// - [`ProcError::NotFound`] if `pid` does not exist or has exited.
    pub fn handle_page_fault(
        &self,
        pid: Pid,
        addr: VirtualAddress,
        code: PageFaultError,
    ) -> Result<FaultResolution, ProcError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let slot = state.live_slot(pid)?;
        let (space, ctx) = state.memory_for(slot).ok_or(ProcError::NotFound(pid))?;
        match space.resolve_fault(ctx.memory, ctx.tlb, ctx.stats, addr, code) {
            Ok(resolution) => Ok(resolution),
            Err(fault) => {
                warn!("pid {pid}: {fault}, terminating");
                self.exit_locked(state, slot, ExitCause::Fault(fault));
                Err(ProcError::FatalFault(fault))
            }
        }
    }
}
