//! # Image Replacement
//!
//! Everything that can be checked without touching the old image (the
//! image format, argument limits) is checked first. Once the old address
//! space has been cleared there is nothing to return to, so a later failure
//! kills the process with `SIGKILL`.

use crate::process::SlotId;
use crate::table::TableState;
use crate::{Context, ExitCause, Pid, ProcError, ProcessTable, Scheduler};
use kernel_info::signal::SIGKILL;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmm::check_arguments;
use log::{debug, info, warn};

impl<S: Scheduler> ProcessTable<S> {
    /// Replace the program of `pid` with `image`.
    ///
    /// On success the saved context enters the new program with `rdi = argc`,
    /// `rsi = argv`, `rdx = envp`; close-on-exec descriptors are closed and
    /// caught signals revert to their default action.
    ///
    /// # Errors
    /// - [`ProcError::InvalidParam`] for an empty name.
    /// - [`ProcError::NotExecutable`] if the loader rejects `image`.
    /// - [`ProcError::ArgumentsTooLarge`] if `argv` / `envp` exceed the limits.
    /// - [`ProcError::NotFound`] if `pid` does not exist or has exited.
    ///
    /// These leave the process untouched. Any other error is reported after
    /// the process has been terminated.
    pub fn exec(
        &self,
        pid: Pid,
        name: &str,
        image: &[u8],
        argv: &[&[u8]],
        envp: &[&[u8]],
    ) -> Result<(), ProcError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let slot = state.live_slot(pid)?;
        let checked = if name.is_empty() {
            Err(ProcError::InvalidParam)
        } else if let Err(e) = state.loader.probe(image) {
            debug!("pid {pid}: exec of \"{name}\" rejected: {e}");
            Err(ProcError::NotExecutable)
        } else {
            check_arguments(argv, envp).map_err(ProcError::from)
        };
        if let Err(e) = checked {
            state.stats.execs_failed += 1;
            return Err(e);
        }

        match replace_image(state, slot, image, argv, envp) {
            Ok(context) => {
                let Some(p) = state.get_mut(slot) else {
                    return Err(ProcError::NotFound(pid));
                };
                p.context = context;
                let closed = p.fds.close_on_exec();
                p.signals.reset_for_exec();
                p.set_name(name);
                state.stats.files_closed += closed as u64;
                state.stats.execs += 1;
                info!("pid {pid}: exec \"{name}\", entry {:#x}", context.rip);
                Ok(())
            }
            Err(e) => {
                state.stats.execs_failed += 1;
                warn!("pid {pid}: exec of \"{name}\" failed after teardown: {e}");
                self.exit_locked(state, slot, ExitCause::Signaled(SIGKILL));
                Err(e)
            }
        }
    }
}

/// Clear the address space of `slot` and build the new image in it.
fn replace_image(
    state: &mut TableState,
    slot: SlotId,
    image: &[u8],
    argv: &[&[u8]],
    envp: &[&[u8]],
) -> Result<Context, ProcError> {
    let TableState {
        slots,
        memory,
        tlb,
        loader,
        ..
    } = state;
    let space = slots
        .get_mut(slot)
        .and_then(Option::as_mut)
        .and_then(|p| p.space.as_mut())
        .ok_or(ProcError::InvalidParam)?;

    space.clear(memory, &mut **tlb);
    let loaded = loader.load(image).map_err(|_| ProcError::NotExecutable)?;

    let mut image_end = VirtualAddress::zero();
    for segment in &loaded.segments {
        space.load_segment(memory, &mut **tlb, segment)?;
        let end = segment
            .vaddr
            .checked_add(segment.mem_size)
            .ok_or(ProcError::InvalidParam)?;
        image_end = image_end.max(end);
    }
    if image_end > VirtualAddress::zero() {
        space.set_heap_start(image_end);
    }

    let stack = space.setup_stack(memory, &mut **tlb, argv, envp)?;
    let mut context = Context::user_entry(loaded.entry, stack.sp);
    context.rdi = stack.argc as u64;
    context.rsi = stack.argv.as_u64();
    context.rdx = stack.envp.as_u64();
    Ok(context)
}
