//! # Process Table
//!
//! The single explicitly constructed context of the lifecycle core. All
//! mutable state (process slots, physical frames, statistics) sits behind
//! one [`SpinLock`]; every operation holds it for its whole duration and
//! releases it before yielding to the scheduler.

use crate::elf::{Elf64Loader, ImageLoader};
use crate::files::{FdFlags, FileRef};
use crate::hooks::ResourceCleanup;
use crate::pid::PidAllocator;
use crate::process::{Process, ProcessInfo, SlotId};
use crate::signals::SignalAction;
use crate::{Context, LifecycleStats, Pid, ProcError, ProcessState, Scheduler};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use kernel_alloc::{FramePool, FrameStats};
use kernel_info::process::{
    DEFAULT_PRIORITY, MAX_PRIORITY, MAX_PROCESSES, ZOMBIE_MAX_AGE_MS, ZOMBIE_SWEEP_INTERVAL_MS,
};
use kernel_sync::SpinLock;
use kernel_vmem::TlbFlush;
use kernel_vmm::{AddressSpace, VmStats};
use log::{debug, info};

/// Runtime configuration of a [`ProcessTable`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ProcessTableConfig {
    /// Number of process slots.
    pub capacity: usize,
    pub sweep_interval_ms: u64,
    /// Orphan zombies older than this are reaped by the sweep.
    pub zombie_max_age_ms: u64,
}

impl Default for ProcessTableConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_PROCESSES,
            sweep_interval_ms: ZOMBIE_SWEEP_INTERVAL_MS,
            zombie_max_age_ms: ZOMBIE_MAX_AGE_MS,
        }
    }
}

/// Borrowed memory collaborators handed to address-space operations.
pub struct MemoryContext<'a> {
    pub memory: &'a mut FramePool,
    pub tlb: &'a mut (dyn TlbFlush + Send),
    pub stats: &'a mut VmStats,
}

/// Everything guarded by the table lock.
pub(crate) struct TableState {
    pub(crate) slots: Vec<Option<Process>>,
    pub(crate) index: BTreeMap<Pid, SlotId>,
    pub(crate) pids: PidAllocator,
    pub(crate) current: Option<Pid>,
    pub(crate) memory: FramePool,
    pub(crate) tlb: Box<dyn TlbFlush + Send>,
    pub(crate) loader: Box<dyn ImageLoader>,
    pub(crate) cleanups: Vec<Box<dyn ResourceCleanup>>,
    pub(crate) vm: VmStats,
    pub(crate) stats: LifecycleStats,
    pub(crate) now_ms: u64,
    pub(crate) last_sweep_ms: u64,
    pub(crate) config: ProcessTableConfig,
}

impl TableState {
    pub(crate) fn get(&self, slot: SlotId) -> Option<&Process> {
        self.slots.get(slot)?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, slot: SlotId) -> Option<&mut Process> {
        self.slots.get_mut(slot)?.as_mut()
    }

    pub(crate) fn slot_of(&self, pid: Pid) -> Result<SlotId, ProcError> {
        self.index.get(&pid).copied().ok_or(ProcError::NotFound(pid))
    }

    pub(crate) fn process(&self, pid: Pid) -> Result<&Process, ProcError> {
        let slot = self.slot_of(pid)?;
        self.get(slot).ok_or(ProcError::NotFound(pid))
    }

    pub(crate) fn process_mut(&mut self, pid: Pid) -> Result<&mut Process, ProcError> {
        let slot = self.slot_of(pid)?;
        self.get_mut(slot).ok_or(ProcError::NotFound(pid))
    }

    /// Slot of a process that has not exited.
    pub(crate) fn live_slot(&self, pid: Pid) -> Result<SlotId, ProcError> {
        let slot = self.slot_of(pid)?;
        match self.get(slot) {
            Some(p) if p.state.is_alive() => Ok(slot),
            _ => Err(ProcError::NotFound(pid)),
        }
    }

    pub(crate) fn pid_of(&self, slot: SlotId) -> Option<Pid> {
        self.get(slot).map(|p| p.pid)
    }

    /// Next pid not held by any slot, zombies included.
    pub(crate) fn allocate_pid(&mut self) -> Result<Pid, ProcError> {
        let index = &self.index;
        self.pids
            .allocate(|p| index.contains_key(&p))
            .ok_or(ProcError::TableFull)
    }

    pub(crate) fn free_slot(&self) -> Result<SlotId, ProcError> {
        self.slots
            .iter()
            .position(Option::is_none)
            .ok_or(ProcError::TableFull)
    }

    /// Store `process` in `slot` and link it under `parent`.
    pub(crate) fn install(&mut self, slot: SlotId, process: Process, parent: Option<SlotId>) {
        let pid = process.pid;
        self.slots[slot] = Some(process);
        self.index.insert(pid, slot);
        if let Some(parent) = parent {
            self.link_child(parent, slot);
        }
    }

    /// Forget the process in `slot` entirely.
    pub(crate) fn release_slot(&mut self, slot: SlotId) -> Option<Process> {
        let process = self.slots.get_mut(slot)?.take()?;
        self.index.remove(&process.pid);
        Some(process)
    }

    /// Split borrow of an address space and the memory collaborators.
    pub(crate) fn memory_for(
        &mut self,
        slot: SlotId,
    ) -> Option<(&mut AddressSpace, MemoryContext<'_>)> {
        let space = self.slots.get_mut(slot)?.as_mut()?.space.as_mut()?;
        Some((
            space,
            MemoryContext {
                memory: &mut self.memory,
                tlb: &mut *self.tlb,
                stats: &mut self.vm,
            },
        ))
    }

    pub(crate) fn info(&self, slot: SlotId) -> Option<ProcessInfo> {
        let p = self.get(slot)?;
        Some(ProcessInfo {
            pid: p.pid,
            parent: p.links.parent.and_then(|s| self.pid_of(s)),
            name: p.name.clone(),
            state: p.state,
            priority: p.priority,
            children: self.children_of(slot).filter_map(|s| self.pid_of(s)).collect(),
            zombies: self.zombies_of(slot).filter_map(|s| self.pid_of(s)).collect(),
            exit_status: p.exit_status(),
            open_files: p.fds.open_count(),
            mapped_regions: p.space.as_ref().map_or(0, |s| s.regions().len()),
        })
    }
}

/// The process table and lifecycle engine.
pub struct ProcessTable<S: Scheduler> {
    pub(crate) state: SpinLock<TableState>,
    pub(crate) scheduler: S,
}

impl<S: Scheduler> ProcessTable<S> {
    /// A table over `memory` with no processes yet.
    pub fn new(
        config: ProcessTableConfig,
        memory: FramePool,
        tlb: Box<dyn TlbFlush + Send>,
        scheduler: S,
    ) -> Self {
        let mut slots = Vec::with_capacity(config.capacity);
        slots.resize_with(config.capacity, || None);
        info!(
            "process table: {} slots, {} frames",
            config.capacity,
            memory.stats().total
        );
        Self {
            state: SpinLock::new(TableState {
                slots,
                index: BTreeMap::new(),
                pids: PidAllocator::new(),
                current: None,
                memory,
                tlb,
                loader: Box::new(Elf64Loader),
                cleanups: Vec::new(),
                vm: VmStats::default(),
                stats: LifecycleStats::default(),
                now_ms: 0,
                last_sweep_ms: 0,
                config,
            }),
            scheduler,
        }
    }

    /// Replace the image loader.
    #[must_use]
    pub fn with_loader(mut self, loader: impl ImageLoader + 'static) -> Self {
        self.state.get_mut().loader = Box::new(loader);
        self
    }

    /// Register a subsystem to be told about exiting processes.
    pub fn add_cleanup(&self, hook: Box<dyn ResourceCleanup>) {
        let mut state = self.state.lock();
        debug!("cleanup hook registered: {}", hook.name());
        state.cleanups.push(hook);
    }

    pub const fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Create the init process (pid 1) with an empty address space.
    ///
    /// # Errors
    /// - [`ProcError::Busy`] if init already exists.
    /// - [`ProcError::TableFull`] / [`ProcError::OutOfMemory`] on exhaustion.
    pub fn spawn_init(&self) -> Result<Pid, ProcError> {
        let mut state = self.state.lock();
        if state.index.contains_key(&Pid::INIT) {
            return Err(ProcError::Busy);
        }
        self.create_locked(&mut state, Pid::INIT, "init", None, DEFAULT_PRIORITY)
    }

    /// Create a process with an empty address space, Ready, under `parent`.
    ///
    /// # Errors
    /// - [`ProcError::InvalidParam`] for a priority above [`MAX_PRIORITY`].
    /// - [`ProcError::NotFound`] if `parent` does not exist or has exited.
    /// - [`ProcError::TableFull`] / [`ProcError::OutOfMemory`] on exhaustion.
    pub fn create_process(
        &self,
        name: &str,
        parent: Option<Pid>,
        priority: u8,
    ) -> Result<Pid, ProcError> {
        if priority > MAX_PRIORITY {
            return Err(ProcError::InvalidParam);
        }
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(parent) = parent {
            state.live_slot(parent)?;
        }
        state.free_slot()?;
        let pid = state.allocate_pid()?;
        self.create_locked(state, pid, name, parent, priority)
    }

    fn create_locked(
        &self,
        state: &mut TableState,
        pid: Pid,
        name: &str,
        parent: Option<Pid>,
        priority: u8,
    ) -> Result<Pid, ProcError> {
        let slot = state.free_slot()?;
        let parent_slot = parent.map(|p| state.live_slot(p)).transpose()?;
        let space = AddressSpace::create(&mut state.memory, pid.as_u32())?;
        state.install(slot, Process::new(pid, name, priority, space), parent_slot);
        if parent.is_none() && !pid.is_init() {
            state.adopt_by_init(slot);
        }
        state.stats.processes_created += 1;
        self.scheduler.enqueue_ready(pid, priority);
        info!("created process {pid} \"{name}\"");
        Ok(pid)
    }

    /// Switch to the next runnable process.
    ///
    /// The running process (if any) goes back to Ready; the scheduler's pick
    /// becomes Running. Returns the new current process.
    pub fn run_next(&self) -> Option<Pid> {
        let mut state = self.state.lock();
        if let Some(prev) = state.current
            && let Ok(p) = state.process_mut(prev)
            && p.state == ProcessState::Running
        {
            p.state = ProcessState::Ready;
            let priority = p.priority;
            self.scheduler.enqueue_ready(prev, priority);
        }
        state.current = None;
        while let Some(next) = self.scheduler.pick_next() {
            if let Ok(p) = state.process_mut(next)
                && p.state == ProcessState::Ready
            {
                p.state = ProcessState::Running;
                state.current = Some(next);
                break;
            }
        }
        state.current
    }

    /// The process currently on the CPU.
    pub fn current(&self) -> Option<Pid> {
        self.state.lock().current
    }

    /// `getpid`: the current process.
    pub fn getpid(&self) -> Option<Pid> {
        self.current()
    }

    /// `getppid`: parent of `pid`, `None` for an orphan without init.
    ///
    /// # Errors
    /// [`ProcError::NotFound`] if `pid` does not exist.
    pub fn getppid(&self, pid: Pid) -> Result<Option<Pid>, ProcError> {
        let state = self.state.lock();
        let p = state.process(pid)?;
        Ok(p.links.parent.and_then(|s| state.pid_of(s)))
    }

    pub fn state_of(&self, pid: Pid) -> Option<ProcessState> {
        self.state.lock().process(pid).ok().map(Process::state)
    }

    /// Snapshot of one process.
    pub fn info(&self, pid: Pid) -> Option<ProcessInfo> {
        let state = self.state.lock();
        let slot = state.slot_of(pid).ok()?;
        state.info(slot)
    }

    /// Snapshots of every process, ordered by pid.
    pub fn list(&self) -> Vec<ProcessInfo> {
        let state = self.state.lock();
        state
            .index
            .values()
            .filter_map(|slot| state.info(*slot))
            .collect()
    }

    /// Number of occupied slots, zombies included.
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().config.capacity
    }

    pub fn stats(&self) -> LifecycleStats {
        self.state.lock().stats
    }

    pub fn vm_stats(&self) -> VmStats {
        self.state.lock().vm
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.state.lock().memory.stats()
    }

    /// Saved register state of `pid`.
    pub fn context(&self, pid: Pid) -> Option<Context> {
        self.state.lock().process(pid).ok().map(|p| p.context)
    }

    /// Save the register state of `pid`, e.g. on trap entry.
    ///
    /// # Errors
    /// [`ProcError::NotFound`] if `pid` does not exist or has exited.
    pub fn save_context(&self, pid: Pid, context: Context) -> Result<(), ProcError> {
        let mut state = self.state.lock();
        let slot = state.live_slot(pid)?;
        if let Some(p) = state.get_mut(slot) {
            p.context = context;
        }
        Ok(())
    }

    /// Open `file` in the lowest free descriptor of `pid`.
    ///
    /// # Errors
    /// [`ProcError::NotFound`] or [`ProcError::TooManyFiles`].
    pub fn install_fd(&self, pid: Pid, file: FileRef, flags: FdFlags) -> Result<usize, ProcError> {
        let mut state = self.state.lock();
        let slot = state.live_slot(pid)?;
        state
            .get_mut(slot)
            .ok_or(ProcError::NotFound(pid))?
            .fds
            .install(file, flags)
    }

    /// # Errors
    /// [`ProcError::NotFound`] or [`ProcError::BadFd`].
    pub fn close_fd(&self, pid: Pid, fd: usize) -> Result<(), ProcError> {
        let mut state = self.state.lock();
        let slot = state.live_slot(pid)?;
        state
            .get_mut(slot)
            .ok_or(ProcError::NotFound(pid))?
            .fds
            .close(fd)
            .map(|_| ())
    }

    /// Change how `pid` handles `sig`; returns the previous action.
    ///
    /// # Errors
    /// [`ProcError::InvalidParam`] for an invalid or uncatchable signal.
    pub fn set_signal_action(
        &self,
        pid: Pid,
        sig: u8,
        action: SignalAction,
    ) -> Result<SignalAction, ProcError> {
        let mut state = self.state.lock();
        let slot = state.live_slot(pid)?;
        state
            .get_mut(slot)
            .ok_or(ProcError::NotFound(pid))?
            .signals
            .set_action(sig, action)
            .ok_or(ProcError::InvalidParam)
    }

    /// Run `f` on the address space of `pid` with the memory collaborators.
    ///
    /// # Errors
    /// [`ProcError::NotFound`] if `pid` does not exist or has exited.
    pub fn with_address_space<R>(
        &self,
        pid: Pid,
        f: impl FnOnce(&mut AddressSpace, &mut MemoryContext<'_>) -> R,
    ) -> Result<R, ProcError> {
        let mut state = self.state.lock();
        let slot = state.live_slot(pid)?;
        let (space, mut ctx) = state.memory_for(slot).ok_or(ProcError::NotFound(pid))?;
        Ok(f(space, &mut ctx))
    }
}
