//! # Process Lifecycle
//!
//! The process table and the transitions between lifecycle states:
//!
//! - [`ProcessTable::fork`]: copy-on-write duplicate of a running process.
//! - [`ProcessTable::exec`]: replace the program image in place.
//! - [`ProcessTable::exit`] / [`ProcessTable::terminate`]: release everything
//!   but the control block, hand children to init, wake a waiting parent.
//! - [`ProcessTable::wait`]: reap a zombie child exactly once, blocking
//!   through the [`Scheduler`] if none is ready.
//! - [`ProcessTable::kill`], [`ProcessTable::handle_page_fault`] and
//!   [`ProcessTable::timer_tick`] feed the same exit path.
//!
//! Processes refer to each other by slot index, never by pointer. A slot is
//! reused only after its zombie has been reaped.
//!
//! ## Collaborators
//! - [`Scheduler`]: ready-set ordering and the yield entry point.
//! - [`ImageLoader`]: turns an executable into loadable segments;
//!   [`Elf64Loader`] is the default.
//! - [`ResourceCleanup`]: subsystems with per-process state released on exit.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

mod context;
mod elf;
mod error;
mod exec;
mod exit;
mod fault;
mod files;
mod fork;
mod hooks;
mod kill;
mod pid;
mod process;
mod scheduler;
mod signals;
mod state;
mod stats;
mod table;
mod tree;
mod wait;

pub use crate::context::Context;
pub use crate::elf::{Elf64Loader, ElfError, ImageLoader, LoadedImage, SegmentFlags};
pub use crate::error::ProcError;
pub use crate::files::{FdFlags, FdTable, FileRef, OpenFile};
pub use crate::hooks::ResourceCleanup;
pub use crate::pid::{Pid, PidAllocator};
pub use crate::process::{Process, ProcessInfo, SlotId};
pub use crate::scheduler::{ReadyQueue, Scheduler, SchedulingPolicy};
pub use crate::signals::{Disposition, SignalAction, SignalSet, SignalState};
pub use crate::state::{ExitCause, ProcessState, WaitStatus, WaitTarget};
pub use crate::stats::LifecycleStats;
pub use crate::table::{MemoryContext, ProcessTable, ProcessTableConfig};
