//! # Process Control Block
//!
//! Relationships are slot indices into the process table, never references:
//!
//! ```text
//!   parent ◄──────────── child ──next_sibling──► child ──► …
//!     │ first_child ───────▲
//!     │ first_zombie ──► zombie ──next_zombie──► zombie ──► …
//! ```
//!
//! A live child is on its parent's child list; once it exits it moves to
//! the parent's zombie list and stays there until reaped.

use crate::files::FdTable;
use crate::signals::SignalState;
use crate::{Context, ExitCause, Pid, ProcessState, WaitStatus};
use alloc::string::String;
use alloc::vec::Vec;
use kernel_info::process::MAX_PROCESS_NAME;
use kernel_vmm::AddressSpace;

/// Index of a process-table slot.
pub type SlotId = usize;

/// Intrusive tree links, as slot indices.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct Links {
    pub parent: Option<SlotId>,
    pub first_child: Option<SlotId>,
    pub next_sibling: Option<SlotId>,
    pub first_zombie: Option<SlotId>,
    pub next_zombie: Option<SlotId>,
}

#[derive(Debug)]
pub struct Process {
    pub(crate) pid: Pid,
    pub(crate) name: String,
    pub(crate) state: ProcessState,
    pub(crate) priority: u8,
    pub(crate) context: Context,
    /// `None` once the process has exited.
    pub(crate) space: Option<AddressSpace>,
    pub(crate) fds: FdTable,
    pub(crate) signals: SignalState,
    pub(crate) exit: Option<ExitCause>,
    /// Table time at which the process became a zombie.
    pub(crate) zombie_since_ms: u64,
    pub(crate) links: Links,
}

impl Process {
    pub(crate) fn new(pid: Pid, name: &str, priority: u8, space: AddressSpace) -> Self {
        Self {
            pid,
            name: truncated_name(name),
            state: ProcessState::Ready,
            priority,
            context: Context::default(),
            space: Some(space),
            fds: FdTable::new(),
            signals: SignalState::default(),
            exit: None,
            zombie_since_ms: 0,
            links: Links::default(),
        }
    }

    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn state(&self) -> ProcessState {
        self.state
    }

    #[must_use]
    pub const fn priority(&self) -> u8 {
        self.priority
    }

    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }

    #[must_use]
    pub const fn space(&self) -> Option<&AddressSpace> {
        self.space.as_ref()
    }

    #[must_use]
    pub const fn fds(&self) -> &FdTable {
        &self.fds
    }

    #[must_use]
    pub const fn signals(&self) -> &SignalState {
        &self.signals
    }

    #[must_use]
    pub fn exit_status(&self) -> Option<WaitStatus> {
        self.exit.map(ExitCause::status)
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = truncated_name(name);
    }
}

/// Keep at most `MAX_PROCESS_NAME` bytes, cut at a character boundary.
fn truncated_name(name: &str) -> String {
    let mut end = name.len().min(MAX_PROCESS_NAME);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}

/// Copy of a process's externally visible state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub name: String,
    pub state: ProcessState,
    pub priority: u8,
    pub children: Vec<Pid>,
    pub zombies: Vec<Pid>,
    pub exit_status: Option<WaitStatus>,
    pub open_files: usize,
    pub mapped_regions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_truncated_on_char_boundary() {
        assert_eq!(truncated_name("init"), "init");
        let long = "x".repeat(40);
        assert_eq!(truncated_name(&long).len(), MAX_PROCESS_NAME);
        let wide = "ä".repeat(20);
        let cut = truncated_name(&wide);
        assert!(cut.len() <= MAX_PROCESS_NAME);
        assert_eq!(cut.chars().count(), MAX_PROCESS_NAME / 2);
    }
}
