//! Lifecycle states and the packed wait status.

use crate::Pid;
use bitfield_struct::bitfield;
use core::fmt;
use kernel_vmm::FatalFault;

/// What a blocked process waits for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WaitTarget {
    Any,
    Pid(Pid),
}

impl WaitTarget {
    #[must_use]
    pub fn matches(self, pid: Pid) -> bool {
        match self {
            Self::Any => true,
            Self::Pid(p) => p == pid,
        }
    }
}

/// Lifecycle state of a process.
///
/// ```text
///  Ready ⇄ Running ──wait──► Blocked ──child exit──► Ready
///    │        │                  │
///    └────────┴──── exit ────────┴──► Zombie ──reap──► Terminated
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked(WaitTarget),
    Zombie,
    /// Reaped; the slot is about to be freed.
    Terminated,
}

impl ProcessState {
    #[inline]
    #[must_use]
    pub const fn is_alive(self) -> bool {
        matches!(self, Self::Ready | Self::Running | Self::Blocked(_))
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::Running => f.write_str("running"),
            Self::Blocked(WaitTarget::Any) => f.write_str("waiting"),
            Self::Blocked(WaitTarget::Pid(p)) => write!(f, "waiting for {p}"),
            Self::Zombie => f.write_str("zombie"),
            Self::Terminated => f.write_str("terminated"),
        }
    }
}

/// Why a process ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExitCause {
    Exited(u8),
    Signaled(u8),
    Fault(FatalFault),
}

impl ExitCause {
    #[must_use]
    pub const fn status(self) -> WaitStatus {
        match self {
            Self::Exited(code) => WaitStatus::exited(code),
            Self::Signaled(sig) => WaitStatus::signaled(sig),
            Self::Fault(fault) => WaitStatus::signaled(fault.signal()),
        }
    }
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "code {code}"),
            Self::Signaled(sig) => write!(f, "signal {sig}"),
            Self::Fault(fault) => write!(f, "{fault}"),
        }
    }
}

/// Status word reported by `wait`.
///
/// Bits 0‒6 hold the terminating signal (0 for a normal exit), bits 8‒15
/// the exit code.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct WaitStatus {
    #[bits(7)]
    pub term_signal: u8,
    pub core_dumped: bool,
    pub exit_code: u8,
    #[bits(16)]
    __: u16,
}

impl WaitStatus {
    #[must_use]
    pub const fn exited(code: u8) -> Self {
        Self::new().with_exit_code(code)
    }

    #[must_use]
    pub const fn signaled(sig: u8) -> Self {
        Self::new().with_term_signal(sig & 0x7F)
    }

    #[must_use]
    pub const fn is_exited(self) -> bool {
        self.term_signal() == 0
    }

    #[must_use]
    pub const fn is_signaled(self) -> bool {
        self.term_signal() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::VirtualAddress;

    #[test]
    fn status_encoding_matches_abi() {
        let s = WaitStatus::exited(7);
        assert_eq!(s.into_bits(), 0x0700);
        assert!(s.is_exited());
        assert_eq!(s.exit_code(), 7);

        let k = WaitStatus::signaled(9);
        assert_eq!(k.into_bits(), 9);
        assert!(k.is_signaled());

        let segv = ExitCause::Fault(FatalFault::Segmentation(VirtualAddress::new(0))).status();
        assert_eq!(segv.term_signal(), 11);
    }

    #[test]
    fn wait_target_matching() {
        let two = Pid::new(2).unwrap();
        assert!(WaitTarget::Any.matches(two));
        assert!(WaitTarget::Pid(two).matches(two));
        assert!(!WaitTarget::Pid(Pid::INIT).matches(two));
    }
}
