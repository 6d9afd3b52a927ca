//! Per-process signal dispositions, mask and pending set.

use core::fmt;
use kernel_info::process::MAX_SIGNALS;
use kernel_info::signal::{SIGCHLD, SIGCONT, SIGKILL, SIGURG, SIGWINCH};
use kernel_memory_addresses::VirtualAddress;

/// What happens when a signal is delivered.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SignalAction {
    #[default]
    Default,
    Ignore,
    /// User handler entry point.
    Handler(VirtualAddress),
}

/// A set of signal numbers `1..MAX_SIGNALS`.
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct SignalSet(u32);

impl SignalSet {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn contains(self, sig: u8) -> bool {
        is_valid(sig) && self.0 & (1 << sig) != 0
    }

    pub const fn insert(&mut self, sig: u8) {
        if is_valid(sig) {
            self.0 |= 1 << sig;
        }
    }

    pub const fn remove(&mut self, sig: u8) {
        if is_valid(sig) {
            self.0 &= !(1 << sig);
        }
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for SignalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries((1..u8::MAX).filter(|s| self.contains(*s)))
            .finish()
    }
}

/// Whether `sig` names a signal (`0` is the "probe only" value and not one).
#[must_use]
pub const fn is_valid(sig: u8) -> bool {
    sig != 0 && (sig as usize) < MAX_SIGNALS
}

/// Whether the default action of `sig` terminates the process.
#[must_use]
pub const fn default_terminates(sig: u8) -> bool {
    !matches!(sig, SIGCHLD | SIGCONT | SIGURG | SIGWINCH)
}

/// How a delivered signal must be handled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Disposition {
    Terminate,
    Discard,
    Pending,
}

/// Handlers, blocked mask and pending set of one process.
#[derive(Clone, Debug, Default)]
pub struct SignalState {
    actions: [SignalAction; MAX_SIGNALS],
    blocked: SignalSet,
    pending: SignalSet,
}

impl SignalState {
    #[must_use]
    pub fn action(&self, sig: u8) -> Option<SignalAction> {
        is_valid(sig).then(|| self.actions[sig as usize])
    }

    /// Install a handler. `SIGKILL` cannot be caught or ignored.
    ///
    /// Returns the previous action, or `None` if the change is not allowed.
    pub fn set_action(&mut self, sig: u8, action: SignalAction) -> Option<SignalAction> {
        if !is_valid(sig) || sig == SIGKILL {
            return None;
        }
        Some(core::mem::replace(&mut self.actions[sig as usize], action))
    }

    #[must_use]
    pub const fn blocked(&self) -> SignalSet {
        self.blocked
    }

    pub const fn set_blocked(&mut self, mut mask: SignalSet) {
        mask.remove(SIGKILL);
        self.blocked = mask;
    }

    #[must_use]
    pub const fn pending(&self) -> SignalSet {
        self.pending
    }

    pub const fn mark_pending(&mut self, sig: u8) {
        self.pending.insert(sig);
    }

    /// Whether delivering `sig` now would end the process.
    #[must_use]
    pub fn would_terminate(&self, sig: u8) -> bool {
        if !is_valid(sig) {
            return false;
        }
        sig == SIGKILL
            || (!self.blocked.contains(sig)
                && self.actions[sig as usize] == SignalAction::Default
                && default_terminates(sig))
    }

    /// Decide what delivering `sig` does and record it if it stays pending.
    pub fn deliver(&mut self, sig: u8) -> Disposition {
        if !is_valid(sig) {
            return Disposition::Discard;
        }
        if sig == SIGKILL {
            return Disposition::Terminate;
        }
        if self.blocked.contains(sig) {
            self.pending.insert(sig);
            return Disposition::Pending;
        }
        match self.actions[sig as usize] {
            SignalAction::Default if default_terminates(sig) => Disposition::Terminate,
            SignalAction::Ignore | SignalAction::Default => Disposition::Discard,
            SignalAction::Handler(_) => {
                self.pending.insert(sig);
                Disposition::Pending
            }
        }
    }

    /// State inherited by a forked child: same handlers and mask, nothing pending.
    #[must_use]
    pub fn for_child(&self) -> Self {
        Self {
            actions: self.actions,
            blocked: self.blocked,
            pending: SignalSet::empty(),
        }
    }

    /// After exec: handlers reset to default unless ignored, pending cleared.
    pub fn reset_for_exec(&mut self) {
        for action in &mut self.actions {
            if *action != SignalAction::Ignore {
                *action = SignalAction::Default;
            }
        }
        self.pending = SignalSet::empty();
    }

    /// Drop everything; returns how many signals were still pending.
    pub fn clear(&mut self) -> usize {
        let pending = self.pending.bits().count_ones() as usize;
        *self = Self::default();
        pending
    }
}
