use core::fmt;
use kernel_info::process::INIT_PID;

/// Process identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(u32);

impl Pid {
    /// The process that adopts orphans.
    pub const INIT: Self = Self(INIT_PID);

    /// Largest identifier handed out; keeps pids positive in the `i32` ABI.
    pub const MAX: Self = Self(0x7FFF_FFFF);

    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Option<Self> {
        if raw == 0 || raw > Self::MAX.0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_init(self) -> bool {
        self.0 == INIT_PID
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out increasing pids, wrapping around and skipping those still in use.
#[derive(Debug)]
pub struct PidAllocator {
    next: u32,
}

impl PidAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self { next: INIT_PID + 1 }
    }

    /// Next free pid, or `None` if every pid is taken.
    pub fn allocate(&mut self, in_use: impl Fn(Pid) -> bool) -> Option<Pid> {
        for _ in 0..Pid::MAX.0 {
            let candidate = Pid(self.next);
            self.next = if self.next >= Pid::MAX.0 {
                INIT_PID + 1
            } else {
                self.next + 1
            };
            if !in_use(candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

impl Default for PidAllocator {
    fn default() -> Self {
        Self::new()
    }
}
