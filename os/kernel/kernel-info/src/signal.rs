//! # Signal Numbers
//!
//! The subset of signal numbers the kernel core raises or treats specially.

pub const SIGKILL: u8 = 9;
pub const SIGSEGV: u8 = 11;
pub const SIGTERM: u8 = 15;
pub const SIGCHLD: u8 = 17;
pub const SIGCONT: u8 = 18;
pub const SIGURG: u8 = 23;
pub const SIGWINCH: u8 = 28;

const _: () = {
    assert!((SIGWINCH as usize) < crate::process::MAX_SIGNALS);
};
