//! # System Call Layer
//!
//! The user-visible ABI of the process core: syscall numbers, `errno`
//! values, the trap frame saved by the `int 0x80` entry stub, and a
//! [`Dispatcher`] that decodes a frame and runs the operation on a
//! [`ProcessTable`](kernel_process::ProcessTable).
//!
//! Arguments arrive in `rdi, rsi, rdx, r10, r8, r9`; the result goes back in
//! `rax` as a non-negative value or `-errno`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

mod abi;
mod dispatch;
mod frame;

pub use crate::abi::{Errno, Prot, Sysno, WaitOptions};
pub use crate::dispatch::{Dispatcher, Outcome, ProgramStore};
pub use crate::frame::TrapFrame;
