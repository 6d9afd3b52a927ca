//! # Kernel synchronization primitives
//!
//! The memory manager and the process table are protected by one global lock
//! held for the duration of each operation. [`SpinLock`] is that lock: a FIFO
//! ticket spinlock, so that a process spinning on the table cannot be starved
//! by others re-acquiring it in a tight loop.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
