//! # Kernel Configuration
//!
//! Compile-time configuration shared by the memory manager, the process
//! lifecycle engine and the syscall layer. Everything here is a `const`, so
//! all consumers agree on the layout without any runtime negotiation.
//!
//! ## Modules
//!
//! ### User Memory Layout ([`memory`])
//! Where code, heap, anonymous mappings and the stack live inside every user
//! address space, and the size limits applied when building an initial stack.
//!
//! ### Process Limits ([`process`])
//! Table capacity, per-process resource limits, the well-known init pid and
//! the zombie sweep cadence.
//!
//! ### Signal Numbers ([`signal`])
//! The signals raised by the kernel core itself: kill, segmentation fault,
//! terminate and child-status notification.
//!
//! ## User Address Space Layout
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │   Null guard (never mapped)     │
//! USER_SPACE_START      ├─────────────────────────────────┤ 0x0000_0000_0000_1000
//!                       │                                 │
//! USER_VIRTUAL_BASE     ├─────────────────────────────────┤ 0x0000_0000_0040_0000
//!                       │   Program image (code, data)    │
//! USER_HEAP_BASE        ├─────────────────────────────────┤ 0x0000_0000_0080_0000
//!                       │   Heap (grows up)               │
//!                       │              ...                │
//!                       │   Anonymous mappings (grow down)│
//! USER_MMAP_BASE        ├─────────────────────────────────┤ USER_STACK_TOP - 1 GiB
//!                       │              ...                │
//!                       │   Stack (grows down)            │
//! USER_STACK_TOP        ├─────────────────────────────────┤ 0x0000_7FFF_FFFF_F000
//! USER_SPACE_END        └─────────────────────────────────┘ 0x0000_8000_0000_0000
//! ```
//!
//! All values are validated by `const` assertions; a misconfiguration fails
//! the build rather than the boot.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
pub mod process;
pub mod signal;
