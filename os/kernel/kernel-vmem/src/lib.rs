//! # Virtual Memory Support
//!
//! x86-64 four-level paging for user address spaces: the entry bitfield, the
//! table type, and the walker/mapper that installs and removes 4 KiB leaves.
//!
//! ## What you get
//! - [`PageEntryBits`], the raw 64-bit entry with a copy-on-write marker in
//!   an OS-available bit, and [`PageFlags`] for requesting leaf permissions.
//! - A 4 KiB-aligned [`PageTable`] and the [`Level`] / [`split_indices`]
//!   helpers for the walk.
//! - [`RootTable`], the owning handle of one translation tree, with
//!   `map` / `unmap` / `remap` / `set_flags` / `translate` / `destroy`.
//! - Collaborator traits: [`FrameAlloc`] (reference-counted frames),
//!   [`PhysMapper`] (reach frame contents), [`TlbFlush`] (single-page
//!   invalidation).
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! Each level holds 512 entries of 8 bytes. Only 4 KiB leaves are created:
//! user frames are shared and copied one page at a time, which large pages
//! would defeat.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod error;
mod frame;
mod mapper;
mod page_entry_bits;
pub mod page_table;
mod tlb;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::error::{FrameError, MapError, NotMapped};
pub use crate::frame::{FRAME_BYTES, FrameAlloc, PhysMapper, PhysMemory};
pub use crate::mapper::{Mapping, RootTable};
pub use crate::page_entry_bits::{PageEntryBits, PageFlags};
pub use crate::page_table::{Level, PageTable, split_indices};
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use crate::tlb::Invlpg;
pub use crate::tlb::{FlushLog, TlbFlush};
