//! # Virtual Memory Manager
//!
//! Per-process address spaces on top of [`kernel_vmem`]: a sorted list of
//! permission-tagged regions, the translation tree that backs them, and the
//! fault resolver that fills in lazy pages and breaks copy-on-write sharing.
//!
//! ## Pieces
//! - [`AddressSpace`]: region create / destroy / split / protect / merge,
//!   heap break adjustment, anonymous mappings.
//! - [`AddressSpace::resolve_fault`]: classify a page fault and repair it, or
//!   report a [`FatalFault`] carrying the signal to deliver.
//! - [`AddressSpace::duplicate_for_fork`]: share every present page
//!   copy-on-write with a new child space.
//! - [`AddressSpace::load_segment`] / [`AddressSpace::setup_stack`]: build a
//!   fresh program image.
//! - `copy_to_user` / `copy_from_user` / `read_user_cstr`.
//!
//! ## Invariants
//! - Regions are sorted by start and never overlap.
//! - Every present leaf lies inside exactly one region and holds one
//!   reference on its frame.
//! - After a copy-on-write fault the faulting space maps a frame nobody else
//!   maps; the other sharers keep the original.
//!
//! Physical memory, frame reference counts and TLB maintenance are reached
//! only through the [`PhysMemory`](kernel_vmem::PhysMemory) and
//! [`TlbFlush`](kernel_vmem::TlbFlush) collaborators passed into each call.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

mod address_space;
mod cow;
mod error;
mod fault;
mod flags;
mod heap;
mod image;
mod mmap;
mod region;
mod stats;
mod uaccess;

pub use crate::address_space::AddressSpace;
pub use crate::error::{FatalFault, VmmError};
pub use crate::fault::{FaultResolution, PageFaultError};
pub use crate::flags::{RegionFlags, RegionKind};
pub use crate::image::{LoadSegment, StackLayout, check_arguments};
pub use crate::region::{Region, RegionList};
pub use crate::stats::VmStats;
