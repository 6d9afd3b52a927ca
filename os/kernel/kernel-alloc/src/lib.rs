//! # Physical Frame Pool
//!
//! Reference-counted allocator of 4 KiB physical frames, backing every user
//! page and every page-table frame of the memory manager.
//!
//! ```text
//!   alloc_4k ──► refs = 1 ──retain──► refs = n ──release…──► refs = 0 ──► free list
//! ```
//!
//! ## Invariants
//!
//! - A frame is on the free list iff its reference count is 0.
//! - [`FramePool::alloc_4k`](kernel_vmem::FrameAlloc::alloc_4k) only ever pops
//!   the free list and hands out zero-filled frames.
//! - Retaining or releasing a free frame is reported as
//!   [`FrameError::NotAllocated`](kernel_vmem::FrameError::NotAllocated) and
//!   changes nothing.
//!
//! The pool owns its frames as an arena; physical addresses are positions in
//! that arena offset by [`FRAME_POOL_BASE`]. Frame contents are reached
//! through the pool's [`PhysMapper`](kernel_vmem::PhysMapper) implementation.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod frame_pool;

pub use frame_pool::{FRAME_POOL_BASE, FramePool, FrameStats};
