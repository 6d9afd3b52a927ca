//! Collaborator traits through which the mapper reaches physical memory.

use crate::{FrameError, PageTable};
use kernel_memory_addresses::PhysicalPage;

/// Bytes in one frame.
pub const FRAME_BYTES: usize = 4096;

/// Reference-counted allocator of 4 KiB **physical** frames.
///
/// ### Contract
/// - [`alloc_4k`](Self::alloc_4k) hands out a zeroed frame with reference
///   count 1 and never returns a frame that is still in use.
/// - [`retain`](Self::retain) adds a reference when a frame becomes shared.
/// - [`release`](Self::release) drops one reference; the frame returns to
///   the pool only when the count reaches 0.
///
/// Exhaustion is reported as `None`, never as a panic.
pub trait FrameAlloc {
    /// Allocate one zeroed 4 KiB frame with reference count 1.
    fn alloc_4k(&mut self) -> Option<PhysicalPage>;

    /// Add one reference; returns the new count.
    ///
    /// # Errors
    /// [`FrameError`] if `frame` is not currently allocated.
    fn retain(&mut self, frame: PhysicalPage) -> Result<u32, FrameError>;

    /// Drop one reference; returns the remaining count.
    ///
    /// # Errors
    /// [`FrameError`] if `frame` is not currently allocated.
    fn release(&mut self, frame: PhysicalPage) -> Result<u32, FrameError>;

    /// Current reference count (0 for free or unknown frames).
    fn ref_count(&self, frame: PhysicalPage) -> u32;

    /// Record which process a frame was allocated for. Diagnostics only.
    fn set_owner_hint(&mut self, _frame: PhysicalPage, _owner: u32) {}
}

/// Access to the contents of physical frames from kernel code.
///
/// A real kernel implements this over its direct map; tests implement it
/// over an in-memory arena. `None` means the frame is outside the memory the
/// mapper knows about.
pub trait PhysMapper {
    fn frame(&self, frame: PhysicalPage) -> Option<&[u8; FRAME_BYTES]>;

    fn frame_mut(&mut self, frame: PhysicalPage) -> Option<&mut [u8; FRAME_BYTES]>;

    /// View a frame as a page table.
    fn table(&self, frame: PhysicalPage) -> Option<&PageTable>;

    /// View a frame as a mutable page table.
    fn table_mut(&mut self, frame: PhysicalPage) -> Option<&mut PageTable>;

    /// Copy the full contents of `src` into `dst`.
    ///
    /// Returns `false` if either frame is unknown.
    fn copy_frame(&mut self, src: PhysicalPage, dst: PhysicalPage) -> bool {
        let Some(bytes) = self.frame(src).copied() else {
            return false;
        };
        match self.frame_mut(dst) {
            Some(target) => {
                *target = bytes;
                true
            }
            None => false,
        }
    }
}

/// Anything that can both allocate frames and reach their contents.
pub trait PhysMemory: FrameAlloc + PhysMapper {}

impl<T: FrameAlloc + PhysMapper + ?Sized> PhysMemory for T {}
