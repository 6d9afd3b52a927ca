use alloc::vec::Vec;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
use kernel_vmem::{FRAME_BYTES, FrameAlloc, FrameError, PageTable, PhysMapper};
use log::{debug, error, trace};

/// Physical address of the first pooled frame (1 MiB, above legacy low memory).
pub const FRAME_POOL_BASE: u64 = 0x10_0000;

/// One 4 KiB frame of backing storage.
#[repr(C, align(4096))]
struct Frame([u8; FRAME_BYTES]);

/// Bookkeeping for one frame.
#[derive(Copy, Clone, Default)]
struct FrameInfo {
    refs: u32,
    /// Process the frame was allocated for, if known.
    owner: Option<u32>,
}

/// Snapshot of pool occupancy.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FrameStats {
    pub total: usize,
    pub free: usize,
    pub allocated: usize,
    /// Allocated frames with more than one reference.
    pub shared: usize,
}

/// Reference-counted arena of 4 KiB frames.
pub struct FramePool {
    frames: Vec<Frame>,
    info: Vec<FrameInfo>,
    /// Indices of free frames; allocation pops from the end.
    free: Vec<u32>,
}

impl FramePool {
    /// A pool of `frames` zeroed frames, all free.
    #[must_use]
    pub fn new(frames: usize) -> Self {
        let mut storage = Vec::with_capacity(frames);
        storage.resize_with(frames, || Frame([0; FRAME_BYTES]));
        // Reverse so that the lowest frame is handed out first.
        let free = (0..u32::try_from(frames).unwrap_or(u32::MAX)).rev().collect();
        debug!("frame pool: {frames} frames at {:#x}", FRAME_POOL_BASE);
        Self {
            frames: storage,
            info: alloc::vec![FrameInfo::default(); frames],
            free,
        }
    }

    /// Pool sized to hold `bytes` of memory (rounded down to whole frames).
    #[must_use]
    pub fn with_capacity_bytes(bytes: usize) -> Self {
        Self::new(bytes / FRAME_BYTES)
    }

    #[must_use]
    pub fn stats(&self) -> FrameStats {
        let (allocated, shared) = self.info.iter().fold((0, 0), |(a, s), i| match i.refs {
            0 => (a, s),
            1 => (a + 1, s),
            _ => (a + 1, s + 1),
        });
        FrameStats {
            total: self.frames.len(),
            free: self.free.len(),
            allocated,
            shared,
        }
    }

    #[inline]
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.free.len()
    }

    /// Owner recorded for `frame`, if any.
    #[must_use]
    pub fn owner_hint(&self, frame: PhysicalPage) -> Option<u32> {
        self.index(frame).ok().and_then(|i| self.info[i].owner)
    }

    /// Whether `frame` is currently on the free list.
    #[must_use]
    pub fn is_free(&self, frame: PhysicalPage) -> bool {
        self.index(frame).is_ok_and(|i| self.info[i].refs == 0)
    }

    #[inline]
    fn page_of(index: usize) -> PhysicalPage {
        PhysicalPage::containing(PhysicalAddress::new(
            FRAME_POOL_BASE + (index * FRAME_BYTES) as u64,
        ))
    }

    fn index(&self, frame: PhysicalPage) -> Result<usize, FrameError> {
        let offset = frame
            .base()
            .as_u64()
            .checked_sub(FRAME_POOL_BASE)
            .ok_or(FrameError::OutOfRange(frame))?;
        let index = usize::try_from(offset / FRAME_BYTES as u64)
            .map_err(|_| FrameError::OutOfRange(frame))?;
        if index < self.frames.len() {
            Ok(index)
        } else {
            Err(FrameError::OutOfRange(frame))
        }
    }

    fn allocated_index(&self, frame: PhysicalPage) -> Result<usize, FrameError> {
        let index = self.index(frame)?;
        if self.info[index].refs == 0 {
            error!("frame {frame} is not allocated");
            return Err(FrameError::NotAllocated(frame));
        }
        Ok(index)
    }
}

impl FrameAlloc for FramePool {
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        let Some(index) = self.free.pop() else {
            debug!("frame pool exhausted");
            return None;
        };
        let index = index as usize;
        debug_assert_eq!(self.info[index].refs, 0, "free list holds a live frame");
        self.info[index] = FrameInfo {
            refs: 1,
            owner: None,
        };
        self.frames[index].0.fill(0);
        let page = Self::page_of(index);
        trace!("alloc frame {page}");
        Some(page)
    }

    fn retain(&mut self, frame: PhysicalPage) -> Result<u32, FrameError> {
        let index = self.allocated_index(frame)?;
        let info = &mut self.info[index];
        info.refs = info
            .refs
            .checked_add(1)
            .ok_or(FrameError::RefCountOverflow(frame))?;
        Ok(info.refs)
    }

    fn release(&mut self, frame: PhysicalPage) -> Result<u32, FrameError> {
        let index = self.allocated_index(frame)?;
        let info = &mut self.info[index];
        info.refs -= 1;
        let remaining = info.refs;
        if remaining == 0 {
            info.owner = None;
            // `index` came from a u32 free-list entry or fits the pool size.
            self.free.push(u32::try_from(index).unwrap_or(u32::MAX));
            trace!("free frame {frame}");
        }
        Ok(remaining)
    }

    fn ref_count(&self, frame: PhysicalPage) -> u32 {
        self.index(frame).map_or(0, |i| self.info[i].refs)
    }

    fn set_owner_hint(&mut self, frame: PhysicalPage, owner: u32) {
        if let Ok(index) = self.allocated_index(frame) {
            self.info[index].owner = Some(owner);
        }
    }
}

impl PhysMapper for FramePool {
    fn frame(&self, frame: PhysicalPage) -> Option<&[u8; FRAME_BYTES]> {
        self.index(frame).ok().map(|i| &self.frames[i].0)
    }

    fn frame_mut(&mut self, frame: PhysicalPage) -> Option<&mut [u8; FRAME_BYTES]> {
        let i = self.index(frame).ok()?;
        Some(&mut self.frames[i].0)
    }

    fn table(&self, frame: PhysicalPage) -> Option<&PageTable> {
        let i = self.index(frame).ok()?;
        // SAFETY: `Frame` and `PageTable` are both 4096 bytes with 4096-byte
        // alignment, and every bit pattern is a valid table entry.
        Some(unsafe { &*core::ptr::from_ref(&self.frames[i]).cast::<PageTable>() })
    }

    fn table_mut(&mut self, frame: PhysicalPage) -> Option<&mut PageTable> {
        let i = self.index(frame).ok()?;
        // SAFETY: as above; `&mut self` keeps the borrow unique.
        Some(unsafe { &mut *core::ptr::from_mut(&mut self.frames[i]).cast::<PageTable>() })
    }
}

const _: () = {
    assert!(size_of::<Frame>() == size_of::<PageTable>());
    assert!(align_of::<Frame>() == align_of::<PageTable>());
    assert!(FRAME_POOL_BASE.is_multiple_of(FRAME_BYTES as u64));
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_hands_out_zeroed_frames_in_order() {
        let mut pool = FramePool::new(4);
        let a = pool.alloc_4k().unwrap();
        assert_eq!(a.base().as_u64(), FRAME_POOL_BASE);
        pool.frame_mut(a).unwrap()[10] = 0xAB;
        pool.release(a).unwrap();

        // LIFO reuse; the stale byte must be gone.
        let b = pool.alloc_4k().unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.frame(b).unwrap()[10], 0);
    }

    #[test]
    fn exhaustion_is_none() {
        let mut pool = FramePool::new(2);
        assert!(pool.alloc_4k().is_some());
        assert!(pool.alloc_4k().is_some());
        assert!(pool.alloc_4k().is_none());
        assert_eq!(pool.free_frames(), 0);
    }

    #[test]
    fn shared_frame_is_freed_on_last_release() {
        let mut pool = FramePool::new(4);
        let f = pool.alloc_4k().unwrap();
        assert_eq!(pool.retain(f), Ok(2));
        assert_eq!(pool.stats().shared, 1);

        assert_eq!(pool.release(f), Ok(1));
        assert!(!pool.is_free(f));
        assert_eq!(pool.release(f), Ok(0));
        assert!(pool.is_free(f));
        assert_eq!(
            pool.stats(),
            FrameStats {
                total: 4,
                free: 4,
                allocated: 0,
                shared: 0
            }
        );
    }

    #[test]
    fn misuse_is_reported_not_applied() {
        let mut pool = FramePool::new(2);
        let f = pool.alloc_4k().unwrap();
        pool.release(f).unwrap();
        assert_eq!(pool.release(f), Err(FrameError::NotAllocated(f)));
        assert_eq!(pool.retain(f), Err(FrameError::NotAllocated(f)));
        assert_eq!(pool.free_frames(), 2);

        let outside = PhysicalPage::from_number(1);
        assert_eq!(pool.release(outside), Err(FrameError::OutOfRange(outside)));
        assert_eq!(pool.ref_count(outside), 0);
    }

    #[test]
    fn owner_hint_cleared_on_free() {
        let mut pool = FramePool::new(2);
        let f = pool.alloc_4k().unwrap();
        pool.set_owner_hint(f, 7);
        assert_eq!(pool.owner_hint(f), Some(7));
        pool.release(f).unwrap();
        assert_eq!(pool.owner_hint(f), None);
    }

    #[test]
    fn copy_frame_duplicates_contents() {
        let mut pool = FramePool::new(2);
        let a = pool.alloc_4k().unwrap();
        let b = pool.alloc_4k().unwrap();
        pool.frame_mut(a).unwrap()[4095] = 42;
        assert!(pool.copy_frame(a, b));
        assert_eq!(pool.frame(b).unwrap()[4095], 42);
    }

    #[test]
    fn frames_double_as_page_tables() {
        let mut pool = FramePool::new(1);
        let f = pool.alloc_4k().unwrap();
        let entry = kernel_vmem::PageEntryBits::new().with_present(true);
        pool.table_mut(f).unwrap().set(1, entry);
        assert_eq!(pool.frame(f).unwrap()[8], 1);
    }
}
