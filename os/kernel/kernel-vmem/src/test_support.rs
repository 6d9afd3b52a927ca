//! In-memory "physical RAM" for unit tests.

use crate::{FRAME_BYTES, FrameAlloc, FrameError, PageTable, PhysMapper};
use alloc::vec::Vec;
use kernel_memory_addresses::PhysicalPage;

/// A 4 KiB-aligned raw frame.
#[repr(C, align(4096))]
struct Aligned4K([u8; FRAME_BYTES]);

/// Frames are numbered from 1 so that frame 0 never looks valid.
pub struct TestPhys {
    frames: Vec<Aligned4K>,
    refs: Vec<u32>,
}

impl TestPhys {
    pub fn with_frames(n: usize) -> Self {
        let mut frames = Vec::with_capacity(n);
        for _ in 0..n {
            frames.push(Aligned4K([0; FRAME_BYTES]));
        }
        Self {
            frames,
            refs: alloc::vec![0; n],
        }
    }

    pub fn allocated(&self) -> usize {
        self.refs.iter().filter(|&&r| r > 0).count()
    }

    fn index(&self, frame: PhysicalPage) -> Option<usize> {
        let idx = usize::try_from(frame.number()).ok()?.checked_sub(1)?;
        (idx < self.frames.len()).then_some(idx)
    }
}

impl FrameAlloc for TestPhys {
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        let idx = self.refs.iter().position(|&r| r == 0)?;
        self.refs[idx] = 1;
        self.frames[idx].0.fill(0);
        Some(PhysicalPage::from_number(idx as u64 + 1))
    }

    fn retain(&mut self, frame: PhysicalPage) -> Result<u32, FrameError> {
        let idx = self.index(frame).ok_or(FrameError::OutOfRange(frame))?;
        if self.refs[idx] == 0 {
            return Err(FrameError::NotAllocated(frame));
        }
        self.refs[idx] += 1;
        Ok(self.refs[idx])
    }

    fn release(&mut self, frame: PhysicalPage) -> Result<u32, FrameError> {
        let idx = self.index(frame).ok_or(FrameError::OutOfRange(frame))?;
        if self.refs[idx] == 0 {
            return Err(FrameError::NotAllocated(frame));
        }
        self.refs[idx] -= 1;
        Ok(self.refs[idx])
    }

    fn ref_count(&self, frame: PhysicalPage) -> u32 {
        self.index(frame).map_or(0, |i| self.refs[i])
    }
}

impl PhysMapper for TestPhys {
    fn frame(&self, frame: PhysicalPage) -> Option<&[u8; FRAME_BYTES]> {
        self.index(frame).map(|i| &self.frames[i].0)
    }

    fn frame_mut(&mut self, frame: PhysicalPage) -> Option<&mut [u8; FRAME_BYTES]> {
        self.index(frame).map(|i| &mut self.frames[i].0)
    }

    fn table(&self, frame: PhysicalPage) -> Option<&PageTable> {
        let i = self.index(frame)?;
        // SAFETY: same size and alignment, and every bit pattern is a valid entry.
        Some(unsafe { &*core::ptr::from_ref(&self.frames[i]).cast::<PageTable>() })
    }

    fn table_mut(&mut self, frame: PhysicalPage) -> Option<&mut PageTable> {
        let i = self.index(frame)?;
        // SAFETY: as above; `&mut self` keeps the borrow unique.
        Some(unsafe { &mut *core::ptr::from_mut(&mut self.frames[i]).cast::<PageTable>() })
    }
}
