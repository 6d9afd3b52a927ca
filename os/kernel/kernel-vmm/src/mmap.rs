//! Anonymous mappings.

use crate::{AddressSpace, RegionFlags, RegionKind, VmmError, address_space::user_range};
use kernel_memory_addresses::{PageRange, VirtualAddress, VirtualPage, page_align_up};
use kernel_vmem::{PhysMemory, TlbFlush};
use log::debug;

impl AddressSpace {
    /// Reserve `len` bytes of lazily backed memory and return its start.
    ///
    /// A page-aligned, free `hint` is honoured. Otherwise the mapping is
    /// placed top-down below the mmap cursor, skipping existing regions, and
    /// never below the current program break.
    ///
    /// # Errors
    /// - [`VmmError::InvalidParam`] for `len == 0` or an overflowing length.
    /// - [`VmmError::OutOfMemory`] if no gap large enough remains.
    pub fn map_anonymous<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        hint: Option<VirtualAddress>,
        len: u64,
        prot: RegionFlags,
    ) -> Result<VirtualAddress, VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        if len == 0 {
            return Err(VmmError::InvalidParam);
        }
        let size = page_align_up(len).ok_or(VmmError::InvalidParam)?;

        let shared = prot.contains(RegionFlags::SHARED);
        let flags = (prot & (RegionFlags::PROT | RegionFlags::SHARED))
            | RegionFlags::USER
            | RegionFlags::LAZY;
        let kind = if shared {
            RegionKind::Shared
        } else {
            RegionKind::Mmap
        };

        let (start, from_cursor) = match hint.filter(|h| self.is_free(*h, size)) {
            Some(h) => (h, false),
            None => (self.find_gap(size)?, true),
        };

        self.create_region(mem, tlb, start, size, flags, kind, "[mmap]")?;
        if from_cursor {
            self.mmap_cursor = start;
        }
        debug!("pid {}: mmap {start}+{size:#x} {flags:?}", self.owner);
        Ok(start)
    }

    /// Remove every mapping in `[addr, addr + len)`.
    ///
    /// Regions straddling the boundaries are split; uncovered parts of the
    /// range are ignored. Returns the number of pages unmapped.
    ///
    /// # Errors
    /// [`VmmError::InvalidParam`] for an unaligned `addr`, `len == 0` or a
    /// range leaving user space.
    pub fn unmap_range<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        addr: VirtualAddress,
        len: u64,
    ) -> Result<usize, VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        if !addr.is_page_aligned() {
            return Err(VmmError::InvalidParam);
        }
        let range = user_range(addr, len).map_err(|_| VmmError::InvalidParam)?;

        for boundary in [range.start(), range.end()] {
            if self.regions.position(boundary.base()).is_some() {
                self.regions.split_at(boundary)?;
            }
        }

        let mut unmapped = 0;
        while let Some(index) = self.regions.overlapping(range).next() {
            let region = self.regions.remove(index);
            unmapped += self.unmap_pages(mem, tlb, region.range());
        }
        debug!("pid {}: munmap {addr}+{len:#x} ({unmapped} pages)", self.owner);
        Ok(unmapped)
    }

    fn is_free(&self, start: VirtualAddress, size: u64) -> bool {
        start.is_page_aligned()
            && user_range(start, size).is_ok_and(|r| {
                !self.regions.intersects(r) && r.start().base() >= self.heap_end
            })
    }

    /// Highest gap of `size` bytes below the mmap cursor.
    fn find_gap(&self, size: u64) -> Result<VirtualAddress, VmmError> {
        let floor = page_align_up(self.heap_end.as_u64()).ok_or(VmmError::OutOfMemory)?;
        let mut top = self.mmap_cursor.as_u64();
        loop {
            let start = top
                .checked_sub(size)
                .filter(|s| *s >= floor)
                .ok_or(VmmError::OutOfMemory)?;
            let candidate = PageRange::new(
                VirtualPage::containing(VirtualAddress::new(start)),
                VirtualPage::containing(VirtualAddress::new(top)),
            );
            // Move below the lowest region in the way and retry.
            match self
                .regions
                .overlapping(candidate)
                .next()
                .and_then(|i| self.regions.get(i))
            {
                Some(blocker) => top = blocker.start().as_u64(),
                None => return Ok(VirtualAddress::new(start)),
            }
        }
    }
}
