//! Program-break adjustment.

use crate::{AddressSpace, RegionFlags, RegionKind, VmmError};
use kernel_memory_addresses::{PageRange, VirtualAddress, VirtualPage, page_align_up};
use kernel_vmem::{PhysMemory, TlbFlush};
use log::debug;

/// Permissions of the heap region.
const HEAP_FLAGS: RegionFlags = RegionFlags::READ
    .union(RegionFlags::WRITE)
    .union(RegionFlags::USER);

/// Bits that must match [`HEAP_FLAGS`] for a piece to be extended in place.
const HEAP_MASK: RegionFlags = RegionFlags::PROT
    .union(RegionFlags::USER)
    .union(RegionFlags::SHARED)
    .union(RegionFlags::LAZY);

impl AddressSpace {
    /// Move the program break by `delta` bytes and return the previous break.
    ///
    /// Growth maps the newly covered pages eagerly; shrinking unmaps pages
    /// that no longer hold any byte below the break. The heap region is
    /// created on first growth and removed when the break returns to the
    /// heap start. After `mprotect` or `munmap` inside the heap it may consist
    /// of several pieces; growth continues from the piece ending at the old
    /// break, or starts a new piece there.
    ///
    /// # Errors
    /// - [`VmmError::InvalidParam`] if the break would overflow or drop below
    ///   the heap start.
    /// - [`VmmError::Overlap`] if growth would run into another region.
    /// - [`VmmError::OutOfMemory`] if frames run out; the break is unchanged.
    pub fn adjust_heap<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        delta: i64,
    ) -> Result<VirtualAddress, VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let old = self.heap_end;
        if delta == 0 {
            return Ok(old);
        }

        let new = if delta > 0 {
            old.checked_add(delta.unsigned_abs())
        } else {
            old.checked_sub(delta.unsigned_abs())
        }
        .ok_or(VmmError::InvalidParam)?;
        if new < self.heap_start {
            return Err(VmmError::InvalidParam);
        }

        let old_top = heap_page(old)?;
        let new_top = heap_page(new)?;

        if new_top > old_top {
            self.grow_heap(mem, tlb, old_top, new_top)?;
        } else if new_top < old_top {
            self.shrink_heap(mem, tlb, new_top, old_top);
        }

        self.heap_end = new;
        debug!("pid {}: break {old} -> {new}", self.owner);
        Ok(old)
    }

    /// Back `[old_top, new_top)` with heap pages.
    ///
    /// The heap piece ending at `old_top` is extended when it still carries
    /// the heap permissions; otherwise a new piece starts at `old_top`.
    fn grow_heap<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        old_top: VirtualPage,
        new_top: VirtualPage,
    ) -> Result<(), VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let extendable = (old_top > self.heap_start.page())
            .then(|| VirtualPage::from_number(old_top.number() - 1).base())
            .filter(|&last| {
                self.regions.find(last).is_some_and(|r| {
                    r.kind == RegionKind::Heap
                        && r.range.end() == old_top
                        && (r.flags & HEAP_MASK) == HEAP_FLAGS
                })
            });

        match extendable {
            Some(last) => self.expand_region(mem, tlb, last, new_top),
            None => {
                let size = new_top.base().as_u64() - old_top.base().as_u64();
                self.create_region(mem, tlb, old_top.base(), size, HEAP_FLAGS, RegionKind::Heap, "[heap]")
                    .map(|_| ())
            }
        }
    }

    /// Drop every heap page in `[new_top, old_top)`.
    ///
    /// Heap pieces straddling `new_top` are cut there; pieces wholly above it
    /// are removed. Regions of other kinds in the range are left alone.
    fn shrink_heap<M, T>(&mut self, mem: &mut M, tlb: &mut T, new_top: VirtualPage, old_top: VirtualPage)
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let released = PageRange::new(new_top, old_top);
        if self
            .regions
            .find(new_top.base())
            .is_some_and(|r| r.kind == RegionKind::Heap)
        {
            // Contained, so the split cannot miss.
            let _ = self.regions.split_at(new_top);
        }

        for index in self.regions.overlapping(released).rev() {
            let Some(region) = self.regions.get(index).copied() else {
                continue;
            };
            if region.kind != RegionKind::Heap {
                continue;
            }
            let unmapped = self.unmap_pages(mem, tlb, region.range);
            self.regions.remove(index);
            debug!("pid {}: released heap piece {region:?} ({unmapped} pages)", self.owner);
        }
    }
}

/// First page above the heap when the break is at `brk`.
fn heap_page(brk: VirtualAddress) -> Result<VirtualPage, VmmError> {
    let top = page_align_up(brk.as_u64()).ok_or(VmmError::InvalidParam)?;
    Ok(VirtualAddress::new(top).page())
}
