//! # Address Space & Region Manager
//!
//! An [`AddressSpace`] owns one translation tree ([`RootTable`]) and the
//! sorted [`RegionList`] describing what may be mapped in it. Every mapped
//! page lies inside exactly one region.

use crate::{Region, RegionFlags, RegionKind, RegionList, VmmError};
use kernel_info::memory::{USER_HEAP_BASE, USER_MMAP_BASE, USER_SPACE_END, USER_SPACE_START, USER_STACK_TOP};
use kernel_memory_addresses::{
    PageRange, PhysicalAddress, VirtualAddress, VirtualPage, page_align_up,
};
use kernel_vmem::{Mapping, PageFlags, PhysMemory, PhysMapper, RootTable, TlbFlush};
use log::{debug, warn};

/// One process's user address space.
#[derive(Debug)]
pub struct AddressSpace {
    pub(crate) root: RootTable,
    pub(crate) regions: RegionList,
    /// First byte of the heap.
    pub(crate) heap_start: VirtualAddress,
    /// Current program break (may sit mid-page).
    pub(crate) heap_end: VirtualAddress,
    pub(crate) stack_top: VirtualAddress,
    /// Next anonymous mapping is placed below this address.
    pub(crate) mmap_cursor: VirtualAddress,
    /// Process id recorded as owner hint on allocated frames.
    pub(crate) owner: u32,
}

impl AddressSpace {
    /// An empty address space with a fresh root table.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] if the root table cannot be allocated.
    pub fn create<M: PhysMemory + ?Sized>(mem: &mut M, owner: u32) -> Result<Self, VmmError> {
        let root = RootTable::create(mem)?;
        mem.set_owner_hint(root.root_page(), owner);
        Ok(Self {
            root,
            regions: RegionList::new(),
            heap_start: VirtualAddress::new(USER_HEAP_BASE),
            heap_end: VirtualAddress::new(USER_HEAP_BASE),
            stack_top: VirtualAddress::new(USER_STACK_TOP),
            mmap_cursor: VirtualAddress::new(USER_MMAP_BASE),
            owner,
        })
    }

    #[inline]
    #[must_use]
    pub const fn owner(&self) -> u32 {
        self.owner
    }

    #[inline]
    #[must_use]
    pub const fn root(&self) -> &RootTable {
        &self.root
    }

    #[inline]
    #[must_use]
    pub const fn regions(&self) -> &RegionList {
        &self.regions
    }

    #[inline]
    #[must_use]
    pub const fn heap_start(&self) -> VirtualAddress {
        self.heap_start
    }

    /// Current program break.
    #[inline]
    #[must_use]
    pub const fn heap_end(&self) -> VirtualAddress {
        self.heap_end
    }

    #[inline]
    #[must_use]
    pub const fn stack_top(&self) -> VirtualAddress {
        self.stack_top
    }

    #[inline]
    #[must_use]
    pub const fn mmap_cursor(&self) -> VirtualAddress {
        self.mmap_cursor
    }

    /// Place an empty heap at `start` (rounded up to a page).
    ///
    /// Only meaningful before the heap has grown.
    pub fn set_heap_start(&mut self, start: VirtualAddress) {
        let start = VirtualAddress::new(page_align_up(start.as_u64()).unwrap_or(USER_HEAP_BASE));
        self.heap_start = start;
        self.heap_end = start;
    }

    #[must_use]
    pub fn find_region(&self, addr: VirtualAddress) -> Option<&Region> {
        self.regions.find(addr)
    }

    /// The present leaf for `page`, if any.
    #[must_use]
    pub fn lookup<M: PhysMapper + ?Sized>(&self, mem: &M, page: VirtualPage) -> Option<Mapping> {
        self.root.lookup(mem, page)
    }

    #[must_use]
    pub fn translate<M: PhysMapper + ?Sized>(
        &self,
        mem: &M,
        addr: VirtualAddress,
    ) -> Option<PhysicalAddress> {
        self.root.translate(mem, addr).ok()
    }

    /// Number of present leaves across all regions.
    #[must_use]
    pub fn mapped_pages<M: PhysMapper + ?Sized>(&self, mem: &M) -> usize {
        self.regions
            .iter()
            .map(|r| self.root.mapped_in(mem, r.range()).len())
            .sum()
    }

    /// Create a region over `[start, start + size)`, rounded out to pages.
    ///
    /// Unless `flags` contains [`RegionFlags::LAZY`], every page is backed by
    /// a fresh zeroed frame immediately; a partial failure unmaps what was
    /// mapped and leaves the space unchanged.
    ///
    /// # Errors
    /// - [`VmmError::InvalidParam`] for a zero size or an overflowing range.
    /// - [`VmmError::PermissionDenied`] if the range leaves user space.
    /// - [`VmmError::Overlap`] if it intersects an existing region.
    /// - [`VmmError::OutOfMemory`] if eager population fails.
    #[allow(clippy::too_many_arguments)]
    pub fn create_region<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        start: VirtualAddress,
        size: u64,
        flags: RegionFlags,
        kind: RegionKind,
        name: &'static str,
    ) -> Result<Region, VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let range = user_range(start, size)?;
        let region = Region::new(range, flags, kind, name);
        let index = self.regions.insert(region)?;

        if !flags.contains(RegionFlags::LAZY)
            && let Err(e) = self.populate(mem, tlb, range, flags.page_flags())
        {
            self.regions.remove(index);
            return Err(e);
        }

        debug!("pid {}: new {region:?}", self.owner);
        Ok(region)
    }

    /// Unmap every page of the region containing `addr` and drop it.
    ///
    /// # Errors
    /// [`VmmError::NotFound`] if no region contains `addr`.
    pub fn destroy_region<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        addr: VirtualAddress,
    ) -> Result<Region, VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let index = self.regions.position(addr).ok_or(VmmError::NotFound(addr))?;
        let range = self.regions.get(index).map(Region::range).ok_or(VmmError::NotFound(addr))?;
        let unmapped = self.unmap_pages(mem, tlb, range);
        let region = self.regions.remove(index);
        debug!("pid {}: destroyed {region:?} ({unmapped} pages)", self.owner);
        Ok(region)
    }

    /// Split the region containing `addr` into `[start, addr)` and `[addr, end)`.
    ///
    /// # Errors
    /// - [`VmmError::InvalidParam`] if `addr` is not page-aligned or is the
    ///   region's own start.
    /// - [`VmmError::NotFound`] if no region contains `addr`.
    pub fn split_region(&mut self, addr: VirtualAddress) -> Result<(), VmmError> {
        let page = VirtualPage::from_base(addr).ok_or(VmmError::InvalidParam)?;
        if self.regions.split_at(page)? {
            debug!("pid {}: split region at {addr}", self.owner);
            Ok(())
        } else {
            Err(VmmError::InvalidParam)
        }
    }

    /// Change the access bits of every region in `[addr, addr + len)`.
    ///
    /// Regions are split at the range boundaries first. Present leaves are
    /// rewritten and invalidated one by one: writable iff the region is
    /// writable and the frame is not shared copy-on-write, user iff `USER`,
    /// no-execute iff not `EXEC`.
    ///
    /// # Errors
    /// - [`VmmError::InvalidParam`] for an unaligned `addr` or overflowing range.
    /// - [`VmmError::NotFound`] if part of the range is not covered by regions;
    ///   nothing is changed in that case.
    pub fn protect_region<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        addr: VirtualAddress,
        len: u64,
        prot: RegionFlags,
    ) -> Result<(), VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        if !addr.is_page_aligned() {
            return Err(VmmError::InvalidParam);
        }
        if len == 0 {
            return Ok(());
        }
        let range = user_range(addr, len)?;
        self.check_covered(range)?;

        self.regions.split_at(range.start())?;
        if range.end().base().as_u64() < USER_SPACE_END
            && self.regions.position(range.end().base()).is_some()
        {
            self.regions.split_at(range.end())?;
        }

        for index in self.regions.overlapping(range) {
            let Some(region) = self.regions.get_mut(index) else {
                continue;
            };
            region.flags = region.flags.difference(RegionFlags::PROT) | (prot & RegionFlags::PROT);
            let flags = region.flags;
            let region_range = region.range;

            let mut marked_cow = false;
            for (page, mapping) in self.root.mapped_in(mem, region_range) {
                let shared = !flags.contains(RegionFlags::SHARED)
                    && (mapping.is_copy_on_write() || mem.ref_count(mapping.frame) > 1);
                let leaf = if shared {
                    marked_cow = true;
                    flags.cow_page_flags()
                } else {
                    flags.page_flags()
                };
                self.root.set_flags(mem, tlb, page, leaf)?;
            }
            if marked_cow
                && let Some(region) = self.regions.get_mut(index)
            {
                region.flags |= RegionFlags::COW;
            }
        }

        debug!("pid {}: protect {addr}+{len:#x} -> {prot:?}", self.owner);
        Ok(())
    }

    /// Coalesce adjacent regions with identical flags, kind and name.
    pub fn merge_regions(&mut self) -> usize {
        let merged = self.regions.merge_adjacent();
        if merged > 0 {
            debug!("pid {}: merged {merged} regions", self.owner);
        }
        merged
    }

    /// Grow the region containing `addr` so it ends at `new_end`.
    ///
    /// New pages are populated eagerly unless the region is lazy.
    ///
    /// # Errors
    /// - [`VmmError::NotFound`] if no region contains `addr`.
    /// - [`VmmError::InvalidParam`] if `new_end` does not lie above the current end.
    /// - [`VmmError::Overlap`] if the grown region would hit its neighbour.
    /// - [`VmmError::OutOfMemory`] if population fails; the region keeps its old size.
    pub fn expand_region<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        addr: VirtualAddress,
        new_end: VirtualPage,
    ) -> Result<(), VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let index = self.regions.position(addr).ok_or(VmmError::NotFound(addr))?;
        let region = *self.regions.get(index).ok_or(VmmError::NotFound(addr))?;
        if new_end <= region.range.end() || new_end.base().as_u64() > USER_SPACE_END {
            return Err(VmmError::InvalidParam);
        }
        if self
            .regions
            .get(index + 1)
            .is_some_and(|next| next.range.start() < new_end)
        {
            return Err(VmmError::Overlap);
        }

        let added = PageRange::new(region.range.end(), new_end);
        if !region.flags.contains(RegionFlags::LAZY) {
            self.populate(mem, tlb, added, region.flags.page_flags())?;
        }
        if let Some(r) = self.regions.get_mut(index) {
            r.range = PageRange::new(region.range.start(), new_end);
        }
        Ok(())
    }

    /// Remove every region and mapping, keeping the root table.
    ///
    /// Cursors return to their defaults. Returns the number of pages unmapped.
    pub fn clear<M, T>(&mut self, mem: &mut M, tlb: &mut T) -> usize
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let ranges: alloc::vec::Vec<PageRange> = self.regions.iter().map(Region::range).collect();
        let unmapped = ranges
            .into_iter()
            .map(|range| self.unmap_pages(mem, tlb, range))
            .sum();
        self.regions.clear();
        self.heap_start = VirtualAddress::new(USER_HEAP_BASE);
        self.heap_end = self.heap_start;
        self.stack_top = VirtualAddress::new(USER_STACK_TOP);
        self.mmap_cursor = VirtualAddress::new(USER_MMAP_BASE);
        debug!("pid {}: cleared address space ({unmapped} pages)", self.owner);
        unmapped
    }

    /// Release every frame and table, including the root.
    ///
    /// Returns the number of leaf references dropped.
    pub fn destroy<M: PhysMemory + ?Sized>(self, mem: &mut M) -> usize {
        let owner = self.owner;
        let released = self.root.destroy(mem);
        debug!("pid {owner}: address space destroyed");
        released
    }

    /// Back every page of `range` with a fresh zeroed frame.
    ///
    /// All-or-nothing: on failure, pages mapped by this call are unmapped.
    pub(crate) fn populate<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        range: PageRange,
        flags: PageFlags,
    ) -> Result<(), VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        for (done, page) in range.into_iter().enumerate() {
            if let Err(e) = self.map_fresh(mem, tlb, page, flags) {
                warn!("pid {}: populate failed at {page}: {e}", self.owner);
                for undo in range.into_iter().take(done) {
                    let _ = self.root.unmap(mem, tlb, undo);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Map one fresh zeroed frame at `page`.
    pub(crate) fn map_fresh<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        page: VirtualPage,
        flags: PageFlags,
    ) -> Result<(), VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let frame = mem.alloc_4k().ok_or(VmmError::OutOfMemory)?;
        mem.set_owner_hint(frame, self.owner);
        if let Err(e) = self.root.map(mem, tlb, page, frame, flags) {
            let _ = mem.release(frame);
            return Err(e.into());
        }
        Ok(())
    }

    /// Unmap all present leaves in `range`; returns how many there were.
    pub(crate) fn unmap_pages<M, T>(&mut self, mem: &mut M, tlb: &mut T, range: PageRange) -> usize
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let mapped = self.root.mapped_in(mem, range);
        for (page, _) in &mapped {
            let _ = self.root.unmap(mem, tlb, *page);
        }
        mapped.len()
    }

    /// Ensure `range` is fully covered by regions without gaps.
    fn check_covered(&self, range: PageRange) -> Result<(), VmmError> {
        let mut cursor = range.start();
        for index in self.regions.overlapping(range) {
            let Some(r) = self.regions.get(index) else {
                break;
            };
            if r.range().start() > cursor {
                return Err(VmmError::NotFound(cursor.base()));
            }
            cursor = r.range().end();
        }
        if cursor < range.end() {
            return Err(VmmError::NotFound(cursor.base()));
        }
        Ok(())
    }
}

/// Validate `[start, start + size)` against the user half and round it out.
pub(crate) fn user_range(start: VirtualAddress, size: u64) -> Result<PageRange, VmmError> {
    if size == 0 {
        return Err(VmmError::InvalidParam);
    }
    let range = PageRange::covering(start, size).ok_or(VmmError::InvalidParam)?;
    if range.start().base().as_u64() < USER_SPACE_START
        || range.end().base().as_u64() > USER_SPACE_END
    {
        return Err(VmmError::PermissionDenied);
    }
    Ok(range)
}
