//! Address-space duplication for `fork`.
//!
//! No data is copied up front. Every present private page ends up mapped in
//! both spaces, read-only with the copy-on-write bit set, and its frame gains
//! one reference for the child. Shared regions keep their leaves as they are.

use crate::{AddressSpace, RegionFlags, VmStats, VmmError};
use kernel_vmem::{MapError, PhysMemory, TlbFlush};
use log::{debug, warn};

impl AddressSpace {
    /// Build the child's address space for a fork.
    ///
    /// The parent's writable private leaves are downgraded to read-only
    /// copy-on-write and invalidated. On failure the partially built child is
    /// destroyed; parent pages already downgraded stay copy-on-write, which
    /// the fault resolver turns back into plain writable pages on first write.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] if the child's tables cannot be allocated.
    pub fn duplicate_for_fork<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        stats: &mut VmStats,
        child_owner: u32,
    ) -> Result<Self, VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let mut child = Self::create(mem, child_owner)?;
        child.heap_start = self.heap_start;
        child.heap_end = self.heap_end;
        child.stack_top = self.stack_top;
        child.mmap_cursor = self.mmap_cursor;

        match self.share_into(&mut child, mem, tlb, stats) {
            Ok(shared) => {
                debug!(
                    "fork {} -> {child_owner}: {} regions, {shared} pages shared",
                    self.owner,
                    child.regions.len()
                );
                Ok(child)
            }
            Err(e) => {
                warn!("fork {} -> {child_owner} failed: {e}", self.owner);
                child.destroy(mem);
                Err(e)
            }
        }
    }

    fn share_into<M, T>(
        &mut self,
        child: &mut Self,
        mem: &mut M,
        tlb: &mut T,
        stats: &mut VmStats,
    ) -> Result<u64, VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let mut shared = 0;
        for index in 0..self.regions.len() {
            let Some(region) = self.regions.get_mut(index) else {
                break;
            };
            let private = !region.flags.contains(RegionFlags::SHARED);
            let copy_on_write = private && region.flags.contains(RegionFlags::WRITE);
            if copy_on_write {
                region.flags |= RegionFlags::COW;
            }
            let region = *region;
            child.regions.insert(region)?;

            for (page, mapping) in self.root.mapped_in(mem, region.range()) {
                // Read-only private frames are shared as they are; a later
                // mprotect sees the reference count and marks them then.
                let flags = if copy_on_write {
                    region.flags().cow_page_flags()
                } else if private {
                    region.flags().page_flags()
                } else {
                    mapping.flags
                };
                if flags != mapping.flags {
                    self.root.set_flags(mem, tlb, page, flags)?;
                }

                mem.retain(mapping.frame)
                    .map_err(|_| VmmError::Corrupted(MapError::InvalidTable(mapping.frame)))?;
                // The child's throwaway TLB state needs no flush; it has never run.
                if let Err(e) = child.root.map(mem, &mut NoFlush, page, mapping.frame, flags) {
                    let _ = mem.release(mapping.frame);
                    return Err(e.into());
                }
                if private {
                    shared += 1;
                    stats.pages_shared += 1;
                }
            }
        }
        Ok(shared)
    }
}

/// Flush sink for a space that has never been loaded.
struct NoFlush;

impl TlbFlush for NoFlush {
    fn flush_page(&mut self, _page: kernel_memory_addresses::VirtualPage) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegionKind;
    use kernel_alloc::FramePool;
    use kernel_memory_addresses::VirtualAddress;
    use kernel_vmem::{FlushLog, FrameAlloc, PhysMapper};

    const RW: RegionFlags = RegionFlags::READ
        .union(RegionFlags::WRITE)
        .union(RegionFlags::USER);

    #[test]
    fn private_pages_become_shared_cow() {
        let mut pool = FramePool::new(64);
        let mut tlb = FlushLog::new();
        let mut stats = VmStats::default();
        let mut parent = AddressSpace::create(&mut pool, 1).unwrap();
        parent
            .create_region(&mut pool, &mut tlb, VirtualAddress::new(0x40_0000), 0x2000, RW, RegionKind::Data, "d")
            .unwrap();
        tlb.clear();

        let child = parent.duplicate_for_fork(&mut pool, &mut tlb, &mut stats, 2).unwrap();
        assert_eq!(stats.pages_shared, 2);
        assert_eq!(tlb.pages().len(), 2);
        assert_eq!(child.owner(), 2);

        let page = VirtualAddress::new(0x40_0000).page();
        let p = parent.lookup(&pool, page).unwrap();
        let c = child.lookup(&pool, page).unwrap();
        assert_eq!(p, c);
        assert!(p.is_copy_on_write() && !p.is_writable());
        assert_eq!(pool.ref_count(p.frame), 2);
        assert!(child.find_region(page.base()).unwrap().flags().contains(RegionFlags::COW));
        assert!(parent.find_region(page.base()).unwrap().flags().contains(RegionFlags::COW));
    }

    #[test]
    fn read_only_pages_are_shared_without_cow_bit() {
        let mut pool = FramePool::new(64);
        let mut tlb = FlushLog::new();
        let mut stats = VmStats::default();
        let mut parent = AddressSpace::create(&mut pool, 1).unwrap();
        let code = RegionFlags::READ | RegionFlags::EXEC | RegionFlags::USER;
        parent
            .create_region(&mut pool, &mut tlb, VirtualAddress::new(0x40_0000), 0x1000, code, RegionKind::Code, "c")
            .unwrap();

        let mut child = parent.duplicate_for_fork(&mut pool, &mut tlb, &mut stats, 2).unwrap();
        let page = VirtualAddress::new(0x40_0000).page();
        let p = parent.lookup(&pool, page).unwrap();
        let c = child.lookup(&pool, page).unwrap();
        assert_eq!(p.frame, c.frame);
        assert!(!p.is_copy_on_write() && !c.is_copy_on_write());
        assert!(!c.is_writable());
        assert!(!child.find_region(page.base()).unwrap().flags().contains(RegionFlags::COW));
        assert_eq!(pool.ref_count(c.frame), 2);

        // Made writable later, the still-shared frame turns copy-on-write.
        child
            .protect_region(&mut pool, &mut tlb, page.base(), 0x1000, RegionFlags::READ | RegionFlags::WRITE)
            .unwrap();
        assert!(child.lookup(&pool, page).unwrap().is_copy_on_write());
    }

    #[test]
    fn shared_regions_keep_writable_leaves() {
        let mut pool = FramePool::new(64);
        let mut tlb = FlushLog::new();
        let mut stats = VmStats::default();
        let mut parent = AddressSpace::create(&mut pool, 1).unwrap();
        parent
            .create_region(&mut pool, &mut tlb, VirtualAddress::new(0x40_0000), 0x1000, RW | RegionFlags::SHARED, RegionKind::Shared, "s")
            .unwrap();

        let child = parent.duplicate_for_fork(&mut pool, &mut tlb, &mut stats, 2).unwrap();
        let page = VirtualAddress::new(0x40_0000).page();
        let c = child.lookup(&pool, page).unwrap();
        assert!(c.is_writable() && !c.is_copy_on_write());
        assert_eq!(stats.pages_shared, 0);

        pool.frame_mut(c.frame).unwrap()[7] = 9;
        let p = parent.lookup(&pool, page).unwrap();
        assert_eq!(pool.frame(p.frame).unwrap()[7], 9);
    }

    #[test]
    fn lazy_untouched_pages_are_not_shared() {
        let mut pool = FramePool::new(64);
        let mut tlb = FlushLog::new();
        let mut stats = VmStats::default();
        let mut parent = AddressSpace::create(&mut pool, 1).unwrap();
        parent
            .create_region(&mut pool, &mut tlb, VirtualAddress::new(0x40_0000), 0x4000, RW | RegionFlags::LAZY, RegionKind::Mmap, "m")
            .unwrap();

        let child = parent.duplicate_for_fork(&mut pool, &mut tlb, &mut stats, 2).unwrap();
        assert_eq!(child.regions().len(), 1);
        assert_eq!(child.mapped_pages(&pool), 0);
        assert_eq!(child.heap_end(), parent.heap_end());
    }

    #[test]
    fn failure_leaves_no_child_frames() {
        let mut pool = FramePool::new(12);
        let mut tlb = FlushLog::new();
        let mut stats = VmStats::default();
        let mut parent = AddressSpace::create(&mut pool, 1).unwrap();
        parent
            .create_region(&mut pool, &mut tlb, VirtualAddress::new(0x40_0000), 0x1000, RW, RegionKind::Data, "d")
            .unwrap();
        // Parent now holds root + 3 tables + 1 data frame; leave room for the
        // child's root and PDPT only.
        for _ in 2..pool.free_frames() {
            pool.alloc_4k().unwrap();
        }
        let free = pool.free_frames();

        let res = parent.duplicate_for_fork(&mut pool, &mut tlb, &mut stats, 2);
        assert_eq!(res.err(), Some(VmmError::OutOfMemory));
        assert_eq!(pool.free_frames(), free);
        let frame = parent.lookup(&pool, VirtualAddress::new(0x40_0000).page()).unwrap().frame;
        assert_eq!(pool.ref_count(frame), 1);
    }
}
