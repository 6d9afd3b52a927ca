//! # Page Table Walker / Mapper
//!
//! [`RootTable`] is the owning handle of one four-level translation tree.
//! Mapping, unmapping and flag rewrites go through it and are the only places
//! where leaf entries change.
//!
//! ## Frame ownership
//!
//! - Every present leaf holds exactly one reference on its frame.
//!   [`map`](RootTable::map) takes over the caller's reference;
//!   [`unmap`](RootTable::unmap) drops it.
//! - Intermediate tables are allocated on demand while mapping and freed only
//!   by [`destroy`](RootTable::destroy).
//!
//! ## TLB maintenance
//!
//! Each successful map, unmap, remap or flag rewrite invalidates exactly the
//! affected page through the supplied [`TlbFlush`].

use crate::page_table::Level;
use crate::{
    MapError, NotMapped, PageEntryBits, PageFlags, PageTable, PhysMapper, PhysMemory, TlbFlush,
};
use alloc::vec::Vec;
use kernel_memory_addresses::{PageRange, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
use log::{debug, error, trace};

/// A present leaf as seen through the mapper.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Mapping {
    pub frame: PhysicalPage,
    pub flags: PageFlags,
}

impl Mapping {
    #[inline]
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.flags.contains(PageFlags::WRITABLE)
    }

    #[inline]
    #[must_use]
    pub const fn is_copy_on_write(&self) -> bool {
        self.flags.contains(PageFlags::COPY_ON_WRITE)
    }
}

/// Owning handle to a PML4-rooted translation tree.
///
/// Not `Clone`: exactly one handle exists per root. Dropping the handle
/// without calling [`destroy`](Self::destroy) leaks the tree.
#[derive(Debug, Eq, PartialEq)]
pub struct RootTable {
    root: PhysicalPage,
}

impl RootTable {
    /// Allocate an empty root table.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if no frame is available.
    pub fn create<M: PhysMemory + ?Sized>(mem: &mut M) -> Result<Self, MapError> {
        let root = mem.alloc_4k().ok_or(MapError::OutOfMemory(Level::Pml4))?;
        trace!("new root table at {root}");
        Ok(Self { root })
    }

    /// Physical frame of the PML4, as loaded into CR3.
    #[inline]
    #[must_use]
    pub const fn root_page(&self) -> PhysicalPage {
        self.root
    }

    /// Map `page → frame` with `flags`, allocating intermediate tables as needed.
    ///
    /// On success the leaf owns the caller's reference on `frame`. On failure
    /// the caller still owns it.
    ///
    /// # Errors
    /// - [`MapError::AlreadyMapped`] if `page` already has a present leaf.
    /// - [`MapError::OutOfMemory`] if an intermediate table cannot be allocated.
    pub fn map<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        page: VirtualPage,
        frame: PhysicalPage,
        flags: PageFlags,
    ) -> Result<(), MapError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let pt = self.ensure_leaf_table(mem, page)?;
        let index = Level::Pt.index_of(page);
        let table = mem.table_mut(pt).ok_or(MapError::InvalidTable(pt))?;
        if table.get(index).present() {
            return Err(MapError::AlreadyMapped(page));
        }
        table.set(index, PageEntryBits::leaf(frame, flags));
        tlb.flush_page(page);
        trace!("map {page} -> {frame} {flags:?}");
        Ok(())
    }

    /// Remove the leaf for `page` and release its frame reference.
    ///
    /// Returns the frame that was mapped.
    ///
    /// # Errors
    /// [`NotMapped`] if `page` has no present leaf.
    pub fn unmap<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        page: VirtualPage,
    ) -> Result<PhysicalPage, NotMapped>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let table = self.leaf_table_mut(mem, page).ok_or(NotMapped(page))?;
        let index = Level::Pt.index_of(page);
        if !table.get(index).present() {
            return Err(NotMapped(page));
        }
        let frame = table.take(index).frame();
        tlb.flush_page(page);
        if let Err(e) = mem.release(frame) {
            error!("unmap {page}: {e}");
        }
        trace!("unmap {page} (was {frame})");
        Ok(frame)
    }

    /// Point an existing leaf at a different frame with new flags.
    ///
    /// The old frame's reference is handed back to the caller unreleased; the
    /// caller's reference on `frame` moves into the leaf.
    ///
    /// # Errors
    /// [`NotMapped`] if `page` has no present leaf.
    pub fn remap<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        page: VirtualPage,
        frame: PhysicalPage,
        flags: PageFlags,
    ) -> Result<PhysicalPage, NotMapped>
    where
        M: PhysMapper + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let table = self.leaf_table_mut(mem, page).ok_or(NotMapped(page))?;
        let index = Level::Pt.index_of(page);
        let old = table.get(index);
        if !old.present() {
            return Err(NotMapped(page));
        }
        table.set(index, PageEntryBits::leaf(frame, flags));
        tlb.flush_page(page);
        trace!("remap {page}: {} -> {frame} {flags:?}", old.frame());
        Ok(old.frame())
    }

    /// Rewrite the permission bits of an existing leaf, keeping its frame.
    ///
    /// Returns the previous mapping.
    ///
    /// # Errors
    /// [`NotMapped`] if `page` has no present leaf.
    pub fn set_flags<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        page: VirtualPage,
        flags: PageFlags,
    ) -> Result<Mapping, NotMapped>
    where
        M: PhysMapper + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let table = self.leaf_table_mut(mem, page).ok_or(NotMapped(page))?;
        let index = Level::Pt.index_of(page);
        let old = table.get(index);
        if !old.present() {
            return Err(NotMapped(page));
        }
        table.set(index, PageEntryBits::leaf(old.frame(), flags));
        tlb.flush_page(page);
        Ok(Mapping {
            frame: old.frame(),
            flags: old.page_flags(),
        })
    }

    /// The present leaf for `page`, if any.
    #[must_use]
    pub fn lookup<M: PhysMapper + ?Sized>(&self, mem: &M, page: VirtualPage) -> Option<Mapping> {
        let pt = self.leaf_table(mem, page).ok()?;
        let entry = mem.table(pt)?.get(Level::Pt.index_of(page));
        entry.present().then(|| Mapping {
            frame: entry.frame(),
            flags: entry.page_flags(),
        })
    }

    /// Translate a virtual address to the physical address it maps to.
    ///
    /// # Errors
    /// [`NotMapped`] if the containing page has no present leaf.
    pub fn translate<M: PhysMapper + ?Sized>(
        &self,
        mem: &M,
        va: VirtualAddress,
    ) -> Result<PhysicalAddress, NotMapped> {
        let page = va.page();
        self.lookup(mem, page)
            .map(|m| m.frame.join(va.page_offset()))
            .ok_or(NotMapped(page))
    }

    /// Every present leaf inside `range`, in ascending order.
    ///
    /// Absent subtrees are skipped whole, so sparse ranges are cheap.
    #[must_use]
    pub fn mapped_in<M: PhysMapper + ?Sized>(
        &self,
        mem: &M,
        range: PageRange,
    ) -> Vec<(VirtualPage, Mapping)> {
        let mut out = Vec::new();
        let end = range.end().number();
        let mut vpn = range.start().number();

        while vpn < end {
            let page = VirtualPage::from_number(vpn);
            let span = match self.leaf_table(mem, page) {
                Err(missing) => missing.pages_per_entry(),
                Ok(pt) => {
                    let Some(table) = mem.table(pt) else {
                        break;
                    };
                    let first = Level::Pt.index_of(page);
                    let remaining = usize::try_from(end - vpn).unwrap_or(usize::MAX);
                    let last = first.saturating_add(remaining).min(crate::page_table::ENTRIES);
                    for index in first..last {
                        let entry = table.get(index);
                        if entry.present() {
                            out.push((
                                VirtualPage::from_number(vpn + (index - first) as u64),
                                Mapping {
                                    frame: entry.frame(),
                                    flags: entry.page_flags(),
                                },
                            ));
                        }
                    }
                    Level::Pd.pages_per_entry()
                }
            };
            // Jump to the start of the next entry at the level we inspected.
            vpn = (vpn | (span - 1)).saturating_add(1);
        }
        out
    }

    /// Release every leaf frame and every table frame, including the root.
    ///
    /// Returns the number of leaf references dropped.
    pub fn destroy<M: PhysMemory + ?Sized>(self, mem: &mut M) -> usize {
        let mut released = 0;
        release_subtree(mem, self.root, Level::Pml4, &mut released);
        debug!("destroyed root {} ({released} leaf references dropped)", self.root);
        released
    }

    /// Log every level of the walk for `va` at debug level.
    pub fn dump_walk<M: PhysMapper + ?Sized>(&self, mem: &M, va: VirtualAddress) {
        let page = va.page();
        let mut table = self.root;
        for level in [Level::Pml4, Level::Pdpt, Level::Pd, Level::Pt] {
            let index = level.index_of(page);
            let Some(t) = mem.table(table) else {
                debug!("{level}: table {table} not accessible");
                return;
            };
            let entry = t.get(index);
            debug!(
                "{level}[{index:3}] @ {table}: {:#018x} present={} rw={} us={} nx={} cow={}",
                entry.into_bits(),
                entry.present(),
                entry.writable(),
                entry.user_access(),
                entry.no_execute(),
                entry.copy_on_write()
            );
            if !entry.present() {
                return;
            }
            table = entry.frame();
        }
    }

    /// Find the level-1 table covering `page`.
    ///
    /// `Err(level)` names the level whose entry is missing.
    fn leaf_table<M: PhysMapper + ?Sized>(
        &self,
        mem: &M,
        page: VirtualPage,
    ) -> Result<PhysicalPage, Level> {
        let mut table = self.root;
        for level in [Level::Pml4, Level::Pdpt, Level::Pd] {
            let entry = mem.table(table).ok_or(level)?.get(level.index_of(page));
            if !entry.present() {
                return Err(level);
            }
            table = entry.frame();
        }
        Ok(table)
    }

    fn leaf_table_mut<'m, M: PhysMapper + ?Sized>(
        &self,
        mem: &'m mut M,
        page: VirtualPage,
    ) -> Option<&'m mut PageTable> {
        let pt = self.leaf_table(mem, page).ok()?;
        mem.table_mut(pt)
    }

    fn ensure_leaf_table<M: PhysMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        page: VirtualPage,
    ) -> Result<PhysicalPage, MapError> {
        let mut table = self.root;
        for (level, child) in [
            (Level::Pml4, Level::Pdpt),
            (Level::Pdpt, Level::Pd),
            (Level::Pd, Level::Pt),
        ] {
            let index = level.index_of(page);
            let entry = mem
                .table(table)
                .ok_or(MapError::InvalidTable(table))?
                .get(index);
            table = if entry.present() {
                entry.frame()
            } else {
                let next = mem.alloc_4k().ok_or(MapError::OutOfMemory(child))?;
                mem.table_mut(table)
                    .ok_or(MapError::InvalidTable(table))?
                    .set(index, PageEntryBits::table_link(next));
                trace!("new {child} table {next} for {page}");
                next
            };
        }
        Ok(table)
    }
}

fn release_subtree<M: PhysMemory + ?Sized>(
    mem: &mut M,
    table: PhysicalPage,
    level: Level,
    released: &mut usize,
) {
    let entries: Vec<PageEntryBits> = match mem.table(table) {
        Some(t) => t.present().map(|(_, e)| e).collect(),
        None => {
            error!("{level} table {table} not accessible during teardown");
            return;
        }
    };

    for entry in entries {
        match level.next() {
            Some(child) => release_subtree(mem, entry.frame(), child, released),
            None => match mem.release(entry.frame()) {
                Ok(_) => *released += 1,
                Err(e) => error!("teardown: {e}"),
            },
        }
    }

    if let Err(e) = mem.release(table) {
        error!("teardown of {level} table: {e}");
    }
}
