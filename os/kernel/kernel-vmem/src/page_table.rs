//! # Memory Page Table
//!
//! One 4 KiB table of 512 entries. The same type backs every level of the
//! four-level walk; the [`Level`] tag only matters for index extraction and
//! diagnostics.

use crate::PageEntryBits;
use core::fmt;
use kernel_memory_addresses::VirtualPage;

/// Entries per table.
pub const ENTRIES: usize = 512;

/// Paging level, from the root down.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    /// Page Map Level 4, the root referenced by CR3.
    Pml4,
    /// Page Directory Pointer Table.
    Pdpt,
    /// Page Directory.
    Pd,
    /// Page Table; its entries are the 4 KiB leaves.
    Pt,
}

impl Level {
    /// The level below, or `None` for the leaf level.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pml4 => Some(Self::Pdpt),
            Self::Pdpt => Some(Self::Pd),
            Self::Pd => Some(Self::Pt),
            Self::Pt => None,
        }
    }

    /// Bit position of this level's 9-bit index inside a virtual address.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Pml4 => 39,
            Self::Pdpt => 30,
            Self::Pd => 21,
            Self::Pt => 12,
        }
    }

    /// Number of 4 KiB pages covered by one entry at this level.
    #[inline]
    #[must_use]
    pub const fn pages_per_entry(self) -> u64 {
        1 << (self.shift() - 12)
    }

    /// Index into a table at this level for `page`.
    #[inline]
    #[must_use]
    pub const fn index_of(self, page: VirtualPage) -> usize {
        ((page.base().as_u64() >> self.shift()) & 0x1FF) as usize
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pml4 => "PML4",
            Self::Pdpt => "PDPT",
            Self::Pd => "PD",
            Self::Pt => "PT",
        })
    }
}

/// Split a page into its four table indices, root first.
#[inline]
#[must_use]
pub const fn split_indices(page: VirtualPage) -> [usize; 4] {
    [
        Level::Pml4.index_of(page),
        Level::Pdpt.index_of(page),
        Level::Pd.index_of(page),
        Level::Pt.index_of(page),
    ]
}

/// A page table: 512 entries, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; ENTRIES],
}

impl PageTable {
    /// An empty table (all entries non-present).
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntryBits::new(); ENTRIES],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> PageEntryBits {
        self.entries[index]
    }

    #[inline]
    pub const fn set(&mut self, index: usize, entry: PageEntryBits) {
        self.entries[index] = entry;
    }

    /// Clear one entry, returning what was there.
    #[inline]
    pub const fn take(&mut self, index: usize) -> PageEntryBits {
        let old = self.entries[index];
        self.entries[index] = PageEntryBits::new();
        old
    }

    /// Iterate `(index, entry)` over present entries.
    pub fn present(&self) -> impl Iterator<Item = (usize, PageEntryBits)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.present())
    }
}

const _: () = {
    assert!(size_of::<PageTable>() == 4096);
    assert!(align_of::<PageTable>() == 4096);
};
