//! Sorted, non-overlapping region bookkeeping.

use crate::{RegionFlags, RegionKind, VmmError};
use alloc::vec::Vec;
use core::fmt;
use kernel_memory_addresses::{PageRange, VirtualAddress, VirtualPage};

/// A contiguous, permission-tagged range `[start, end)` of one address space.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Region {
    pub(crate) range: PageRange,
    pub(crate) flags: RegionFlags,
    pub(crate) kind: RegionKind,
    pub(crate) name: &'static str,
}

impl Region {
    #[must_use]
    pub const fn new(
        range: PageRange,
        flags: RegionFlags,
        kind: RegionKind,
        name: &'static str,
    ) -> Self {
        Self {
            range,
            flags,
            kind,
            name,
        }
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.range.start().base()
    }

    /// Exclusive end.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.range.end().base()
    }

    #[inline]
    #[must_use]
    pub const fn range(&self) -> PageRange {
        self.range
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.end().as_u64() - self.start().as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> RegionFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> RegionKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: VirtualAddress) -> bool {
        addr.as_u64() >= self.start().as_u64() && addr.as_u64() < self.end().as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn overlaps(&self, range: PageRange) -> bool {
        range.start().number() < self.range.end().number()
            && self.range.start().number() < range.end().number()
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Region({}..{} {:?} {} \"{}\")",
            self.start(),
            self.end(),
            self.flags,
            self.kind,
            self.name
        )
    }
}

/// Regions of one address space, ascending by start, never overlapping.
#[derive(Debug, Default, Clone)]
pub struct RegionList {
    regions: Vec<Region>,
}

impl RegionList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Region> {
        self.regions.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Region> {
        self.regions.get_mut(index)
    }

    /// Insert keeping sort order.
    ///
    /// # Errors
    /// [`VmmError::Overlap`] if `region` intersects an existing one.
    pub fn insert(&mut self, region: Region) -> Result<usize, VmmError> {
        if region.range.is_empty() {
            return Err(VmmError::InvalidParam);
        }
        let at = self
            .regions
            .partition_point(|r| r.range.start() < region.range.start());
        let clashes_prev = at > 0 && self.regions[at - 1].overlaps(region.range);
        let clashes_next = self
            .regions
            .get(at)
            .is_some_and(|r| r.overlaps(region.range));
        if clashes_prev || clashes_next {
            return Err(VmmError::Overlap);
        }
        self.regions.insert(at, region);
        Ok(at)
    }

    /// Index of the region containing `addr`.
    #[must_use]
    pub fn position(&self, addr: VirtualAddress) -> Option<usize> {
        let at = self.regions.partition_point(|r| r.end() <= addr);
        self.regions
            .get(at)
            .filter(|r| r.contains(addr))
            .map(|_| at)
    }

    #[must_use]
    pub fn find(&self, addr: VirtualAddress) -> Option<&Region> {
        self.position(addr).map(|i| &self.regions[i])
    }

    /// Whether any region intersects `range`.
    #[must_use]
    pub fn intersects(&self, range: PageRange) -> bool {
        self.regions.iter().any(|r| r.overlaps(range))
    }

    /// Indices of regions intersecting `range`, ascending.
    #[must_use]
    pub fn overlapping(&self, range: PageRange) -> core::ops::Range<usize> {
        let first = self
            .regions
            .partition_point(|r| r.range.end() <= range.start());
        let last = self
            .regions
            .partition_point(|r| r.range.start() < range.end());
        first..last.max(first)
    }

    pub fn remove(&mut self, index: usize) -> Region {
        self.regions.remove(index)
    }

    /// Split the region containing `at` so that a region starts at `at`.
    ///
    /// Returns `false` if a region already starts there.
    ///
    /// # Errors
    /// [`VmmError::NotFound`] if no region contains `at`.
    pub fn split_at(&mut self, at: VirtualPage) -> Result<bool, VmmError> {
        let index = self
            .position(at.base())
            .ok_or(VmmError::NotFound(at.base()))?;
        let region = self.regions[index];
        if region.range.start() == at {
            return Ok(false);
        }
        self.regions[index].range = PageRange::new(region.range.start(), at);
        let upper = Region {
            range: PageRange::new(at, region.range.end()),
            ..region
        };
        self.regions.insert(index + 1, upper);
        Ok(true)
    }

    /// Coalesce touching neighbours that agree on flags, kind and name.
    ///
    /// Returns the number of merges performed.
    pub fn merge_adjacent(&mut self) -> usize {
        let before = self.regions.len();
        self.regions.dedup_by(|next, prev| {
            let mergeable = prev.range.end() == next.range.start()
                && prev.flags == next.flags
                && prev.kind == next.kind
                && prev.name == next.name;
            if mergeable {
                prev.range = PageRange::new(prev.range.start(), next.range.end());
            }
            mergeable
        });
        before - self.regions.len()
    }

    /// Sorted by start and pairwise disjoint.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.regions
            .windows(2)
            .all(|w| w[0].range.end() <= w[1].range.start())
            && self.regions.iter().all(|r| !r.range.is_empty())
    }

    pub(crate) fn clear(&mut self) {
        self.regions.clear();
    }
}
