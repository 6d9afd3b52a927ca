//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw addresses and 4 KiB page bases, used by the
//! page-table walker, the frame pool and the region manager.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | A byte address in a (user) virtual address space. |
//! | [`PhysicalAddress`] | A byte address in physical memory. |
//! | [`VirtualPage`] | A 4 KiB-aligned virtual page base. |
//! | [`PhysicalPage`] | A 4 KiB-aligned physical frame base. |
//! | [`PageRange`] | A half-open run of virtual pages `[start, end)`. |
//!
//! Only 4 KiB pages are modelled. User address spaces are built exclusively
//! from 4 KiB leaves so that every page can be shared, copied and released on
//! its own.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x40_1234);
//! let page = va.page();
//! assert_eq!(page.base().as_u64(), 0x40_1000);
//! assert_eq!(va.page_offset(), 0x234);
//! assert_eq!(page.join(va.page_offset()), va);
//! ```
//!
//! ## Design Notes
//!
//! - All types are `#[repr(transparent)]` over `u64` and implement `Copy`,
//!   `Eq`, `Ord` and `Hash`, so they work as sorted keys.
//! - Page types can only be built aligned: [`VirtualPage::containing`] rounds
//!   down, [`VirtualPage::from_base`] rejects unaligned input.

#![cfg_attr(not(any(test, doctest)), no_std)]

use core::fmt;
use core::ops::{Add, AddAssign};

/// Size of a page / frame in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// Mask selecting the in-page offset bits.
const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// Round `x` down to a page boundary.
#[inline]
#[must_use]
pub const fn page_align_down(x: u64) -> u64 {
    x & !PAGE_MASK
}

/// Round `x` up to a page boundary, or `None` if that overflows.
#[inline]
#[must_use]
pub const fn page_align_up(x: u64) -> Option<u64> {
    match x.checked_add(PAGE_MASK) {
        Some(v) => Some(v & !PAGE_MASK),
        None => None,
    }
}

/// Number of pages needed to cover `bytes` bytes.
#[inline]
#[must_use]
pub const fn pages_for(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE)
}

/// Virtual memory address.
///
/// Carries the *kind* of address at the type level; canonicality and the
/// user/kernel split are checked by the code that consumes it.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The page containing this address.
    #[inline]
    #[must_use]
    pub const fn page(self) -> VirtualPage {
        VirtualPage::containing(self)
    }

    /// Offset of this address inside its page (`0..PAGE_SIZE`).
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u64 {
        self.0 & PAGE_MASK
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn checked_sub(self, rhs: u64) -> Option<Self> {
        match self.0.checked_sub(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Distance in bytes from `earlier` to `self`; zero if `earlier` lies above.
    #[inline]
    #[must_use]
    pub const fn saturating_distance_from(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

/// Physical memory address.
///
/// Like [`VirtualAddress`], this only carries intent and prevents VA/PA
/// mix-ups; it does not validate against installed RAM.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The frame containing this address.
    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage {
        PhysicalPage::containing(self)
    }

    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u64 {
        self.0 & PAGE_MASK
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// A 4 KiB-aligned virtual page.
///
/// ### Invariants
/// - The stored base always has its low 12 bits cleared.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(u64);

impl VirtualPage {
    /// The page containing `va` (rounds down).
    #[inline]
    #[must_use]
    pub const fn containing(va: VirtualAddress) -> Self {
        Self(page_align_down(va.as_u64()))
    }

    /// Build from an exact page base; `None` if `va` is not page-aligned.
    #[inline]
    #[must_use]
    pub const fn from_base(va: VirtualAddress) -> Option<Self> {
        if va.is_page_aligned() {
            Some(Self(va.as_u64()))
        } else {
            None
        }
    }

    /// Build from a virtual page number (`va >> 12`).
    #[inline]
    #[must_use]
    pub const fn from_number(vpn: u64) -> Self {
        Self(vpn << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress(self.0)
    }

    /// Virtual page number.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    /// The page `n` pages above this one, or `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_step(self, n: u64) -> Option<Self> {
        match n.checked_mul(PAGE_SIZE) {
            Some(delta) => match self.0.checked_add(delta) {
                Some(v) => Some(Self(v)),
                None => None,
            },
            None => None,
        }
    }

    /// Reattach an in-page offset.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> VirtualAddress {
        debug_assert!(offset < PAGE_SIZE);
        VirtualAddress(self.0 | (offset & PAGE_MASK))
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

/// A 4 KiB-aligned physical frame.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(u64);

impl PhysicalPage {
    /// The frame containing `pa` (rounds down).
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(page_align_down(pa.as_u64()))
    }

    /// Build from an exact frame base; `None` if `pa` is not page-aligned.
    #[inline]
    #[must_use]
    pub const fn from_base(pa: PhysicalAddress) -> Option<Self> {
        if pa.page_offset() == 0 {
            Some(Self(pa.as_u64()))
        } else {
            None
        }
    }

    /// Build from a physical frame number (`pa >> 12`).
    #[inline]
    #[must_use]
    pub const fn from_number(pfn: u64) -> Self {
        Self(pfn << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0)
    }

    /// Physical frame number.
    #[inline]
    #[must_use]
    pub const fn number(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> PhysicalAddress {
        debug_assert!(offset < PAGE_SIZE);
        PhysicalAddress(self.0 | (offset & PAGE_MASK))
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

/// Half-open range of virtual pages `[start, end)`.
///
/// Iterating yields every page in ascending order.
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// let r = PageRange::covering(VirtualAddress::new(0x1800), 0x1000).unwrap();
/// assert_eq!(r.len(), 2);
/// let pages: Vec<_> = r.into_iter().map(|p| p.base().as_u64()).collect();
/// assert_eq!(pages, [0x1000, 0x2000]);
/// ```
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct PageRange {
    start: VirtualPage,
    end: VirtualPage,
}

impl PageRange {
    /// Range between two page bases. `end` below `start` yields an empty range.
    #[inline]
    #[must_use]
    pub const fn new(start: VirtualPage, end: VirtualPage) -> Self {
        if end.0 < start.0 {
            Self { start, end: start }
        } else {
            Self { start, end }
        }
    }

    /// Smallest page range covering `[addr, addr + len)`.
    ///
    /// Returns `None` when the end overflows the address space.
    #[must_use]
    pub const fn covering(addr: VirtualAddress, len: u64) -> Option<Self> {
        let Some(end) = addr.as_u64().checked_add(len) else {
            return None;
        };
        let Some(end) = page_align_up(end) else {
            return None;
        };
        Some(Self::new(
            VirtualPage::containing(addr),
            VirtualPage(end),
        ))
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualPage {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualPage {
        self.end
    }

    /// Number of pages.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        (self.end.0 - self.start.0) >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end.0 == self.start.0
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, page: VirtualPage) -> bool {
        page.0 >= self.start.0 && page.0 < self.end.0
    }
}

impl IntoIterator for PageRange {
    type Item = VirtualPage;
    type IntoIter = PageRangeIter;

    fn into_iter(self) -> Self::IntoIter {
        PageRangeIter {
            next: self.start.0,
            end: self.end.0,
        }
    }
}

/// Iterator over the pages of a [`PageRange`].
pub struct PageRangeIter {
    next: u64,
    end: u64,
}

impl Iterator for PageRangeIter {
    type Item = VirtualPage;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let page = VirtualPage(self.next);
        self.next += PAGE_SIZE;
        Some(page)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from((self.end.saturating_sub(self.next)) >> PAGE_SHIFT).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

impl core::iter::FusedIterator for PageRangeIter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_and_offset_split() {
        let va = VirtualAddress::new(0x1234_5678_9ABC);
        let page = va.page();
        assert_eq!(page.base().as_u64() & 0xFFF, 0);
        assert_eq!(va.page_offset(), 0xABC);
        assert_eq!(page.join(va.page_offset()), va);

        let pa = PhysicalAddress::new(0x0000_0010_2000_0042);
        assert_eq!(pa.page().base().as_u64(), 0x0000_0010_2000_0000);
        assert_eq!(pa.page().join(pa.page_offset()), pa);
    }

    #[test]
    fn from_base_rejects_unaligned() {
        assert!(VirtualPage::from_base(VirtualAddress::new(0x1001)).is_none());
        assert!(VirtualPage::from_base(VirtualAddress::new(0x2000)).is_some());
        assert!(PhysicalPage::from_base(PhysicalAddress::new(0x10)).is_none());
    }

    #[test]
    fn page_numbers_round_trip() {
        let p = PhysicalPage::from_number(0x345);
        assert_eq!(p.base().as_u64(), 0x345_000);
        assert_eq!(p.number(), 0x345);
        let v = VirtualPage::from_number(0x400);
        assert_eq!(v.base().as_u64(), 0x40_0000);
    }

    #[test]
    fn alignment_helpers() {
        assert_eq!(page_align_down(0x12345), 0x12000);
        assert_eq!(page_align_up(0x12345), Some(0x13000));
        assert_eq!(page_align_up(0x12000), Some(0x12000));
        assert_eq!(page_align_up(u64::MAX), None);
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(4097), 2);
    }

    #[test]
    fn page_range_bounds() {
        let r = PageRange::covering(VirtualAddress::new(0x40_0000), 0x3000).unwrap();
        assert_eq!(r.len(), 3);
        assert!(r.contains(VirtualPage::from_number(0x402)));
        assert!(!r.contains(VirtualPage::from_number(0x403)));

        let empty = PageRange::new(VirtualPage::from_number(5), VirtualPage::from_number(3));
        assert!(empty.is_empty());
        assert_eq!(empty.into_iter().count(), 0);

        assert!(PageRange::covering(VirtualAddress::new(u64::MAX - 10), 100).is_none());
    }

    #[test]
    fn checked_step_overflows_cleanly() {
        let top = VirtualPage::containing(VirtualAddress::new(u64::MAX));
        assert!(top.checked_step(1).is_none());
        assert_eq!(
            VirtualPage::from_number(1).checked_step(2),
            Some(VirtualPage::from_number(3))
        );
    }
}
