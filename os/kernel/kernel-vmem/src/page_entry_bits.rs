use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

/// A single 64-bit x86-64 page table entry in its raw bitfield form.
///
/// The same layout serves every level of the walk: upper levels only use
/// `present`, `writable`, `user_access` and the frame address to link to the
/// next table, while level-1 entries are the 4 KiB leaves that carry the
/// permission bits of a user mapping.
///
/// ### Bit layout
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (leaf only) |
/// | 7         | `PS`              | Large page flag (always 0 here) |
/// | 8         | `G`               | Global (leaf only) |
/// | 9         | COW               | Copy-on-write marker (OS-available bit) |
/// | 10–11     | OS avail low      | Reserved for OS use |
/// | 12–51     | `addr`            | Physical frame bits [51:12] |
/// | 52–58     | OS avail high     | Reserved for OS use |
/// | 59–62     | `PKU` / OS use    | Protection key or OS use |
/// | 63        | `NX`              | Execute disable |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
/// # use kernel_vmem::{PageEntryBits, PageFlags};
/// let frame = PhysicalPage::from_number(0x345);
/// let e = PageEntryBits::leaf(frame, PageFlags::USER | PageFlags::COPY_ON_WRITE);
/// assert!(e.present());
/// assert!(!e.writable());
/// assert!(e.copy_on_write());
/// assert_eq!(e.frame(), frame);
/// ```
#[bitfield(u64)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Clear on every copy-on-write leaf; the fault resolver sets it again
    /// once the page is private.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU; not a permission bit.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write through a leaf.
    pub dirty: bool,

    /// Large Page (PS, bit 7). User address spaces only use 4 KiB leaves,
    /// so this stays clear.
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// Copy-on-write marker (bit 9, first OS-available bit).
    ///
    /// Set on read-only leaves whose frame is shared after a fork. Hardware
    /// ignores it; the page-fault handler consults it on write faults.
    pub copy_on_write: bool,

    /// OS-available (bits 10..=11).
    #[bits(2)]
    pub os_available_low: u8,

    /// Physical address bits [51:12] (bits 12..=51).
    #[bits(40)]
    phys_addr_bits_51_12: u64,

    /// OS-available (bits 52..=58).
    #[bits(7)]
    pub os_available_high: u8,

    /// Protection Key (PKU, bits 59..=62) if supported; otherwise OS use.
    #[bits(4)]
    pub protection_key: u8,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

bitflags::bitflags! {
    /// Leaf permissions requested by callers of the mapper.
    ///
    /// `PRESENT` is implied by every mapping call and therefore not part of
    /// this set.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct PageFlags: u8 {
        /// Writes allowed.
        const WRITABLE      = 1 << 0;
        /// Accessible from CPL 3.
        const USER          = 1 << 1;
        /// Instruction fetches disallowed.
        const NO_EXECUTE    = 1 << 2;
        /// Shared frame; writes must be resolved by copying.
        const COPY_ON_WRITE = 1 << 3;
        /// Survives CR3 reloads in the TLB.
        const GLOBAL        = 1 << 4;
    }
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        // store bits [51:12]
        self.set_phys_addr_bits_51_12(phys.as_u64() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_51_12() << 12)
    }

    /// The 4 KiB frame this entry points at.
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> PhysicalPage {
        PhysicalPage::from_number(self.phys_addr_bits_51_12())
    }

    /// Non-leaf link to a next-level table.
    ///
    /// Links are always present, writable and user-accessible; the effective
    /// permission is the intersection over the walk, so the leaf decides.
    #[inline]
    #[must_use]
    pub const fn table_link(table: PhysicalPage) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
            .with_phys_addr_bits_51_12(table.number())
    }

    /// Present 4 KiB leaf for `frame` with `flags`.
    #[inline]
    #[must_use]
    pub const fn leaf(frame: PhysicalPage, flags: PageFlags) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(flags.contains(PageFlags::WRITABLE))
            .with_user_access(flags.contains(PageFlags::USER))
            .with_no_execute(flags.contains(PageFlags::NO_EXECUTE))
            .with_copy_on_write(flags.contains(PageFlags::COPY_ON_WRITE))
            .with_global_translation(flags.contains(PageFlags::GLOBAL))
            .with_phys_addr_bits_51_12(frame.number())
    }

    /// Recover the permission set of a leaf.
    #[must_use]
    pub fn page_flags(&self) -> PageFlags {
        let mut flags = PageFlags::empty();
        flags.set(PageFlags::WRITABLE, self.writable());
        flags.set(PageFlags::USER, self.user_access());
        flags.set(PageFlags::NO_EXECUTE, self.no_execute());
        flags.set(PageFlags::COPY_ON_WRITE, self.copy_on_write());
        flags.set(PageFlags::GLOBAL, self.global_translation());
        flags
    }
}
