use core::fmt;
use kernel_vmem::PageFlags;

bitflags::bitflags! {
    /// Region permissions and behavior.
    ///
    /// The low three bits use the `PROT_*` encoding, so `mprotect`
    /// arguments can be taken over directly.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct RegionFlags: u32 {
        const READ   = 0x01;
        const WRITE  = 0x02;
        const EXEC   = 0x04;
        const USER   = 0x08;
        /// Frames stay shared across fork instead of becoming copy-on-write.
        const SHARED = 0x10;
        /// Some pages may share frames with another address space.
        const COW    = 0x20;
        /// Pages are allocated on first touch rather than at creation.
        const LAZY   = 0x40;
        /// Pinned; never a candidate for reclaim.
        const LOCKED = 0x80;
    }
}

impl RegionFlags {
    /// The access bits.
    pub const PROT: Self = Self::READ.union(Self::WRITE).union(Self::EXEC);

    /// Leaf permissions for a private, freshly allocated page of this region.
    #[must_use]
    pub const fn page_flags(self) -> PageFlags {
        let mut flags = PageFlags::empty();
        if self.contains(Self::WRITE) {
            flags = flags.union(PageFlags::WRITABLE);
        }
        if self.contains(Self::USER) {
            flags = flags.union(PageFlags::USER);
        }
        if !self.contains(Self::EXEC) {
            flags = flags.union(PageFlags::NO_EXECUTE);
        }
        flags
    }

    /// Leaf permissions for a page whose frame is still shared copy-on-write.
    #[must_use]
    pub const fn cow_page_flags(self) -> PageFlags {
        self.page_flags()
            .difference(PageFlags::WRITABLE)
            .union(PageFlags::COPY_ON_WRITE)
    }
}

/// What a region is used for.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RegionKind {
    Code,
    Data,
    Heap,
    Stack,
    Mmap,
    Shared,
    Kernel,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Code => "code",
            Self::Data => "data",
            Self::Heap => "heap",
            Self::Stack => "stack",
            Self::Mmap => "mmap",
            Self::Shared => "shared",
            Self::Kernel => "kernel",
        })
    }
}
