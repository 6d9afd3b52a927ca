//! Translation-cache maintenance.

use alloc::vec::Vec;
use kernel_memory_addresses::VirtualPage;

/// Invalidate cached translations for single pages.
///
/// The mapper calls this once per successful map, unmap or flag change and
/// never requests a full flush.
pub trait TlbFlush {
    fn flush_page(&mut self, page: VirtualPage);
}

/// Records invalidations instead of performing them.
///
/// Used where the address space being edited is not the active one, and in
/// tests to observe the mapper's invalidation behavior.
#[derive(Debug, Default, Clone)]
pub struct FlushLog {
    pages: Vec<VirtualPage>,
}

impl FlushLog {
    #[must_use]
    pub const fn new() -> Self {
        Self { pages: Vec::new() }
    }

    /// Pages flushed so far, in order.
    #[must_use]
    pub fn pages(&self) -> &[VirtualPage] {
        &self.pages
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }
}

impl TlbFlush for FlushLog {
    fn flush_page(&mut self, page: VirtualPage) {
        self.pages.push(page);
    }
}

/// Invalidates with `invlpg` on the current CPU.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct Invlpg;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
impl TlbFlush for Invlpg {
    #[inline]
    fn flush_page(&mut self, page: VirtualPage) {
        // SAFETY: invlpg only drops a cached translation; it cannot fault.
        unsafe {
            core::arch::asm!(
                "invlpg [{}]",
                in(reg) page.base().as_u64(),
                options(nostack, preserves_flags)
            );
        }
    }
}
