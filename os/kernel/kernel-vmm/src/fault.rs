//! # Page-Fault / Copy-on-Write Resolver
//!
//! Classifies a user page fault against the faulting address space and
//! either repairs the mapping or reports a [`FatalFault`].
//!
//! ```text
//!             ┌── no region ─────────────────────────► Segmentation
//!             ├── access not allowed by region ──────► Permission
//! classify ───┼── present, COW, write ───────────────► COW path
//!             ├── not present, lazy region ──────────► Lazy path
//!             ├── present, access already allowed ───► Spurious (flush)
//!             └── anything else ─────────────────────► Unresolvable
//! ```
//!
//! The COW path unprotects in place when the frame is no longer shared
//! (minor fault) and otherwise copies it into a private frame (major fault).
//! Either way, afterwards the faulting space owns a frame nobody else maps.

use crate::{AddressSpace, FatalFault, Region, RegionFlags, VmStats};
use bitfield_struct::bitfield;
use kernel_memory_addresses::{VirtualAddress, VirtualPage};
use kernel_vmem::{Mapping, PhysMemory, TlbFlush};
use log::{debug, error, trace};

/// Page-fault error code layout (x86-64), as pushed by the CPU.
///
/// Reference: Intel SDM Vol. 3A, §6.15.1 "Page-Fault Exception (#PF)".
#[bitfield(u64)]
pub struct PageFaultError {
    /// 0 = non-present page, 1 = protection violation.
    pub present: bool,

    /// 0 = read or execute, 1 = write.
    pub write: bool,

    /// 0 = supervisor, 1 = user mode.
    pub user: bool,

    /// Reserved bit set in a paging structure.
    pub reserved_bit: bool,

    /// Instruction fetch.
    pub instruction_fetch: bool,

    /// Protection-key violation.
    pub protection_key: bool,

    /// Shadow-stack access.
    pub shadow_stack: bool,

    #[bits(57)]
    __: u64,
}

impl PageFaultError {
    /// A user-mode write fault, as raised when the kernel writes on behalf
    /// of a process.
    #[must_use]
    pub const fn user_write(present: bool) -> Self {
        Self::new().with_user(true).with_write(true).with_present(present)
    }

    /// A user-mode read fault.
    #[must_use]
    pub const fn user_read(present: bool) -> Self {
        Self::new().with_user(true).with_present(present)
    }

    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "non-present page"
        } else if self.instruction_fetch() {
            "instruction fetch on protected page"
        } else if self.write() {
            "write access to protected page"
        } else {
            "read access to protected page"
        }
    }
}

/// How a fault was repaired.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultResolution {
    /// A fresh zeroed frame was mapped into a lazy region (minor).
    Lazy,
    /// The shared frame turned out to be private; write access restored (minor).
    CowUnprotect,
    /// The shared frame was copied into a private one (major).
    CowCopy,
    /// The mapping already allowed the access; only the TLB entry was stale.
    Spurious,
}

impl FaultResolution {
    #[must_use]
    pub const fn is_major(self) -> bool {
        matches!(self, Self::CowCopy)
    }
}

impl AddressSpace {
    /// Resolve a page fault at `addr` with CPU error code `code`.
    ///
    /// # Errors
    /// [`FatalFault`] when the fault cannot be repaired; the caller must
    /// terminate the process with [`FatalFault::signal`].
    pub fn resolve_fault<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        stats: &mut VmStats,
        addr: VirtualAddress,
        code: PageFaultError,
    ) -> Result<FaultResolution, FatalFault>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        stats.page_faults += 1;
        let result = self.classify_and_resolve(mem, tlb, addr, code);
        match result {
            Ok(FaultResolution::Lazy) => {
                stats.minor_faults += 1;
                stats.lazy_faults += 1;
            }
            Ok(FaultResolution::CowUnprotect) => {
                stats.minor_faults += 1;
                stats.cow_faults += 1;
            }
            Ok(FaultResolution::CowCopy) => {
                stats.major_faults += 1;
                stats.cow_faults += 1;
            }
            Ok(FaultResolution::Spurious) => stats.spurious_faults += 1,
            Err(fatal) => {
                stats.fatal_faults += 1;
                error!("pid {}: {fatal} ({})", self.owner, code.explain());
                self.root.dump_walk(mem, addr);
            }
        }
        result
    }

    fn classify_and_resolve<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        addr: VirtualAddress,
        code: PageFaultError,
    ) -> Result<FaultResolution, FatalFault>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let region = *self
            .regions
            .find(addr)
            .ok_or(FatalFault::Segmentation(addr))?;
        if !access_allowed(&region, code) {
            return Err(FatalFault::Permission(addr));
        }

        let page = addr.page();
        match self.root.lookup(mem, page) {
            Some(m) if code.write() && !m.is_writable() && is_cow(&region, m) => {
                self.resolve_cow(mem, tlb, &region, page, m, addr)
            }
            None if region.flags().contains(RegionFlags::LAZY) => {
                let flags = region.flags().page_flags();
                self.map_fresh(mem, tlb, page, flags)
                    .map_err(|_| FatalFault::OutOfMemory(addr))?;
                trace!("pid {}: lazy page {page}", self.owner);
                Ok(FaultResolution::Lazy)
            }
            Some(m) if !code.write() || m.is_writable() => {
                tlb.flush_page(page);
                Ok(FaultResolution::Spurious)
            }
            _ => Err(FatalFault::Unresolvable(addr)),
        }
    }

    fn resolve_cow<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        region: &Region,
        page: VirtualPage,
        current: Mapping,
        addr: VirtualAddress,
    ) -> Result<FaultResolution, FatalFault>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        let private = region.flags().page_flags();

        if mem.ref_count(current.frame) == 1 {
            self.root
                .set_flags(mem, tlb, page, private)
                .map_err(|_| FatalFault::Unresolvable(addr))?;
            debug!("pid {}: COW {page} unprotected in place", self.owner);
            return Ok(FaultResolution::CowUnprotect);
        }

        let copy = mem.alloc_4k().ok_or(FatalFault::OutOfMemory(addr))?;
        mem.set_owner_hint(copy, self.owner);
        if !mem.copy_frame(current.frame, copy) {
            let _ = mem.release(copy);
            return Err(FatalFault::Unresolvable(addr));
        }
        let old = match self.root.remap(mem, tlb, page, copy, private) {
            Ok(old) => old,
            Err(_) => {
                let _ = mem.release(copy);
                return Err(FatalFault::Unresolvable(addr));
            }
        };
        if let Err(e) = mem.release(old) {
            error!("pid {}: COW release of {old}: {e}", self.owner);
        }
        debug!("pid {}: COW {page} copied {old} -> {copy}", self.owner);
        Ok(FaultResolution::CowCopy)
    }
}

fn access_allowed(region: &Region, code: PageFaultError) -> bool {
    let flags = region.flags();
    if code.user() && !flags.contains(RegionFlags::USER) {
        return false;
    }
    if code.write() {
        flags.contains(RegionFlags::WRITE)
    } else if code.instruction_fetch() {
        flags.contains(RegionFlags::EXEC)
    } else {
        flags.intersects(RegionFlags::READ | RegionFlags::WRITE)
    }
}

fn is_cow(region: &Region, mapping: Mapping) -> bool {
    mapping.is_copy_on_write() || region.flags().contains(RegionFlags::COW)
}
