//! # Program Image Construction
//!
//! Turns loadable segments into populated regions and lays out the initial
//! user stack:
//!
//! ```text
//! stack_top ──► ┌──────────────────────┐
//!               │ envp strings (NUL)   │
//!               │ argv strings (NUL)   │
//!               │ padding to 16 bytes  │
//!               │ NULL                 │
//!               │ envp[n-1] .. envp[0] │
//!               │ NULL                 │
//!               │ argv[n-1] .. argv[0] │
//!        sp ──► │ argc                 │
//!               └──────────────────────┘
//! ```

use crate::{AddressSpace, Region, RegionFlags, RegionKind, VmmError};
use alloc::vec::Vec;
use kernel_info::memory::{MAX_ARG_COUNT, MAX_ARG_STRLEN, MAX_ARGS_SIZE, MAX_ENV_SIZE, USER_STACK_SIZE};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{PhysMemory, TlbFlush};
use log::debug;

/// One loadable piece of a program image.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LoadSegment<'a> {
    pub vaddr: VirtualAddress,
    /// Bytes copied from the file; the rest up to `mem_size` is zero.
    pub data: &'a [u8],
    pub mem_size: u64,
    /// Access bits (`READ`, `WRITE`, `EXEC`).
    pub flags: RegionFlags,
}

/// Where the initial stack ended up.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StackLayout {
    /// Initial stack pointer, pointing at `argc`.
    pub sp: VirtualAddress,
    pub argc: usize,
    pub argv: VirtualAddress,
    pub envp: VirtualAddress,
}

impl AddressSpace {
    /// Create a populated region for `segment` and copy its file bytes in.
    ///
    /// # Errors
    /// - [`VmmError::InvalidParam`] if the file bytes exceed the memory size.
    /// - Any error of [`create_region`](Self::create_region).
    pub fn load_segment<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        segment: &LoadSegment<'_>,
    ) -> Result<Region, VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        if segment.data.len() as u64 > segment.mem_size {
            return Err(VmmError::InvalidParam);
        }
        let (kind, name) = if segment.flags.contains(RegionFlags::EXEC) {
            (RegionKind::Code, "[text]")
        } else {
            (RegionKind::Data, "[data]")
        };
        let flags = (segment.flags & RegionFlags::PROT) | RegionFlags::USER;
        let region = self.create_region(mem, tlb, segment.vaddr, segment.mem_size, flags, kind, name)?;
        self.kernel_write(mem, tlb, segment.vaddr, segment.data)?;
        debug!(
            "pid {}: loaded {} bytes ({:#x} in memory) at {}",
            self.owner,
            segment.data.len(),
            segment.mem_size,
            segment.vaddr
        );
        Ok(region)
    }

    /// Create the stack region below `stack_top` and copy `argv` / `envp` onto it.
    ///
    /// # Errors
    /// - [`VmmError::TooLong`] if a string or either vector exceeds its limit.
    /// - [`VmmError::InvalidParam`] if there are too many entries.
    /// - Any error of [`create_region`](Self::create_region).
    pub fn setup_stack<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        argv: &[&[u8]],
        envp: &[&[u8]],
    ) -> Result<StackLayout, VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        check_arguments(argv, envp)?;

        let top = self.stack_top;
        let bottom = top
            .checked_sub(USER_STACK_SIZE)
            .ok_or(VmmError::InvalidParam)?;
        let flags = RegionFlags::READ | RegionFlags::WRITE | RegionFlags::USER | RegionFlags::LAZY;
        self.create_region(mem, tlb, bottom, USER_STACK_SIZE, flags, RegionKind::Stack, "[stack]")?;

        let mut sp = top;
        let mut push_str = |space: &mut Self, s: &[u8]| -> Result<VirtualAddress, VmmError> {
            sp = sp
                .checked_sub(s.len() as u64 + 1)
                .ok_or(VmmError::InvalidParam)?;
            space.kernel_write(mem, tlb, sp, s)?;
            space.kernel_write(mem, tlb, sp + s.len() as u64, &[0])?;
            Ok(sp)
        };
        let env_ptrs = envp
            .iter()
            .map(|s| push_str(self, s))
            .collect::<Result<Vec<_>, _>>()?;
        let arg_ptrs = argv
            .iter()
            .map(|s| push_str(self, s))
            .collect::<Result<Vec<_>, _>>()?;

        let words = 1 + arg_ptrs.len() + 1 + env_ptrs.len() + 1;
        let table_bytes = (words * 8) as u64;
        let sp = sp
            .checked_sub(table_bytes)
            .map(|a| VirtualAddress::new(a.as_u64() & !0xF))
            .ok_or(VmmError::InvalidParam)?;

        let mut table = Vec::with_capacity(words * 8);
        table.extend_from_slice(&(arg_ptrs.len() as u64).to_le_bytes());
        for p in arg_ptrs.iter().chain(core::iter::once(&VirtualAddress::zero())) {
            table.extend_from_slice(&p.as_u64().to_le_bytes());
        }
        for p in env_ptrs.iter().chain(core::iter::once(&VirtualAddress::zero())) {
            table.extend_from_slice(&p.as_u64().to_le_bytes());
        }
        self.kernel_write(mem, tlb, sp, &table)?;

        let layout = StackLayout {
            sp,
            argc: arg_ptrs.len(),
            argv: sp + 8,
            envp: sp + 8 * (arg_ptrs.len() as u64 + 2),
        };
        debug!("pid {}: stack ready, sp={} argc={}", self.owner, layout.sp, layout.argc);
        Ok(layout)
    }
}

/// Check `argv` / `envp` against the per-string, per-vector and count limits.
///
/// # Errors
/// - [`VmmError::TooLong`] if a string or either vector exceeds its limit.
/// - [`VmmError::InvalidParam`] if there are too many entries.
pub fn check_arguments(argv: &[&[u8]], envp: &[&[u8]]) -> Result<(), VmmError> {
    check_vector(argv, MAX_ARGS_SIZE)?;
    check_vector(envp, MAX_ENV_SIZE)
}

fn check_vector(strings: &[&[u8]], max_total: usize) -> Result<(), VmmError> {
    if strings.len() > MAX_ARG_COUNT {
        return Err(VmmError::InvalidParam);
    }
    let mut total = 0usize;
    for s in strings {
        if s.len() + 1 > MAX_ARG_STRLEN {
            return Err(VmmError::TooLong(MAX_ARG_STRLEN));
        }
        total += s.len() + 1;
    }
    if total > max_total {
        return Err(VmmError::TooLong(max_total));
    }
    Ok(())
}
