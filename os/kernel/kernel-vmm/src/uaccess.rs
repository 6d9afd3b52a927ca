//! Kernel access to user memory through a process's page tables.
//!
//! Reads never allocate: an untouched page of a lazy region reads as zeros.
//! Writes behave like user-mode stores, so a copy-on-write or lazy page is
//! repaired by the fault resolver before the bytes land.

use crate::{AddressSpace, PageFaultError, RegionFlags, VmStats, VmmError};
use alloc::vec::Vec;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_vmem::{PhysMemory, PhysMapper, TlbFlush};

/// Split `[addr, addr + len)` into per-page pieces of `(address, offset into buffer, length)`.
fn page_chunks(
    addr: VirtualAddress,
    len: usize,
) -> Result<impl Iterator<Item = (VirtualAddress, usize, usize)>, VmmError> {
    addr.checked_add(len as u64).ok_or(VmmError::BadAddress(addr))?;
    let mut done = 0usize;
    Ok(core::iter::from_fn(move || {
        if done >= len {
            return None;
        }
        let at = addr + done as u64;
        #[allow(clippy::cast_possible_truncation)]
        let room = (PAGE_SIZE - at.page_offset()) as usize;
        let n = room.min(len - done);
        let chunk = (at, done, n);
        done += n;
        Some(chunk)
    }))
}

impl AddressSpace {
    /// Copy `buf.len()` bytes starting at user address `src` into `buf`.
    ///
    /// # Errors
    /// [`VmmError::BadAddress`] if any byte lies outside a readable user region.
    pub fn copy_from_user<M: PhysMapper + ?Sized>(
        &self,
        mem: &M,
        src: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<(), VmmError> {
        for (at, offset, n) in page_chunks(src, buf.len())? {
            let region = self.regions.find(at).ok_or(VmmError::BadAddress(at))?;
            if !region.flags().contains(RegionFlags::USER)
                || !region.flags().intersects(RegionFlags::READ | RegionFlags::WRITE)
            {
                return Err(VmmError::BadAddress(at));
            }
            let target = &mut buf[offset..offset + n];
            match self.root.lookup(mem, at.page()) {
                Some(m) => {
                    let frame = mem.frame(m.frame).ok_or(VmmError::BadAddress(at))?;
                    let start = usize_offset(at);
                    target.copy_from_slice(&frame[start..start + n]);
                }
                None if region.flags().contains(RegionFlags::LAZY) => target.fill(0),
                None => return Err(VmmError::BadAddress(at)),
            }
        }
        Ok(())
    }

    /// Copy `data` to user address `dst`, resolving lazy and copy-on-write
    /// pages on the way.
    ///
    /// # Errors
    /// [`VmmError::BadAddress`] if any byte lies outside a writable user
    /// region or a fault cannot be resolved. Bytes before the failing page
    /// have already been written.
    pub fn copy_to_user<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        stats: &mut VmStats,
        dst: VirtualAddress,
        data: &[u8],
    ) -> Result<(), VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        for (at, offset, n) in page_chunks(dst, data.len())? {
            let page = at.page();
            let writable = self.root.lookup(mem, page).filter(|m| m.is_writable());
            let mapping = match writable {
                Some(m) => m,
                None => {
                    let present = self.root.lookup(mem, page).is_some();
                    self.resolve_fault(mem, tlb, stats, at, PageFaultError::user_write(present))
                        .map_err(|_| VmmError::BadAddress(at))?;
                    self.root.lookup(mem, page).ok_or(VmmError::BadAddress(at))?
                }
            };
            let frame = mem.frame_mut(mapping.frame).ok_or(VmmError::BadAddress(at))?;
            let start = usize_offset(at);
            frame[start..start + n].copy_from_slice(&data[offset..offset + n]);
        }
        Ok(())
    }

    /// Read a NUL-terminated string of at most `max` bytes (NUL included).
    ///
    /// # Errors
    /// - [`VmmError::BadAddress`] if the string runs into unreadable memory.
    /// - [`VmmError::TooLong`] if no NUL appears within `max` bytes.
    pub fn read_user_cstr<M: PhysMapper + ?Sized>(
        &self,
        mem: &M,
        src: VirtualAddress,
        max: usize,
    ) -> Result<Vec<u8>, VmmError> {
        let mut out = Vec::new();
        let mut at = src;
        while out.len() < max {
            #[allow(clippy::cast_possible_truncation)]
            let room = ((PAGE_SIZE - at.page_offset()) as usize).min(max - out.len());
            let mut chunk = [0u8; PAGE_SIZE as usize];
            self.copy_from_user(mem, at, &mut chunk[..room])?;
            if let Some(nul) = chunk[..room].iter().position(|b| *b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..room]);
            at = at.checked_add(room as u64).ok_or(VmmError::BadAddress(at))?;
        }
        Err(VmmError::TooLong(max))
    }

    /// Read one little-endian `u64` from user memory.
    ///
    /// # Errors
    /// [`VmmError::BadAddress`] if the word is not readable.
    pub fn read_user_u64<M: PhysMapper + ?Sized>(
        &self,
        mem: &M,
        src: VirtualAddress,
    ) -> Result<u64, VmmError> {
        let mut bytes = [0u8; 8];
        self.copy_from_user(mem, src, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Store bytes on behalf of the kernel, ignoring region write permission.
    ///
    /// Used while building an image: untouched lazy pages are populated,
    /// present pages are written in place.
    pub(crate) fn kernel_write<M, T>(
        &mut self,
        mem: &mut M,
        tlb: &mut T,
        dst: VirtualAddress,
        data: &[u8],
    ) -> Result<(), VmmError>
    where
        M: PhysMemory + ?Sized,
        T: TlbFlush + ?Sized,
    {
        for (at, offset, n) in page_chunks(dst, data.len())? {
            let page = at.page();
            let mapping = match self.root.lookup(mem, page) {
                Some(m) => m,
                None => {
                    let region = *self.regions.find(at).ok_or(VmmError::BadAddress(at))?;
                    self.map_fresh(mem, tlb, page, region.flags().page_flags())?;
                    self.root.lookup(mem, page).ok_or(VmmError::BadAddress(at))?
                }
            };
            let frame = mem.frame_mut(mapping.frame).ok_or(VmmError::BadAddress(at))?;
            let start = usize_offset(at);
            frame[start..start + n].copy_from_slice(&data[offset..offset + n]);
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn usize_offset(addr: VirtualAddress) -> usize {
    addr.page_offset() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegionKind;
    use kernel_alloc::FramePool;
    use kernel_vmem::FlushLog;

    const RW: RegionFlags = RegionFlags::READ
        .union(RegionFlags::WRITE)
        .union(RegionFlags::USER);

    fn setup(flags: RegionFlags) -> (FramePool, FlushLog, VmStats, AddressSpace) {
        let mut pool = FramePool::new(64);
        let mut tlb = FlushLog::new();
        let mut space = AddressSpace::create(&mut pool, 1).unwrap();
        space
            .create_region(&mut pool, &mut tlb, VirtualAddress::new(0x40_0000), 0x2000, flags, RegionKind::Data, "d")
            .unwrap();
        (pool, tlb, VmStats::default(), space)
    }

    #[test]
    fn copy_across_page_boundary() {
        let (mut pool, mut tlb, mut stats, mut space) = setup(RW);
        let at = VirtualAddress::new(0x40_0FFC);
        space
            .copy_to_user(&mut pool, &mut tlb, &mut stats, at, b"abcdefgh")
            .unwrap();
        let mut back = [0u8; 8];
        space.copy_from_user(&pool, at, &mut back).unwrap();
        assert_eq!(&back, b"abcdefgh");
    }

    #[test]
    fn write_into_lazy_page_faults_it_in() {
        let (mut pool, mut tlb, mut stats, mut space) = setup(RW | RegionFlags::LAZY);
        let at = VirtualAddress::new(0x40_1000);
        let mut zero = [1u8; 4];
        space.copy_from_user(&pool, at, &mut zero).unwrap();
        assert_eq!(zero, [0; 4]);
        assert_eq!(space.mapped_pages(&pool), 0);

        space.copy_to_user(&mut pool, &mut tlb, &mut stats, at, &[5]).unwrap();
        assert_eq!(space.mapped_pages(&pool), 1);
        assert_eq!(stats.lazy_faults, 1);
    }

    #[test]
    fn read_only_and_unmapped_are_bad_addresses() {
        let (mut pool, mut tlb, mut stats, mut space) = setup(RegionFlags::READ | RegionFlags::USER);
        let at = VirtualAddress::new(0x40_0000);
        assert_eq!(
            space.copy_to_user(&mut pool, &mut tlb, &mut stats, at, &[1]),
            Err(VmmError::BadAddress(at))
        );
        let hole = VirtualAddress::new(0x50_0000);
        assert_eq!(space.read_user_u64(&pool, hole), Err(VmmError::BadAddress(hole)));
        let tail = VirtualAddress::new(0x40_1FFC);
        assert_eq!(
            space.read_user_u64(&pool, tail),
            Err(VmmError::BadAddress(VirtualAddress::new(0x40_2000)))
        );
    }

    #[test]
    fn cstr_is_bounded() {
        let (mut pool, mut tlb, mut stats, mut space) = setup(RW);
        let at = VirtualAddress::new(0x40_0FFE);
        space
            .copy_to_user(&mut pool, &mut tlb, &mut stats, at, b"/bin/sh\0")
            .unwrap();
        assert_eq!(space.read_user_cstr(&pool, at, 64).unwrap(), b"/bin/sh");
        assert_eq!(space.read_user_cstr(&pool, at, 4), Err(VmmError::TooLong(4)));
    }

    #[test]
    fn kernel_write_ignores_region_protection() {
        let (mut pool, mut tlb, _, mut space) =
            setup(RegionFlags::READ | RegionFlags::USER | RegionFlags::LAZY);
        let at = VirtualAddress::new(0x40_0010);
        space.kernel_write(&mut pool, &mut tlb, at, &7u64.to_le_bytes()).unwrap();
        assert_eq!(space.read_user_u64(&pool, at), Ok(7));
        assert!(!space.lookup(&pool, at.page()).unwrap().is_writable());
    }
}
