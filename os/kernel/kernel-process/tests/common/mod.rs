#![allow(dead_code)]

use kernel_alloc::FramePool;
use kernel_memory_addresses::VirtualAddress;
use kernel_process::{
    ElfError, ImageLoader, LoadedImage, Pid, ProcessTable, ProcessTableConfig, ReadyQueue,
    Scheduler,
};
use kernel_vmem::FlushLog;
use kernel_vmm::{AddressSpace, LoadSegment, RegionFlags, RegionKind};

pub const CODE_BASE: u64 = 0x40_0000;
pub const DATA_BASE: u64 = 0x60_0000;

pub const RW: RegionFlags = RegionFlags::READ
    .union(RegionFlags::WRITE)
    .union(RegionFlags::USER);

/// Accepts `PROG<code>` images: the code at [`CODE_BASE`] and two pages of
/// zeroed data at [`DATA_BASE`]. `PROGFAIL` passes the probe but not the load.
#[derive(Debug, Default)]
pub struct TestLoader;

impl ImageLoader for TestLoader {
    fn probe(&self, image: &[u8]) -> Result<(), ElfError> {
        if image.starts_with(b"PROG") {
            Ok(())
        } else {
            Err(ElfError::BadMagic)
        }
    }

    fn load<'a>(&self, image: &'a [u8]) -> Result<LoadedImage<'a>, ElfError> {
        self.probe(image)?;
        if image == b"PROGFAIL" {
            return Err(ElfError::BadProgramHeader);
        }
        let code = &image[4..];
        Ok(LoadedImage {
            entry: VirtualAddress::new(CODE_BASE),
            segments: vec![
                LoadSegment {
                    vaddr: VirtualAddress::new(CODE_BASE),
                    data: code,
                    mem_size: code.len().max(1) as u64,
                    flags: RegionFlags::READ | RegionFlags::EXEC,
                },
                LoadSegment {
                    vaddr: VirtualAddress::new(DATA_BASE),
                    data: &[],
                    mem_size: 0x2000,
                    flags: RegionFlags::READ | RegionFlags::WRITE,
                },
            ],
        })
    }
}

pub fn table_with<S: Scheduler>(capacity: usize, scheduler: S) -> ProcessTable<S> {
    let config = ProcessTableConfig {
        capacity,
        ..ProcessTableConfig::default()
    };
    ProcessTable::new(config, FramePool::new(512), Box::new(FlushLog::new()), scheduler)
        .with_loader(TestLoader)
}

pub fn table(capacity: usize) -> ProcessTable<ReadyQueue> {
    table_with(capacity, ReadyQueue::default())
}

/// Map one writable data page at `addr` in `pid`.
pub fn map_page<S: Scheduler>(table: &ProcessTable<S>, pid: Pid, addr: u64) {
    table
        .with_address_space(pid, |space, ctx| {
            space
                .create_region(ctx.memory, ctx.tlb, VirtualAddress::new(addr), 0x1000, RW, RegionKind::Data, "data")
                .unwrap();
        })
        .unwrap();
}

pub fn write_byte<S: Scheduler>(table: &ProcessTable<S>, pid: Pid, addr: u64, value: u8) {
    table
        .with_address_space(pid, |space, ctx| {
            space
                .copy_to_user(ctx.memory, ctx.tlb, ctx.stats, VirtualAddress::new(addr), &[value])
                .unwrap();
        })
        .unwrap();
}

pub fn read_byte<S: Scheduler>(table: &ProcessTable<S>, pid: Pid, addr: u64) -> u8 {
    table
        .with_address_space(pid, |space, ctx| {
            let mut b = [0u8];
            space
                .copy_from_user(&*ctx.memory, VirtualAddress::new(addr), &mut b)
                .unwrap();
            b[0]
        })
        .unwrap()
}

pub fn with_space<S: Scheduler, R>(
    table: &ProcessTable<S>,
    pid: Pid,
    f: impl FnOnce(&mut AddressSpace, &FramePool) -> R,
) -> R {
    table
        .with_address_space(pid, |space, ctx| f(space, ctx.memory))
        .unwrap()
}
