//! # ELF Loader Collaborator
//!
//! [`Elf64Loader`] reads little-endian ELF64 x86-64 executables without
//! allocating for the headers and hands back the `PT_LOAD` segments as
//! [`LoadSegment`]s borrowing the image bytes. Position-independent images
//! (`ET_DYN`) are biased so that their lowest segment lands at
//! [`USER_VIRTUAL_BASE`].

use alloc::vec::Vec;
use bitfield_struct::bitfield;
use kernel_info::memory::USER_VIRTUAL_BASE;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmm::{LoadSegment, RegionFlags};
use thiserror::Error;

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum ElfError {
    #[error("image shorter than an ELF header")]
    TooShort,
    #[error("bad ELF magic")]
    BadMagic,
    #[error("not an ELF64 image")]
    BadClass,
    #[error("not an x86-64 image")]
    BadMachine,
    #[error("malformed ELF header")]
    BadHeader,
    #[error("header or segment out of bounds")]
    OutOfBounds,
    #[error("malformed program header")]
    BadProgramHeader,
    #[error("no loadable segment")]
    NoSegments,
}

/// Entry point and segments of a validated image.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LoadedImage<'a> {
    pub entry: VirtualAddress,
    pub segments: Vec<LoadSegment<'a>>,
}

/// Turns program images into loadable segments.
pub trait ImageLoader: Send + Sync {
    /// Cheap check that `image` looks executable; no segment parsing.
    ///
    /// # Errors
    /// [`ElfError`] describing the first problem found.
    fn probe(&self, image: &[u8]) -> Result<(), ElfError>;

    /// Validate `image` fully and list its loadable segments in file order.
    ///
    /// # Errors
    /// [`ElfError`] describing the first problem found.
    fn load<'a>(&self, image: &'a [u8]) -> Result<LoadedImage<'a>, ElfError>;
}

const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;
const EM_X86_64: u16 = 62;
const PT_LOAD: u32 = 1;
const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;

/// `Elf64_Phdr.p_flags`: bit 0 = X, bit 1 = W, bit 2 = R.
#[bitfield(u32)]
pub struct SegmentFlags {
    pub execute: bool,
    pub write: bool,
    pub read: bool,
    #[bits(29)]
    __: u32,
}

impl SegmentFlags {
    #[must_use]
    pub const fn region_flags(self) -> RegionFlags {
        let mut flags = RegionFlags::empty();
        if self.read() {
            flags = flags.union(RegionFlags::READ);
        }
        if self.write() {
            flags = flags.union(RegionFlags::WRITE);
        }
        if self.execute() {
            flags = flags.union(RegionFlags::EXEC);
        }
        flags
    }
}

#[derive(Copy, Clone, Debug)]
struct Header {
    e_type: u16,
    entry: u64,
    phoff: usize,
    phnum: usize,
}

#[derive(Copy, Clone, Debug)]
struct ProgramHeader {
    p_type: u32,
    flags: SegmentFlags,
    offset: u64,
    vaddr: u64,
    filesz: u64,
    memsz: u64,
}

#[inline]
fn le16(x: &[u8]) -> u16 {
    u16::from_le_bytes([x[0], x[1]])
}

#[inline]
fn le32(x: &[u8]) -> u32 {
    u32::from_le_bytes([x[0], x[1], x[2], x[3]])
}

#[inline]
fn le64(x: &[u8]) -> u64 {
    u64::from_le_bytes([x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7]])
}

fn parse_header(bytes: &[u8]) -> Result<Header, ElfError> {
    if bytes.len() < EHDR_SIZE {
        return Err(ElfError::TooShort);
    }
    if &bytes[0..4] != b"\x7FELF" {
        return Err(ElfError::BadMagic);
    }
    // ELFCLASS64
    if bytes[4] != 2 {
        return Err(ElfError::BadClass);
    }
    // little-endian
    if bytes[5] != 1 {
        return Err(ElfError::BadHeader);
    }

    let e_type = le16(&bytes[16..18]);
    if e_type != ET_EXEC && e_type != ET_DYN {
        return Err(ElfError::BadHeader);
    }
    if le16(&bytes[18..20]) != EM_X86_64 {
        return Err(ElfError::BadMachine);
    }
    if le32(&bytes[20..24]) != 1 {
        return Err(ElfError::BadHeader);
    }
    if usize::from(le16(&bytes[54..56])) != PHDR_SIZE {
        return Err(ElfError::BadHeader);
    }

    let phoff = usize::try_from(le64(&bytes[32..40])).map_err(|_| ElfError::OutOfBounds)?;
    let phnum = usize::from(le16(&bytes[56..58]));
    let end = phnum
        .checked_mul(PHDR_SIZE)
        .and_then(|n| n.checked_add(phoff))
        .ok_or(ElfError::OutOfBounds)?;
    if end > bytes.len() {
        return Err(ElfError::OutOfBounds);
    }

    Ok(Header {
        e_type,
        entry: le64(&bytes[24..32]),
        phoff,
        phnum,
    })
}

fn program_headers<'a>(bytes: &'a [u8], h: &Header) -> impl Iterator<Item = ProgramHeader> + 'a {
    let (phoff, phnum) = (h.phoff, h.phnum);
    (0..phnum).filter_map(move |i| {
        let at = phoff + i * PHDR_SIZE;
        let s = bytes.get(at..at + PHDR_SIZE)?;
        Some(ProgramHeader {
            p_type: le32(&s[0..4]),
            flags: SegmentFlags::from_bits(le32(&s[4..8])),
            offset: le64(&s[8..16]),
            vaddr: le64(&s[16..24]),
            filesz: le64(&s[32..40]),
            memsz: le64(&s[40..48]),
        })
    })
}

/// File bytes backing a segment.
fn segment_bytes<'a>(bytes: &'a [u8], ph: &ProgramHeader) -> Result<&'a [u8], ElfError> {
    let off = usize::try_from(ph.offset).map_err(|_| ElfError::OutOfBounds)?;
    let size = usize::try_from(ph.filesz).map_err(|_| ElfError::OutOfBounds)?;
    let end = off.checked_add(size).ok_or(ElfError::OutOfBounds)?;
    bytes.get(off..end).ok_or(ElfError::OutOfBounds)
}

/// Load bias for `ET_DYN`: moves the lowest page-aligned segment to the
/// user image base. Fixed images load where they say.
fn load_bias(h: &Header, loads: &[ProgramHeader]) -> u64 {
    if h.e_type != ET_DYN {
        return 0;
    }
    let lowest = loads.iter().map(|ph| ph.vaddr).min().unwrap_or(0) & !0xFFF;
    USER_VIRTUAL_BASE.saturating_sub(lowest)
}

/// Loader for little-endian ELF64 x86-64 executables.
#[derive(Debug, Default, Copy, Clone)]
pub struct Elf64Loader;

impl ImageLoader for Elf64Loader {
    fn probe(&self, image: &[u8]) -> Result<(), ElfError> {
        parse_header(image).map(|_| ())
    }

    fn load<'a>(&self, image: &'a [u8]) -> Result<LoadedImage<'a>, ElfError> {
        let header = parse_header(image)?;
        let loads: Vec<ProgramHeader> = program_headers(image, &header)
            .filter(|ph| ph.p_type == PT_LOAD)
            .collect();
        if loads.is_empty() {
            return Err(ElfError::NoSegments);
        }
        let bias = load_bias(&header, &loads);

        let segments = loads
            .iter()
            .map(|ph| {
                if ph.filesz > ph.memsz || ph.memsz == 0 {
                    return Err(ElfError::BadProgramHeader);
                }
                let vaddr = ph.vaddr.checked_add(bias).ok_or(ElfError::BadProgramHeader)?;
                Ok(LoadSegment {
                    vaddr: VirtualAddress::new(vaddr),
                    data: segment_bytes(image, ph)?,
                    mem_size: ph.memsz,
                    flags: ph.flags.region_flags(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let entry = header.entry.checked_add(bias).ok_or(ElfError::BadHeader)?;
        Ok(LoadedImage {
            entry: VirtualAddress::new(entry),
            segments,
        })
    }
}
