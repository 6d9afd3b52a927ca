use kernel_info::signal::{SIGKILL, SIGSEGV};
use kernel_memory_addresses::{VirtualAddress, VirtualPage};
use kernel_vmem::{MapError, NotMapped};
use thiserror::Error;

/// Errors returned by address-space operations.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum VmmError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("range overlaps an existing region")]
    Overlap,
    #[error("no region or mapping at {0}")]
    NotFound(VirtualAddress),
    #[error("permission denied")]
    PermissionDenied,
    #[error("page {0} is already mapped")]
    AlreadyMapped(VirtualPage),
    #[error("bad user address {0}")]
    BadAddress(VirtualAddress),
    #[error("string longer than {0} bytes")]
    TooLong(usize),
    #[error("page tables inconsistent: {0}")]
    Corrupted(MapError),
}

impl From<MapError> for VmmError {
    fn from(e: MapError) -> Self {
        match e {
            MapError::AlreadyMapped(page) => Self::AlreadyMapped(page),
            MapError::OutOfMemory(_) => Self::OutOfMemory,
            MapError::InvalidTable(_) => Self::Corrupted(e),
        }
    }
}

impl From<NotMapped> for VmmError {
    fn from(e: NotMapped) -> Self {
        Self::NotFound(e.0.base())
    }
}

/// A page fault that cannot be resolved; the faulting process must die.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum FatalFault {
    #[error("segmentation fault at {0}: no region")]
    Segmentation(VirtualAddress),
    #[error("protection fault at {0}")]
    Permission(VirtualAddress),
    #[error("unresolvable fault at {0}")]
    Unresolvable(VirtualAddress),
    #[error("out of memory resolving fault at {0}")]
    OutOfMemory(VirtualAddress),
}

impl FatalFault {
    /// Signal that terminates the faulting process.
    #[must_use]
    pub const fn signal(&self) -> u8 {
        match self {
            Self::OutOfMemory(_) => SIGKILL,
            _ => SIGSEGV,
        }
    }

    #[must_use]
    pub const fn address(&self) -> VirtualAddress {
        match *self {
            Self::Segmentation(a)
            | Self::Permission(a)
            | Self::Unresolvable(a)
            | Self::OutOfMemory(a) => a,
        }
    }
}
