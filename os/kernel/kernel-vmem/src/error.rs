use crate::page_table::Level;
use kernel_memory_addresses::{PhysicalPage, VirtualPage};
use thiserror::Error;

/// Misuse of the frame reference counts.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum FrameError {
    #[error("frame {0} is not allocated")]
    NotAllocated(PhysicalPage),
    #[error("frame {0} is outside the frame pool")]
    OutOfRange(PhysicalPage),
    #[error("reference count of frame {0} overflowed")]
    RefCountOverflow(PhysicalPage),
}

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum MapError {
    #[error("page {0} is already mapped")]
    AlreadyMapped(VirtualPage),
    #[error("out of memory ({0})")]
    OutOfMemory(Level),
    #[error("page table frame {0} is not accessible")]
    InvalidTable(PhysicalPage),
}

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("page {0} is not mapped")]
pub struct NotMapped(pub VirtualPage);
