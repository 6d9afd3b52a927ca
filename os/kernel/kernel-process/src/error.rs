use crate::Pid;
use kernel_vmm::{FatalFault, VmmError};
use thiserror::Error;

/// Errors of the process lifecycle operations.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum ProcError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("process table is full")]
    TableFull,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("no such process: {0}")]
    NotFound(Pid),
    #[error("permission denied")]
    PermissionDenied,
    #[error("no child processes")]
    NoChildren,
    #[error("resource busy")]
    Busy,
    #[error("too many open files")]
    TooManyFiles,
    #[error("bad file descriptor {0}")]
    BadFd(usize),
    #[error("process killed: {0}")]
    FatalFault(FatalFault),
    #[error("image is not executable")]
    NotExecutable,
    #[error("argument list too large")]
    ArgumentsTooLarge,
    #[error("name too long")]
    NameTooLong,
    #[error("bad address")]
    BadAddress,
}

impl From<VmmError> for ProcError {
    fn from(e: VmmError) -> Self {
        match e {
            VmmError::OutOfMemory => Self::OutOfMemory,
            VmmError::InvalidParam | VmmError::Overlap | VmmError::AlreadyMapped(_) => {
                Self::InvalidParam
            }
            VmmError::PermissionDenied => Self::PermissionDenied,
            VmmError::NotFound(_) | VmmError::BadAddress(_) | VmmError::Corrupted(_) => {
                Self::BadAddress
            }
            VmmError::TooLong(_) => Self::ArgumentsTooLarge,
        }
    }
}

impl From<FatalFault> for ProcError {
    fn from(f: FatalFault) -> Self {
        Self::FatalFault(f)
    }
}
