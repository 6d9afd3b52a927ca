//! Numbers and encodings shared with user space.

use bitflags::bitflags;
use kernel_process::ProcError;
use kernel_vmm::RegionFlags;
use thiserror::Error;

/// System call numbers, passed in `rax`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u64)]
pub enum Sysno {
    Fork = 2,
    Execve = 3,
    Wait = 4,
    WaitPid = 5,
    Mmap = 9,
    Mprotect = 10,
    Munmap = 11,
    /// Move the program break by a signed delta; returns the old break.
    Brk = 12,
    Yield = 24,
    GetPid = 39,
    Exit = 60,
    Kill = 62,
    GetPpid = 110,
}

impl TryFrom<u64> for Sysno {
    type Error = Errno;

    fn try_from(value: u64) -> Result<Self, Errno> {
        Ok(match value {
            2 => Self::Fork,
            3 => Self::Execve,
            4 => Self::Wait,
            5 => Self::WaitPid,
            9 => Self::Mmap,
            10 => Self::Mprotect,
            11 => Self::Munmap,
            12 => Self::Brk,
            24 => Self::Yield,
            39 => Self::GetPid,
            60 => Self::Exit,
            62 => Self::Kill,
            110 => Self::GetPpid,
            _ => return Err(Errno::ENOSYS),
        })
    }
}

/// Error numbers returned negated in `rax`.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[repr(i64)]
pub enum Errno {
    #[error("operation not permitted")]
    EPERM = 1,
    #[error("no such file or directory")]
    ENOENT = 2,
    #[error("no such process")]
    ESRCH = 3,
    #[error("argument list too long")]
    E2BIG = 7,
    #[error("exec format error")]
    ENOEXEC = 8,
    #[error("bad file descriptor")]
    EBADF = 9,
    #[error("no child processes")]
    ECHILD = 10,
    #[error("resource temporarily unavailable")]
    EAGAIN = 11,
    #[error("out of memory")]
    ENOMEM = 12,
    #[error("permission denied")]
    EACCES = 13,
    #[error("bad address")]
    EFAULT = 14,
    #[error("device or resource busy")]
    EBUSY = 16,
    #[error("invalid argument")]
    EINVAL = 22,
    #[error("too many open files")]
    EMFILE = 24,
    #[error("file name too long")]
    ENAMETOOLONG = 36,
    #[error("function not implemented")]
    ENOSYS = 38,
}

impl Errno {
    /// The value placed in `rax`.
    #[must_use]
    pub const fn as_return(self) -> i64 {
        -(self as i64)
    }
}

impl From<ProcError> for Errno {
    fn from(e: ProcError) -> Self {
        match e {
            ProcError::OutOfMemory => Self::ENOMEM,
            ProcError::TableFull => Self::EAGAIN,
            ProcError::InvalidParam => Self::EINVAL,
            ProcError::NotFound(_) => Self::ESRCH,
            ProcError::PermissionDenied => Self::EPERM,
            ProcError::NoChildren => Self::ECHILD,
            ProcError::Busy => Self::EBUSY,
            ProcError::TooManyFiles => Self::EMFILE,
            ProcError::BadFd(_) => Self::EBADF,
            ProcError::FatalFault(_) | ProcError::BadAddress => Self::EFAULT,
            ProcError::NotExecutable => Self::ENOEXEC,
            ProcError::ArgumentsTooLarge => Self::E2BIG,
            ProcError::NameTooLong => Self::ENAMETOOLONG,
        }
    }
}

bitflags! {
    /// `waitpid` options.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct WaitOptions: u32 {
        /// Return 0 instead of blocking.
        const WNOHANG = 1;
        const WUNTRACED = 2;
        const WCONTINUED = 8;
    }
}

bitflags! {
    /// `mmap` / `mprotect` protection bits.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct Prot: u32 {
        const READ = 1;
        const WRITE = 2;
        const EXEC = 4;
    }
}

impl From<Prot> for RegionFlags {
    fn from(prot: Prot) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::READ, prot.contains(Prot::READ));
        flags.set(Self::WRITE, prot.contains(Prot::WRITE));
        flags.set(Self::EXEC, prot.contains(Prot::EXEC));
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_process::Pid;

    #[test]
    fn unknown_numbers_are_enosys() {
        assert_eq!(Sysno::try_from(60), Ok(Sysno::Exit));
        assert_eq!(Sysno::try_from(1), Err(Errno::ENOSYS));
        assert_eq!(Errno::ENOSYS.as_return(), -38);
    }

    #[test]
    fn process_errors_map_to_errno() {
        assert_eq!(Errno::from(ProcError::TableFull), Errno::EAGAIN);
        assert_eq!(Errno::from(ProcError::NoChildren), Errno::ECHILD);
        assert_eq!(Errno::from(ProcError::NotFound(Pid::INIT)), Errno::ESRCH);
        assert_eq!(Errno::from(ProcError::ArgumentsTooLarge), Errno::E2BIG);
    }

    #[test]
    fn prot_maps_to_region_access() {
        let flags = RegionFlags::from(Prot::READ | Prot::EXEC);
        assert_eq!(flags, RegionFlags::READ | RegionFlags::EXEC);
        assert_eq!(WaitOptions::from_bits(3), Some(WaitOptions::WNOHANG | WaitOptions::WUNTRACED));
        assert_eq!(WaitOptions::from_bits(4), None);
    }
}
