//! Per-process file-descriptor table.
//!
//! Slots hold shared references to open files; `fork` clones the references,
//! never the files.

use crate::ProcError;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use kernel_info::process::MAX_OPEN_FILES;

/// An open file as seen by descriptor tables.
#[derive(Debug, Eq, PartialEq)]
pub struct OpenFile {
    path: String,
}

impl OpenFile {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { path: path.into() })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Shared handle to an [`OpenFile`].
pub type FileRef = Arc<OpenFile>;

bitflags! {
    /// Per-descriptor flags.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct FdFlags: u32 {
        /// Close the descriptor when the process execs a new image.
        const CLOEXEC = 1;
    }
}

#[derive(Debug, Clone)]
struct Slot {
    file: FileRef,
    flags: FdFlags,
}

/// Fixed-size descriptor table; descriptors are slot indices.
#[derive(Debug, Clone)]
pub struct FdTable {
    slots: Vec<Option<Slot>>,
}

impl FdTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: alloc::vec![None; MAX_OPEN_FILES],
        }
    }

    /// Install `file` in the lowest free slot.
    ///
    /// # Errors
    /// [`ProcError::TooManyFiles`] if every slot is taken.
    pub fn install(&mut self, file: FileRef, flags: FdFlags) -> Result<usize, ProcError> {
        let fd = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(ProcError::TooManyFiles)?;
        self.slots[fd] = Some(Slot { file, flags });
        Ok(fd)
    }

    #[must_use]
    pub fn get(&self, fd: usize) -> Option<&FileRef> {
        self.slots.get(fd)?.as_ref().map(|s| &s.file)
    }

    #[must_use]
    pub fn flags(&self, fd: usize) -> Option<FdFlags> {
        self.slots.get(fd)?.as_ref().map(|s| s.flags)
    }

    /// # Errors
    /// [`ProcError::BadFd`] if `fd` is not open.
    pub fn close(&mut self, fd: usize) -> Result<FileRef, ProcError> {
        self.slots
            .get_mut(fd)
            .and_then(Option::take)
            .map(|s| s.file)
            .ok_or(ProcError::BadFd(fd))
    }

    /// Close every descriptor; returns how many were open.
    pub fn close_all(&mut self) -> usize {
        self.slots.iter_mut().filter_map(Option::take).count()
    }

    /// Close descriptors marked [`FdFlags::CLOEXEC`]; returns how many.
    pub fn close_on_exec(&mut self) -> usize {
        let mut closed = 0;
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|s| s.flags.contains(FdFlags::CLOEXEC)) {
                *slot = None;
                closed += 1;
            }
        }
        closed
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_free_slot_is_reused() {
        let mut fds = FdTable::new();
        let f = OpenFile::new("/dev/console");
        assert_eq!(fds.install(f.clone(), FdFlags::empty()), Ok(0));
        assert_eq!(fds.install(f.clone(), FdFlags::empty()), Ok(1));
        assert_eq!(fds.install(f.clone(), FdFlags::empty()), Ok(2));
        fds.close(1).unwrap();
        assert_eq!(fds.install(f.clone(), FdFlags::empty()), Ok(1));
        assert_eq!(Arc::strong_count(&f), 4);
        assert_eq!(fds.close(9).unwrap_err(), ProcError::BadFd(9));
    }

    #[test]
    fn full_table_is_reported() {
        let mut fds = FdTable::new();
        let f = OpenFile::new("x");
        for _ in 0..MAX_OPEN_FILES {
            fds.install(f.clone(), FdFlags::empty()).unwrap();
        }
        assert_eq!(fds.install(f, FdFlags::empty()), Err(ProcError::TooManyFiles));
    }

    #[test]
    fn clones_share_files_and_cloexec_is_honoured() {
        let mut fds = FdTable::new();
        let log = OpenFile::new("/var/log");
        fds.install(log.clone(), FdFlags::empty()).unwrap();
        fds.install(log.clone(), FdFlags::CLOEXEC).unwrap();
        let mut child = fds.clone();
        assert_eq!(Arc::strong_count(&log), 5);

        assert_eq!(child.close_on_exec(), 1);
        assert_eq!(child.open_count(), 1);
        assert_eq!(child.get(0).map(|f| f.path()), Some("/var/log"));
        assert_eq!(fds.close_all(), 2);
        assert_eq!(child.close_all(), 1);
        assert_eq!(Arc::strong_count(&log), 1);
    }
}
