// SPDX-License-Identifier: MPL-2.0

use super::file::File;
use crate::{config::NFILES, prelude::*};

pub type FileDesc = i32;

/// The per-process descriptor table: a fixed-size array of slots mapping
/// small integers to open files. The lowest empty slot is the next free
/// descriptor.
pub struct FileTable {
    slots: Vec<Option<Arc<File>>>,
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            slots: vec![None; NFILES],
        }
    }

    fn slot(&self, fd: FileDesc) -> Result<usize> {
        if fd < 0 || fd as usize >= NFILES {
            return_errno_with_message!(Errno::EBADF, "descriptor out of range");
        }
        Ok(fd as usize)
    }

    pub fn get(&self, fd: FileDesc) -> Result<Arc<File>> {
        let slot = self.slot(fd)?;
        self.slots[slot]
            .clone()
            .ok_or(Error::with_message(Errno::EBADF, "descriptor not open"))
    }

    pub fn is_open(&self, fd: FileDesc) -> bool {
        self.slot(fd)
            .is_ok_and(|slot| self.slots[slot].is_some())
    }

    /// Returns the lowest free descriptor.
    pub fn get_empty_fd(&self) -> Result<FileDesc> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(|fd| fd as FileDesc)
            .ok_or(Error::with_message(Errno::EMFILE, "descriptor table full"))
    }

    pub fn install(&mut self, fd: FileDesc, file: Arc<File>) {
        let slot = fd as usize;
        debug_assert!(slot < NFILES);
        debug_assert!(self.slots[slot].is_none());
        self.slots[slot] = Some(file);
    }

    /// Empties the slot, dropping this descriptor's reference to the file.
    pub fn remove(&mut self, fd: FileDesc) -> Option<Arc<File>> {
        let slot = self.slot(fd).ok()?;
        self.slots[slot].take()
    }

    pub fn close_all(&mut self) -> Vec<Arc<File>> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    pub fn fds_and_files(&self) -> impl Iterator<Item = (FileDesc, &Arc<File>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(fd, slot)| slot.as_ref().map(|file| (fd as FileDesc, file)))
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for FileTable {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}
