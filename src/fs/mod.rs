// src/fs/mod.rs
//! Global File-Description Table and the `FileDescriptor` trait every
//! open file, pipe end, or device stream implements.
//!
//! Actual path resolution and on-disk layout are a VFS collaborator's job
//! (section 6, "persisted state") and out of scope here; this table only
//! tracks reference-counted descriptions once something else has produced
//! a descriptor for them.

pub mod diskfs;
pub mod pipe;
pub mod vfs;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::errors::FsError;

/// Bits requestable in `pollfd.events`.
pub const POLLIN: u8 = 1;
pub const POLLPRI: u8 = 2;
pub const POLLOUT: u8 = 4;
pub const POLL_REQUESTABLE_MASK: u8 = POLLIN | POLLPRI | POLLOUT;

/// Return-only bits set in `revents`.
pub const POLLERR: u8 = 8;
pub const POLLHUP: u8 = 16;
pub const POLLNVAL: u8 = 32;

pub trait FileDescriptor {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError>;
    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError>;
    fn close(&mut self);
    /// Immediate readiness for the requested event bits; never blocks.
    fn poll(&mut self, events: u8) -> u8;
}

struct FileEntry {
    refcount: u32,
    descriptor: Arc<Mutex<dyn FileDescriptor + Send>>,
}

pub struct FileTable {
    entries: BTreeMap<u32, FileEntry>,
}

impl FileTable {
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    fn lowest_free_key(&self) -> u32 {
        let mut candidate = 1;
        for &key in self.entries.keys() {
            if key == candidate {
                candidate += 1;
            } else if key > candidate {
                break;
            }
        }
        candidate
    }

    /// Registers an already-constructed descriptor, allocating it the
    /// lowest unused global key.
    pub fn open_file(&mut self, descriptor: Arc<Mutex<dyn FileDescriptor + Send>>) -> u32 {
        let key = self.lowest_free_key();
        self.entries.insert(key, FileEntry { refcount: 1, descriptor });
        key
    }

    /// Decrements the reference count, removing the entry at zero.
    pub fn close_file(&mut self, key: u32) {
        let mut remove = false;
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.refcount -= 1;
            if entry.refcount == 0 {
                remove = true;
            }
        }
        if remove {
            if let Some(entry) = self.entries.remove(&key) {
                entry.descriptor.lock().close();
            }
        }
    }

    /// Bumps the reference count (used by `fork`).
    pub fn copy_file(&mut self, key: u32) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.refcount += 1;
        }
    }

    #[must_use]
    pub fn get(&self, key: u32) -> Option<Arc<Mutex<dyn FileDescriptor + Send>>> {
        self.entries.get(&key).map(|e| e.descriptor.clone())
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    pub static ref FILE_TABLE: Mutex<FileTable> = Mutex::new(FileTable::new());
}
