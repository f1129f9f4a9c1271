// src/fs/vfs.rs
//! Virtual filesystem mount point. On-disk layout is a collaborator's
//! concern (section 6, "persisted state"); this just gives `open`/`unlink`
//! somewhere to delegate to once something mounts a root.

use alloc::boxed::Box;
use alloc::sync::Arc;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::errors::FsError;
use crate::fs::FileDescriptor;

pub trait FileSystem: Send {
    fn open(
        &mut self,
        path: &str,
        flags: u32,
        mode: u32,
    ) -> Result<Arc<Mutex<dyn FileDescriptor + Send>>, FsError>;

    fn unlink(&mut self, path: &str) -> Result<(), FsError>;
}

pub struct Vfs {
    root: Option<Box<dyn FileSystem>>,
}

impl Vfs {
    #[must_use]
    pub const fn new() -> Self {
        Self { root: None }
    }

    /// Mounts a filesystem at the (currently sole supported) root.
    pub fn mount(&mut self, fs: impl FileSystem + 'static) {
        self.root = Some(Box::new(fs));
    }

    pub fn open(
        &mut self,
        path: &str,
        flags: u32,
        mode: u32,
    ) -> Result<Arc<Mutex<dyn FileDescriptor + Send>>, FsError> {
        self.root.as_mut().ok_or(FsError::NotFound)?.open(path, flags, mode)
    }

    pub fn unlink(&mut self, path: &str) -> Result<(), FsError> {
        self.root.as_mut().ok_or(FsError::NotFound)?.unlink(path)
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    pub static ref VFS: Mutex<Vfs> = Mutex::new(Vfs::new());
}
