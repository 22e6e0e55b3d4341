// SPDX-License-Identifier: MPL-2.0

use crate::{prelude::*, vm::mmobj::MmObj};

/// Device identifier carried by device special files.
pub type DevId = u32;

pub const fn mkdevid(major: u16, minor: u16) -> DevId {
    ((major as u32) << 16) | minor as u32
}

/// What a vnode is: a regular file, a directory, or a device special file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeKind {
    Regular,
    Directory,
    CharDev(DevId),
    BlockDev(DevId),
}

impl VnodeKind {
    pub fn is_regular(&self) -> bool {
        matches!(self, VnodeKind::Regular)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, VnodeKind::Directory)
    }

    pub fn is_chardev(&self) -> bool {
        matches!(self, VnodeKind::CharDev(_))
    }

    pub fn is_blockdev(&self) -> bool {
        matches!(self, VnodeKind::BlockDev(_))
    }

    pub fn is_device(&self) -> bool {
        self.is_chardev() || self.is_blockdev()
    }

    pub fn devid(&self) -> Option<DevId> {
        match self {
            VnodeKind::CharDev(dev) | VnodeKind::BlockDev(dev) => Some(*dev),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub ino: u64,
    pub kind: VnodeKind,
    pub nlink: usize,
    pub len: usize,
}

/// One directory entry, as returned by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub ino: u64,
    pub name: String,
}

/// The polymorphic inode abstraction every filesystem implements.
///
/// Shared-ownership handles (`Arc<dyn Vnode>`) replace manual reference
/// counting: holding a handle keeps the vnode alive, and the filesystem's
/// storage is released when the last handle drops.
///
/// Directory operations default to `ENOTDIR` and data operations to
/// `EINVAL`, so each node kind only implements what it supports.
pub trait Vnode: Any + Send + Sync {
    fn kind(&self) -> VnodeKind;
    fn ino(&self) -> u64;
    fn len(&self) -> usize;
    fn stat(&self) -> Result<Stat>;

    /// Looks up `name` in this directory. `".."` is resolved here; `"."` is
    /// handled by the path resolver before the filesystem is consulted.
    fn lookup(&self, _name: &str) -> Result<Arc<dyn Vnode>> {
        return_errno!(Errno::ENOTDIR)
    }

    /// Creates a regular file named `name` in this directory.
    fn create(&self, _name: &str) -> Result<Arc<dyn Vnode>> {
        return_errno!(Errno::ENOTDIR)
    }

    /// Creates a device special file named `name` in this directory.
    fn mknod(&self, _name: &str, _kind: VnodeKind) -> Result<()> {
        return_errno!(Errno::ENOTDIR)
    }

    fn mkdir(&self, _name: &str) -> Result<Arc<dyn Vnode>> {
        return_errno!(Errno::ENOTDIR)
    }

    fn rmdir(&self, _name: &str) -> Result<()> {
        return_errno!(Errno::ENOTDIR)
    }

    /// Makes `name` in this directory a new link to `target`.
    fn link(&self, _target: &Arc<dyn Vnode>, _name: &str) -> Result<()> {
        return_errno!(Errno::ENOTDIR)
    }

    fn unlink(&self, _name: &str) -> Result<()> {
        return_errno!(Errno::ENOTDIR)
    }

    /// Returns the `pos`-th entry of this directory, or `None` past the end.
    fn readdir(&self, _pos: usize) -> Result<Option<Dirent>> {
        return_errno!(Errno::ENOTDIR)
    }

    fn read_at(&self, _off: usize, _buf: &mut [u8]) -> Result<usize> {
        return_errno!(Errno::EINVAL)
    }

    fn write_at(&self, _off: usize, _buf: &[u8]) -> Result<usize> {
        return_errno!(Errno::EINVAL)
    }

    fn truncate(&self, _len: usize) -> Result<()> {
        return_errno!(Errno::EINVAL)
    }

    /// Fills `buf` (one page) with the `pagenum`-th page of this file.
    fn fill_page(&self, _pagenum: usize, _buf: &mut [u8]) -> Result<()> {
        return_errno!(Errno::EINVAL)
    }

    /// Writes one dirtied page back into the file.
    fn clean_page(&self, _pagenum: usize, _buf: &[u8]) -> Result<()> {
        return_errno!(Errno::EINVAL)
    }

    fn dirty_page(&self, _pagenum: usize) -> Result<()> {
        Ok(())
    }

    /// Returns the memory object providing this file's pages, for mapping
    /// into an address space.
    fn mmap(self: Arc<Self>) -> Result<Arc<dyn MmObj>> {
        return_errno!(Errno::EINVAL)
    }
}

/// Whether two handles refer to the same vnode. Compares the underlying
/// allocation, not the vtable, so it is reliable across coercion sites.
pub fn vnode_eq(a: &Arc<dyn Vnode>, b: &Arc<dyn Vnode>) -> bool {
    core::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl core::fmt::Debug for dyn Vnode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vnode")
            .field("ino", &self.ino())
            .field("kind", &self.kind())
            .finish()
    }
}
