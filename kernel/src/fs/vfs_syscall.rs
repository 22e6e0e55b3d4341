// SPDX-License-Identifier: MPL-2.0

//! The VFS system-call layer.
//!
//! Every operation validates its descriptor or path arguments, acquires the
//! references it needs, performs the vnode operation, and releases the
//! references on all return paths (which shared-ownership handles make
//! automatic). Vnode-op errors pass through unchanged.

use super::{
    device,
    file::{FMode, File, Whence},
    file_table::FileDesc,
    namev::{dir_namev, lookup, open_namev},
    vnode::{Dirent, Stat, VnodeKind},
};
use crate::prelude::*;

/// The two low bits of the open flags select the access mode; exactly one
/// of read-only (0), write-only (1) or read-write (2) is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    const MASK: u32 = 0x3;

    pub fn from_flags(flags: u32) -> Result<Self> {
        match flags & Self::MASK {
            0 => Ok(AccessMode::ReadOnly),
            1 => Ok(AccessMode::WriteOnly),
            2 => Ok(AccessMode::ReadWrite),
            _ => Err(Error::with_message(Errno::EINVAL, "bad access mode")),
        }
    }

    pub fn is_readable(&self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

bitflags! {
    /// Open flags beyond the access-mode bits.
    pub struct OpenFlags: u32 {
        const O_CREAT  = 0x100;
        const O_TRUNC  = 0x200;
        const O_APPEND = 0x400;
    }
}

pub const O_RDONLY: u32 = 0;
pub const O_WRONLY: u32 = 1;
pub const O_RDWR: u32 = 2;
pub const O_CREAT: u32 = OpenFlags::O_CREAT.bits();
pub const O_TRUNC: u32 = OpenFlags::O_TRUNC.bits();
pub const O_APPEND: u32 = OpenFlags::O_APPEND.bits();

/// Opens `path`, returning a new file descriptor.
pub fn do_open(path: &str, flags: u32) -> Result<FileDesc> {
    let access = AccessMode::from_flags(flags)?;
    let extra = OpenFlags::from_bits(flags & !AccessMode::MASK)
        .ok_or(Error::with_message(Errno::EINVAL, "unknown open flags"))?;

    let vnode = open_namev(path, extra.contains(OpenFlags::O_CREAT), None)?;

    match vnode.kind() {
        VnodeKind::Directory if access.is_writable() => {
            return_errno_with_message!(Errno::EISDIR, "directory opened for writing");
        }
        VnodeKind::CharDev(dev) => {
            if device::byte_device(dev).is_none() {
                return_errno_with_message!(Errno::ENXIO, "no driver for device");
            }
        }
        VnodeKind::BlockDev(_) => {
            // No block drivers are registered in this kernel.
            return_errno_with_message!(Errno::ENXIO, "no driver for device");
        }
        _ => {}
    }

    if extra.contains(OpenFlags::O_TRUNC) && vnode.kind().is_regular() && access.is_writable() {
        vnode.truncate(0)?;
    }

    // Derive the file mode with a bitwise union of the mode bits.
    let mut fmode = FMode::empty();
    if access.is_readable() {
        fmode |= FMode::READ;
    }
    if access.is_writable() {
        fmode |= FMode::WRITE;
    }
    if extra.contains(OpenFlags::O_APPEND) {
        fmode |= FMode::APPEND;
    }

    let current = current!();
    let mut files = current.files().lock();
    let fd = files.get_empty_fd()?;
    files.install(fd, File::new(vnode, fmode));
    Ok(fd)
}

/// Zeroes the descriptor slot, dropping its reference to the file.
pub fn do_close(fd: FileDesc) -> Result<()> {
    current!()
        .files()
        .lock()
        .remove(fd)
        .map(drop)
        .ok_or(Error::with_message(Errno::EBADF, "descriptor not open"))
}

/// Reads up to `buf.len()` bytes at the file position, advancing it by the
/// number of bytes the filesystem returned.
pub fn do_read(fd: FileDesc, buf: &mut [u8]) -> Result<usize> {
    let file = current!().files().lock().get(fd)?;
    if !file.mode().contains(FMode::READ) {
        return_errno_with_message!(Errno::EBADF, "file not open for reading");
    }
    if file.vnode().kind().is_dir() {
        return_errno_with_message!(Errno::EISDIR, "reading a directory");
    }
    let n = file.vnode().read_at(file.pos(), buf)?;
    file.advance(n);
    Ok(n)
}

/// Writes `buf` at the file position (first seeking to the end in append
/// mode), advancing the position by the number of bytes written.
pub fn do_write(fd: FileDesc, buf: &[u8]) -> Result<usize> {
    let file = current!().files().lock().get(fd)?;
    if !file.mode().contains(FMode::WRITE) {
        return_errno_with_message!(Errno::EBADF, "file not open for writing");
    }
    if file.mode().contains(FMode::APPEND) {
        file.seek(0, Whence::End)?;
    }
    let n = file.vnode().write_at(file.pos(), buf)?;
    file.advance(n);
    debug_assert!(
        !file.vnode().kind().is_regular() || file.pos() <= file.vnode().len()
    );
    Ok(n)
}

/// Duplicates `fd` onto the lowest free descriptor. Both descriptors share
/// one open file, position included.
pub fn do_dup(fd: FileDesc) -> Result<FileDesc> {
    let current = current!();
    let mut files = current.files().lock();
    let file = files.get(fd)?;
    let nfd = files.get_empty_fd()?;
    files.install(nfd, file);
    Ok(nfd)
}

/// Duplicates `ofd` onto `nfd`, closing `nfd` first if it is open.
/// `dup2(fd, fd)` is a no-op.
pub fn do_dup2(ofd: FileDesc, nfd: FileDesc) -> Result<FileDesc> {
    let current = current!();
    let mut files = current.files().lock();
    let file = files.get(ofd)?;
    if nfd < 0 || nfd as usize >= crate::config::NFILES {
        return_errno_with_message!(Errno::EBADF, "new descriptor out of range");
    }
    if ofd == nfd {
        return Ok(nfd);
    }
    files.remove(nfd);
    files.install(nfd, file);
    Ok(nfd)
}

/// Repositions the file offset; the new offset is returned and never
/// allowed to go negative.
pub fn do_lseek(fd: FileDesc, offset: i64, whence: Whence) -> Result<usize> {
    let file = current!().files().lock().get(fd)?;
    file.seek(offset, whence)
}

/// Creates a device special file; `kind` carries the device id. Only
/// character- and block-device kinds are accepted.
pub fn do_mknod(path: &str, kind: VnodeKind) -> Result<()> {
    if !kind.is_device() {
        return_errno_with_message!(Errno::EINVAL, "mknod of a non-device");
    }
    let (parent, name) = dir_namev(path, None)?;
    match lookup(&parent, &name) {
        Ok(_) => return_errno!(Errno::EEXIST),
        Err(e) if e.error() == Errno::ENOENT => parent.mknod(&name, kind),
        Err(e) => Err(e),
    }
}

pub fn do_mkdir(path: &str) -> Result<()> {
    let (parent, name) = dir_namev(path, None)?;
    match lookup(&parent, &name) {
        Ok(_) => return_errno!(Errno::EEXIST),
        Err(e) if e.error() == Errno::ENOENT => parent.mkdir(&name).map(drop),
        Err(e) => Err(e),
    }
}

/// Removes an empty directory. A path ending in `"."` is invalid, and one
/// ending in `".."` can never name an empty directory.
pub fn do_rmdir(path: &str) -> Result<()> {
    let (parent, name) = dir_namev(path, None)?;
    if name == "." {
        return_errno_with_message!(Errno::EINVAL, "rmdir of \".\"");
    }
    if name == ".." {
        return_errno_with_message!(Errno::ENOTEMPTY, "rmdir of \"..\"");
    }
    parent.rmdir(&name)
}

pub fn do_unlink(path: &str) -> Result<()> {
    let (parent, name) = dir_namev(path, None)?;
    let target = lookup(&parent, &name)?;
    if target.kind().is_dir() {
        return_errno_with_message!(Errno::EISDIR, "unlink of a directory");
    }
    parent.unlink(&name)
}

/// Makes `to` a new hard link to the file named by `from`.
pub fn do_link(from: &str, to: &str) -> Result<()> {
    let target = open_namev(from, false, None)?;
    let (parent, name) = dir_namev(to, None)?;
    match lookup(&parent, &name) {
        Ok(_) => return_errno!(Errno::EEXIST),
        Err(e) if e.error() == Errno::ENOENT => parent.link(&target, &name),
        Err(e) => Err(e),
    }
}

/// Renames by linking the new name and unlinking the old one. If the unlink
/// fails the file is left with both links.
pub fn do_rename(old: &str, new: &str) -> Result<()> {
    do_link(old, new)?;
    do_unlink(old)
}

/// Makes `path` the current process's working directory.
pub fn do_chdir(path: &str) -> Result<()> {
    let vnode = open_namev(path, false, None)?;
    if !vnode.kind().is_dir() {
        return_errno_with_message!(Errno::ENOTDIR, "chdir target is not a directory");
    }
    current!().set_cwd(vnode);
    Ok(())
}

/// Reads one directory entry at the descriptor's position, advancing it by
/// one entry. Returns `None` at end-of-directory.
pub fn do_getdent(fd: FileDesc) -> Result<Option<Dirent>> {
    let file = current!().files().lock().get(fd)?;
    if !file.vnode().kind().is_dir() {
        return_errno_with_message!(Errno::ENOTDIR, "getdent on a non-directory");
    }
    let entry = file.vnode().readdir(file.pos())?;
    if entry.is_some() {
        file.advance(1);
    }
    Ok(entry)
}

pub fn do_stat(path: &str) -> Result<Stat> {
    let (parent, name) = dir_namev(path, None)?;
    let vnode = lookup(&parent, &name)?;
    vnode.stat()
}
