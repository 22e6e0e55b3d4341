// SPDX-License-Identifier: MPL-2.0

//! Path resolution.

use super::{rootfs, vnode::Vnode};
use crate::{
    config::{MAXPATHLEN, NAME_LEN},
    prelude::*,
};

/// Looks up a single component in `dir`.
///
/// `"."` resolves to `dir` itself; everything else, `".."` included, is
/// delegated to the filesystem.
pub fn lookup(dir: &Arc<dyn Vnode>, name: &str) -> Result<Arc<dyn Vnode>> {
    if !dir.kind().is_dir() {
        return_errno_with_message!(Errno::ENOTDIR, "lookup in a non-directory");
    }
    if name == "." {
        return Ok(dir.clone());
    }
    dir.lookup(name)
}

/// Resolves all but the final component of `path`, returning the parent
/// directory and the final component's name.
///
/// A leading `/` starts resolution at the root; otherwise resolution starts
/// at `base` if given, else at the current process's working directory.
/// Runs of `/` separate components. A path consisting only of slashes
/// resolves to the start directory with `"."` as the final component.
pub fn dir_namev(path: &str, base: Option<&Arc<dyn Vnode>>) -> Result<(Arc<dyn Vnode>, String)> {
    if path.is_empty() {
        return_errno_with_message!(Errno::EINVAL, "empty path");
    }
    if path.len() > MAXPATHLEN {
        return_errno_with_message!(Errno::ENAMETOOLONG, "path too long");
    }

    let mut dir: Arc<dyn Vnode> = if path.starts_with('/') {
        rootfs::root_vnode()
    } else if let Some(base) = base {
        base.clone()
    } else {
        current!().cwd()
    };

    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let Some((name, parents)) = components.split_last() else {
        return Ok((dir, String::from(".")));
    };

    for component in parents {
        if component.len() > NAME_LEN {
            return_errno_with_message!(Errno::ENAMETOOLONG, "path component too long");
        }
        dir = lookup(&dir, component)?;
    }

    if name.len() > NAME_LEN {
        return_errno_with_message!(Errno::ENAMETOOLONG, "path component too long");
    }
    if !dir.kind().is_dir() {
        return_errno_with_message!(Errno::ENOTDIR, "path prefix is not a directory");
    }
    Ok((dir, String::from(*name)))
}

/// Resolves `path` to a vnode. If the final component is missing and
/// `create` is set, a regular file is created in the parent directory.
///
/// Device special-casing deliberately does not live here; `do_open` checks
/// for a backing driver itself.
pub fn open_namev(
    path: &str,
    create: bool,
    base: Option<&Arc<dyn Vnode>>,
) -> Result<Arc<dyn Vnode>> {
    let (parent, name) = dir_namev(path, base)?;
    match lookup(&parent, &name) {
        Ok(vnode) => Ok(vnode),
        Err(e) if e.error() == Errno::ENOENT && create => parent.create(&name),
        Err(e) => Err(e),
    }
}
