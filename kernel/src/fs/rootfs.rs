// SPDX-License-Identifier: MPL-2.0

use super::{ramfs::RamFs, vnode::Vnode};
use crate::prelude::*;

static ROOT: SpinLock<Option<Arc<dyn Vnode>>> = SpinLock::new(None);

/// Returns the root vnode of the mounted root filesystem.
pub fn root_vnode() -> Arc<dyn Vnode> {
    ROOT.lock()
        .clone()
        .expect("no root filesystem is mounted")
}

/// Mounts a fresh in-memory root filesystem. Called at boot.
pub(crate) fn mount_root() {
    let fs = RamFs::new();
    *ROOT.lock() = Some(fs.root());
}

pub(crate) fn unmount_root() {
    ROOT.lock().take();
}
