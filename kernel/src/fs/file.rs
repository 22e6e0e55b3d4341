// SPDX-License-Identifier: MPL-2.0

use super::vnode::Vnode;
use crate::prelude::*;

bitflags! {
    /// Access mode of an open file.
    pub struct FMode: u32 {
        const READ   = 0x1;
        const WRITE  = 0x2;
        const APPEND = 0x4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// An open file: a vnode, a byte offset, and the access mode it was opened
/// with. One `File` may be shared by several descriptors (`dup`, `fork`),
/// which then share the offset.
pub struct File {
    vnode: Arc<dyn Vnode>,
    pos: SpinLock<usize>,
    mode: FMode,
}

impl File {
    pub fn new(vnode: Arc<dyn Vnode>, mode: FMode) -> Arc<Self> {
        Arc::new(File {
            vnode,
            pos: SpinLock::new(0),
            mode,
        })
    }

    pub fn vnode(&self) -> &Arc<dyn Vnode> {
        &self.vnode
    }

    pub fn mode(&self) -> FMode {
        self.mode
    }

    pub fn pos(&self) -> usize {
        *self.pos.lock()
    }

    pub(crate) fn advance(&self, n: usize) {
        *self.pos.lock() += n;
    }

    /// Repositions the offset. A resulting offset below zero is refused
    /// without moving the position.
    pub fn seek(&self, offset: i64, whence: Whence) -> Result<usize> {
        let mut pos = self.pos.lock();
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => *pos as i64,
            Whence::End => self.vnode.len() as i64,
        };
        let new_pos = base + offset;
        if new_pos < 0 {
            return_errno_with_message!(Errno::EINVAL, "seek to a negative offset");
        }
        *pos = new_pos as usize;
        Ok(*pos)
    }
}
