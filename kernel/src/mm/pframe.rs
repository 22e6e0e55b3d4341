// SPDX-License-Identifier: MPL-2.0

//! Page frames.
//!
//! A page frame holds one page of data on behalf of a memory object, keyed
//! by (object, page number). A frame being filled is BUSY; anyone else
//! needing it sleeps on the frame's wait queue until the filler finishes.
//! DIRTY frames carry data their backing store has not seen yet, and PINNED
//! frames are installed in some page table.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{prelude::*, sync::WaitQueue, vm::mmobj::MmObj};

bitflags! {
    struct PfFlags: u32 {
        const BUSY  = 0x1;
        const DIRTY = 0x2;
    }
}

pub struct PFrame {
    obj: Weak<dyn MmObj>,
    pagenum: usize,
    data: SpinLock<Box<[u8]>>,
    flags: SpinLock<PfFlags>,
    pincount: AtomicUsize,
    waitq: WaitQueue,
}

impl PFrame {
    pub(crate) fn new(obj: Weak<dyn MmObj>, pagenum: usize) -> Arc<Self> {
        Arc::new(PFrame {
            obj,
            pagenum,
            data: SpinLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()),
            flags: SpinLock::new(PfFlags::empty()),
            pincount: AtomicUsize::new(0),
            waitq: WaitQueue::new(),
        })
    }

    pub fn pagenum(&self) -> usize {
        self.pagenum
    }

    pub fn object(&self) -> Option<Arc<dyn MmObj>> {
        self.obj.upgrade()
    }

    /// Runs `f` over the frame's bytes.
    pub fn with_data<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.data.lock();
        f(&mut data)
    }

    pub fn copy_from(&self, other: &PFrame) {
        let src = other.data.lock();
        let mut dst = self.data.lock();
        dst.copy_from_slice(&src);
    }

    pub fn is_busy(&self) -> bool {
        self.flags.lock().contains(PfFlags::BUSY)
    }

    pub(crate) fn set_busy(&self) {
        self.flags.lock().insert(PfFlags::BUSY);
    }

    /// Clears BUSY and wakes everyone waiting for the fill to finish.
    pub(crate) fn clear_busy(&self) {
        self.flags.lock().remove(PfFlags::BUSY);
        self.waitq.broadcast();
    }

    /// Sleeps until the frame is no longer being filled.
    pub fn wait_not_busy(&self) {
        while self.is_busy() {
            self.waitq.sleep();
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.lock().contains(PfFlags::DIRTY)
    }

    pub fn set_dirty(&self) {
        self.flags.lock().insert(PfFlags::DIRTY);
    }

    pub fn clear_dirty(&self) {
        self.flags.lock().remove(PfFlags::DIRTY);
    }

    pub fn pin(&self) {
        self.pincount.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unpin(&self) {
        let old = self.pincount.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(old > 0);
    }

    pub fn is_pinned(&self) -> bool {
        self.pincount.load(Ordering::SeqCst) > 0
    }
}

/// The resident pages of one memory object.
pub struct PageSet {
    frames: SpinLock<BTreeMap<usize, Arc<PFrame>>>,
}

impl PageSet {
    pub fn new() -> Self {
        Self {
            frames: SpinLock::new(BTreeMap::new()),
        }
    }

    pub fn resident(&self, pagenum: usize) -> Option<Arc<PFrame>> {
        self.frames.lock().get(&pagenum).cloned()
    }

    pub(crate) fn insert(&self, pagenum: usize, frame: Arc<PFrame>) {
        self.frames.lock().insert(pagenum, frame);
    }

    pub(crate) fn remove(&self, pagenum: usize) -> Option<Arc<PFrame>> {
        self.frames.lock().remove(&pagenum)
    }

    /// Number of resident pages.
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn frames(&self) -> Vec<Arc<PFrame>> {
        self.frames.lock().values().cloned().collect()
    }
}

impl Default for PageSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Finds or creates the frame holding page `pagenum` of `obj`, filling it
/// from the object on first touch. Sleeps while someone else is filling it.
pub fn pframe_get(obj: &Arc<dyn MmObj>, pagenum: usize) -> Result<Arc<PFrame>> {
    loop {
        if let Some(frame) = obj.pages().resident(pagenum) {
            if frame.is_busy() {
                frame.wait_not_busy();
                // The filler may have failed and dropped the frame; retry.
                continue;
            }
            return Ok(frame);
        }

        let frame = PFrame::new(Arc::downgrade(obj), pagenum);
        frame.set_busy();
        obj.pages().insert(pagenum, frame.clone());
        match obj.fill_page(&frame) {
            Ok(()) => {
                frame.clear_busy();
                return Ok(frame);
            }
            Err(e) => {
                obj.pages().remove(pagenum);
                frame.clear_busy();
                return Err(e);
            }
        }
    }
}

/// Returns the frame only if it is already resident (and not being filled).
pub fn pframe_get_resident(obj: &Arc<dyn MmObj>, pagenum: usize) -> Option<Arc<PFrame>> {
    let frame = obj.pages().resident(pagenum)?;
    if frame.is_busy() {
        frame.wait_not_busy();
    }
    Some(frame)
}
