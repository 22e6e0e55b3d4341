// SPDX-License-Identifier: MPL-2.0

use super::mmobj::MmObj;
use crate::{
    fs::vnode::Vnode,
    mm::pframe::{pframe_get, PFrame, PageSet},
    prelude::*,
};

/// The memory object embedded in a file: pages are filled from the
/// filesystem and dirty pages are written back when the object goes away.
/// Holding the pager keeps the vnode alive.
pub struct VnodePager {
    vnode: Arc<dyn Vnode>,
    pages: PageSet,
}

impl VnodePager {
    pub fn new(vnode: Arc<dyn Vnode>) -> Arc<Self> {
        Arc::new(VnodePager {
            vnode,
            pages: PageSet::new(),
        })
    }

    pub fn vnode(&self) -> &Arc<dyn Vnode> {
        &self.vnode
    }
}

impl MmObj for VnodePager {
    fn pages(&self) -> &PageSet {
        &self.pages
    }

    fn lookup_page(self: Arc<Self>, pagenum: usize, _for_write: bool) -> Result<Arc<PFrame>> {
        let obj: Arc<dyn MmObj> = self;
        pframe_get(&obj, pagenum)
    }

    fn fill_page(&self, frame: &PFrame) -> Result<()> {
        frame.with_data(|data| self.vnode.fill_page(frame.pagenum(), data))
    }

    fn dirty_page(&self, frame: &PFrame) -> Result<()> {
        frame.set_dirty();
        self.vnode.dirty_page(frame.pagenum())
    }

    fn clean_page(&self, frame: &PFrame) -> Result<()> {
        frame.with_data(|data| self.vnode.clean_page(frame.pagenum(), data))
    }
}

impl Drop for VnodePager {
    fn drop(&mut self) {
        // Push outstanding dirty pages back into the file.
        for frame in self.pages.frames() {
            if frame.is_dirty() {
                let _ = frame.with_data(|data| self.vnode.clean_page(frame.pagenum(), data));
            }
        }
    }
}
