// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{AtomicUsize, Ordering};

use super::mmobj::MmObj;
use crate::{
    mm::pframe::{pframe_get, PFrame, PageSet},
    prelude::*,
};

/// Live anonymous-object count, kept for verification.
static ANON_COUNT: AtomicUsize = AtomicUsize::new(0);

pub fn anon_count() -> usize {
    ANON_COUNT.load(Ordering::SeqCst)
}

/// A memory object of zero-initialized pages with no backing store.
pub struct AnonObj {
    pages: PageSet,
}

impl AnonObj {
    pub fn new() -> Arc<Self> {
        ANON_COUNT.fetch_add(1, Ordering::SeqCst);
        Arc::new(AnonObj {
            pages: PageSet::new(),
        })
    }
}

impl MmObj for AnonObj {
    fn pages(&self) -> &PageSet {
        &self.pages
    }

    fn lookup_page(self: Arc<Self>, pagenum: usize, _for_write: bool) -> Result<Arc<PFrame>> {
        let obj: Arc<dyn MmObj> = self;
        pframe_get(&obj, pagenum)
    }

    fn fill_page(&self, frame: &PFrame) -> Result<()> {
        frame.with_data(|data| data.fill(0));
        Ok(())
    }

    // No backing store: pages cannot be cleaned or re-fetched, so dirtying
    // and cleaning are no-ops.
    fn dirty_page(&self, _frame: &PFrame) -> Result<()> {
        Ok(())
    }

    fn clean_page(&self, _frame: &PFrame) -> Result<()> {
        Ok(())
    }
}

impl Drop for AnonObj {
    fn drop(&mut self) {
        ANON_COUNT.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) fn reset_anon_count() {
    ANON_COUNT.store(0, Ordering::SeqCst);
}
