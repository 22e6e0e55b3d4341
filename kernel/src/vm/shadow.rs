// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{AtomicUsize, Ordering};

use super::mmobj::MmObj;
use crate::{
    mm::pframe::{pframe_get, PFrame, PageSet},
    prelude::*,
};

/// Number of copy-on-write page copies performed, kept for verification.
static COW_COPIES: AtomicUsize = AtomicUsize::new(0);

pub fn cow_copies() -> usize {
    COW_COPIES.load(Ordering::SeqCst)
}

pub(crate) fn reset_cow_copies() {
    COW_COPIES.store(0, Ordering::SeqCst);
}

/// A copy-on-write overlay above another memory object.
///
/// Shadow chains run from the newest object toward the shadowed parent and
/// terminate at a non-shadow bottom object; chains are acyclic by
/// construction since the parent is fixed at creation. A page read finds
/// the nearest copy down the chain; the first write to a page copies it
/// into the topmost shadow.
pub struct ShadowObj {
    pages: PageSet,
    shadowed: Arc<dyn MmObj>,
}

impl ShadowObj {
    pub fn new(shadowed: Arc<dyn MmObj>) -> Arc<Self> {
        Arc::new(ShadowObj {
            pages: PageSet::new(),
            shadowed,
        })
    }

    /// The non-shadow root of this chain.
    pub fn bottom(self: &Arc<Self>) -> Arc<dyn MmObj> {
        let obj: Arc<dyn MmObj> = self.clone();
        super::mmobj::bottom_object(&obj)
    }
}

impl MmObj for ShadowObj {
    fn pages(&self) -> &PageSet {
        &self.pages
    }

    fn lookup_page(self: Arc<Self>, pagenum: usize, for_write: bool) -> Result<Arc<PFrame>> {
        if for_write {
            // Materialize the page in this object; `fill_page` performs the
            // copy from an ancestor if it is not already here.
            let obj: Arc<dyn MmObj> = self;
            return pframe_get(&obj, pagenum);
        }

        // Read path: nearest resident copy, walking shadow by shadow; a
        // page resident nowhere in the chain comes from the bottom object.
        let mut cursor: Arc<dyn MmObj> = self;
        loop {
            if let Some(frame) = crate::mm::pframe_get_resident(&cursor, pagenum) {
                return Ok(frame);
            }
            match cursor.shadowed() {
                Some(below) => cursor = below,
                None => return pframe_get(&cursor, pagenum),
            }
        }
    }

    /// The copy step of copy-on-write: fill the new topmost frame from the
    /// nearest ancestor holding this page.
    fn fill_page(&self, frame: &PFrame) -> Result<()> {
        let src = self
            .shadowed
            .clone()
            .lookup_page(frame.pagenum(), false)?;
        frame.copy_from(&src);
        frame.set_dirty();
        COW_COPIES.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dirty_page(&self, frame: &PFrame) -> Result<()> {
        frame.set_dirty();
        Ok(())
    }

    // Shadow pages never go back to the file; private changes die with the
    // object.
    fn clean_page(&self, _frame: &PFrame) -> Result<()> {
        Ok(())
    }

    fn shadowed(&self) -> Option<Arc<dyn MmObj>> {
        Some(self.shadowed.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::anon::AnonObj;
    use crate::vm::mmobj::bottom_object;

    fn fill_via(obj: &Arc<dyn MmObj>, pagenum: usize, byte: u8) {
        let frame = pframe_get(obj, pagenum).unwrap();
        frame.with_data(|data| data.fill(byte));
    }

    fn first_byte(frame: &Arc<crate::mm::pframe::PFrame>) -> u8 {
        frame.with_data(|data| data[0])
    }

    #[test]
    fn anon_pages_are_zero_filled() {
        let obj: Arc<dyn MmObj> = AnonObj::new();
        let frame = pframe_get(&obj, 3).unwrap();
        assert_eq!(frame.pagenum(), 3);
        assert!(frame.with_data(|data| data.iter().all(|b| *b == 0)));
        assert_eq!(obj.pages().len(), 1);
    }

    #[test]
    fn read_lookup_walks_to_nearest_copy() {
        let bottom: Arc<dyn MmObj> = AnonObj::new();
        fill_via(&bottom, 0, 0x11);
        let lower = ShadowObj::new(bottom.clone());
        let upper = ShadowObj::new(lower.clone());

        // Nothing resident in either shadow: the read falls through to the
        // bottom object without copying anything.
        let frame = upper.clone().lookup_page(0, false).unwrap();
        assert_eq!(first_byte(&frame), 0x11);
        assert_eq!(upper.pages().len(), 0);
        assert_eq!(lower.pages().len(), 0);

        // A copy resident in the middle of the chain wins over the bottom.
        let lower_dyn: Arc<dyn MmObj> = lower.clone();
        let copy = pframe_get(&lower_dyn, 0).unwrap();
        copy.with_data(|data| data.fill(0x22));
        let frame = upper.clone().lookup_page(0, false).unwrap();
        assert_eq!(first_byte(&frame), 0x22);
        assert_eq!(upper.pages().len(), 0);
    }

    #[test]
    fn write_lookup_copies_into_topmost_shadow() {
        let bottom: Arc<dyn MmObj> = AnonObj::new();
        fill_via(&bottom, 2, 0xAA);
        let shadow = ShadowObj::new(bottom.clone());

        let frame = shadow.clone().lookup_page(2, true).unwrap();
        assert_eq!(first_byte(&frame), 0xAA);
        assert!(frame.is_dirty());
        assert_eq!(shadow.pages().len(), 1);

        // Writes to the copy stay in the shadow.
        frame.with_data(|data| data.fill(0xBB));
        let below = pframe_get(&bottom, 2).unwrap();
        assert_eq!(first_byte(&below), 0xAA);

        // A second write lookup reuses the copy.
        let again = shadow.clone().lookup_page(2, true).unwrap();
        assert!(Arc::ptr_eq(&frame, &again));
    }

    #[test]
    fn bottom_object_is_the_chain_root() {
        let bottom: Arc<dyn MmObj> = AnonObj::new();
        let lower = ShadowObj::new(bottom.clone());
        let upper: Arc<dyn MmObj> = ShadowObj::new(lower);
        let root = bottom_object(&upper);
        assert!(Arc::ptr_eq(&root, &bottom));
    }
}
