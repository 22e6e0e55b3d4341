// SPDX-License-Identifier: MPL-2.0

use crate::{
    mm::pframe::{PFrame, PageSet},
    prelude::*,
};

/// A reference-counted provider of pages.
///
/// Concrete kinds: anonymous (zero fill), shadow (copy-on-write overlay),
/// and vnode-backed (file pages). Ownership is shared through `Arc`; when
/// the last handle drops, the object's resident pages go with it.
pub trait MmObj: Any + Send + Sync {
    /// The object's resident pages.
    fn pages(&self) -> &PageSet;

    /// Finds the frame for `pagenum`. For shadow objects a read lookup
    /// walks the chain toward the bottom object and returns the nearest
    /// resident page, while a write lookup materializes the page in this
    /// object (copying from an ancestor if needed).
    fn lookup_page(self: Arc<Self>, pagenum: usize, for_write: bool) -> Result<Arc<PFrame>>;

    /// Fills a freshly allocated frame with this object's data for the
    /// frame's page number.
    fn fill_page(&self, frame: &PFrame) -> Result<()>;

    /// Notes that a frame of this object has been written.
    fn dirty_page(&self, frame: &PFrame) -> Result<()>;

    /// Pushes a dirty frame back to the backing store, if there is one.
    fn clean_page(&self, frame: &PFrame) -> Result<()>;

    /// The object this one shadows, if it is a shadow object.
    fn shadowed(&self) -> Option<Arc<dyn MmObj>> {
        None
    }
}

/// Walks a shadow chain to its non-shadow root. For any other object this
/// is the object itself.
pub fn bottom_object(obj: &Arc<dyn MmObj>) -> Arc<dyn MmObj> {
    let mut cursor = obj.clone();
    while let Some(below) = cursor.shadowed() {
        cursor = below;
    }
    cursor
}
