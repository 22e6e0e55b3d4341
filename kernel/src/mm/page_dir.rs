// SPDX-License-Identifier: MPL-2.0

//! The per-process page directory.
//!
//! This stands in for the hardware page tables: an ordered map from virtual
//! frame number to (frame, protection). The user-memory access layer walks
//! it the way the MMU would, and the page-fault handler installs mappings
//! into it. Frames are pinned while installed.

use super::pframe::PFrame;
use crate::{prelude::*, vm::vmmap::Prot};

struct PtEntry {
    frame: Arc<PFrame>,
    prot: Prot,
}

pub struct PageDir {
    entries: SpinLock<BTreeMap<usize, PtEntry>>,
}

impl PageDir {
    pub fn new() -> Self {
        Self {
            entries: SpinLock::new(BTreeMap::new()),
        }
    }

    /// Installs a mapping from `vfn` to `frame` with protection `prot`,
    /// replacing any previous mapping of that page.
    pub fn map(&self, vfn: usize, frame: Arc<PFrame>, prot: Prot) {
        frame.pin();
        let old = self.entries.lock().insert(vfn, PtEntry { frame, prot });
        if let Some(old) = old {
            old.frame.unpin();
        }
    }

    pub fn unmap(&self, vfn: usize) {
        if let Some(old) = self.entries.lock().remove(&vfn) {
            old.frame.unpin();
        }
    }

    pub fn unmap_range(&self, lovfn: usize, npages: usize) {
        let mut entries = self.entries.lock();
        let victims: Vec<usize> = entries
            .range(lovfn..lovfn + npages)
            .map(|(vfn, _)| *vfn)
            .collect();
        for vfn in victims {
            if let Some(old) = entries.remove(&vfn) {
                old.frame.unpin();
            }
        }
    }

    /// Drops every mapping; used when an address space goes away and by
    /// fork, which forces the parent to re-fault everything.
    pub fn unmap_all(&self) {
        let mut entries = self.entries.lock();
        for (_, entry) in core::mem::take(&mut *entries) {
            entry.frame.unpin();
        }
    }

    pub fn lookup(&self, vfn: usize) -> Option<(Arc<PFrame>, Prot)> {
        let entries = self.entries.lock();
        let entry = entries.get(&vfn)?;
        Some((entry.frame.clone(), entry.prot))
    }

    pub fn mapping_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Nothing to do on the simulated MMU; mappings take effect at once.
    pub fn flush_tlb(&self) {}
}

impl Default for PageDir {
    fn default() -> Self {
        Self::new()
    }
}
