// SPDX-License-Identifier: MPL-2.0

//! Address-space maps.
//!
//! A `VmMap` is the ordered set of `VmArea`s making up one process's user
//! address space. Areas are disjoint half-open ranges of virtual frame
//! numbers, each backed by a memory object at a page offset.

use super::{anon::AnonObj, mmobj::MmObj, shadow::ShadowObj};
use crate::{
    config::{addr_to_pn, USER_MEM_HIGH, USER_MEM_LOW},
    fs::vnode::Vnode,
    mm::pframe::pframe_get,
    prelude::*,
};

bitflags! {
    /// Page protections of one area. `PROT_NONE` is the empty set.
    pub struct Prot: u32 {
        const READ  = 0x1;
        const WRITE = 0x2;
        const EXEC  = 0x4;
    }
}

bitflags! {
    pub struct MapFlags: u32 {
        const SHARED  = 0x1;
        const PRIVATE = 0x2;
    }
}

/// Direction of a first-fit gap search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDir {
    /// Lowest usable gap.
    LoHi,
    /// Highest usable gap.
    HiLo,
}

/// A contiguous, protection-homogeneous region of an address space:
/// virtual frames `[start, end)` backed by `obj` starting at page `off`.
pub struct VmArea {
    start: usize,
    end: usize,
    off: usize,
    prot: Prot,
    flags: MapFlags,
    obj: Option<Arc<dyn MmObj>>,
}

impl VmArea {
    pub fn new(
        start: usize,
        end: usize,
        off: usize,
        prot: Prot,
        flags: MapFlags,
        obj: Option<Arc<dyn MmObj>>,
    ) -> Self {
        Self {
            start,
            end,
            off,
            prot,
            flags,
            obj,
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn npages(&self) -> usize {
        self.end - self.start
    }

    pub fn off(&self) -> usize {
        self.off
    }

    pub fn prot(&self) -> Prot {
        self.prot
    }

    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    pub fn contains(&self, vfn: usize) -> bool {
        self.start <= vfn && vfn < self.end
    }

    pub fn obj(&self) -> Option<&Arc<dyn MmObj>> {
        self.obj.as_ref()
    }

    pub fn set_obj(&mut self, obj: Arc<dyn MmObj>) {
        self.obj = Some(obj);
    }

    /// Page number within the backing object of the page mapped at `vfn`.
    pub fn obj_pagenum(&self, vfn: usize) -> usize {
        debug_assert!(self.contains(vfn));
        vfn - self.start + self.off
    }
}

pub struct VmMap {
    areas: BTreeMap<usize, VmArea>,
}

impl VmMap {
    pub fn new() -> Self {
        Self {
            areas: BTreeMap::new(),
        }
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    pub fn areas(&self) -> impl Iterator<Item = &VmArea> {
        self.areas.values()
    }

    pub fn areas_mut(&mut self) -> impl Iterator<Item = &mut VmArea> {
        self.areas.values_mut()
    }

    /// Inserts an area, keeping areas sorted by start. The area must lie in
    /// the user range and must not overlap an existing area.
    pub fn insert(&mut self, area: VmArea) {
        assert!(area.start < area.end);
        assert!(addr_to_pn(USER_MEM_LOW) <= area.start);
        assert!(area.end <= addr_to_pn(USER_MEM_HIGH));
        assert!(
            self.is_range_empty(area.start, area.npages()),
            "overlapping address-space areas"
        );
        self.areas.insert(area.start, area);
    }

    /// First-fit search for a gap of `npages` free virtual frames. `LoHi`
    /// returns the lowest such gap, `HiLo` the highest.
    pub fn find_range(&self, npages: usize, dir: SearchDir) -> Option<usize> {
        assert!(npages > 0);
        let lo = addr_to_pn(USER_MEM_LOW);
        let hi = addr_to_pn(USER_MEM_HIGH);
        match dir {
            SearchDir::LoHi => {
                let mut cursor = lo;
                for area in self.areas.values() {
                    if area.start >= cursor && area.start - cursor >= npages {
                        return Some(cursor);
                    }
                    cursor = cursor.max(area.end);
                }
                (hi - cursor >= npages).then_some(cursor)
            }
            SearchDir::HiLo => {
                let mut cursor = hi;
                for area in self.areas.values().rev() {
                    if cursor >= area.end && cursor - area.end >= npages {
                        return Some(cursor - npages);
                    }
                    cursor = cursor.min(area.start);
                }
                (cursor >= lo && cursor - lo >= npages).then(|| cursor - npages)
            }
        }
    }

    /// The area containing `vfn`, if any.
    pub fn lookup(&self, vfn: usize) -> Option<&VmArea> {
        self.areas
            .range(..=vfn)
            .next_back()
            .map(|(_, area)| area)
            .filter(|area| area.contains(vfn))
    }

    /// True iff no area overlaps `[startvfn, startvfn + npages)`.
    pub fn is_range_empty(&self, startvfn: usize, npages: usize) -> bool {
        let endvfn = startvfn + npages;
        self.areas
            .values()
            .all(|area| area.end <= startvfn || area.start >= endvfn)
    }

    /// Creates a mapping of `npages` pages.
    ///
    /// With `lopage == 0` the placement is chosen by `find_range`;
    /// otherwise the range is forced, unmapping whatever it overlaps. A
    /// `None` file maps zero-filled memory; otherwise the vnode provides
    /// the backing object. Private mappings wrap the backing object in a
    /// fresh shadow so writes never reach it. Returns the starting frame.
    #[allow(clippy::too_many_arguments)]
    pub fn map(
        &mut self,
        file: Option<&Arc<dyn Vnode>>,
        lopage: usize,
        npages: usize,
        prot: Prot,
        flags: MapFlags,
        off: usize,
        dir: SearchDir,
    ) -> Result<usize> {
        assert!(npages > 0);
        assert!(flags.contains(MapFlags::SHARED) || flags.contains(MapFlags::PRIVATE));

        let start = if lopage == 0 {
            self.find_range(npages, dir)
                .ok_or(Error::with_message(Errno::ENOMEM, "address space full"))?
        } else {
            if !self.is_range_empty(lopage, npages) {
                self.remove(lopage, npages)?;
            }
            lopage
        };

        let backing: Arc<dyn MmObj> = match file {
            None => AnonObj::new(),
            Some(vnode) => vnode.clone().mmap()?,
        };
        let obj: Arc<dyn MmObj> = if flags.contains(MapFlags::PRIVATE) {
            ShadowObj::new(backing)
        } else {
            backing
        };

        self.insert(VmArea::new(start, start + npages, off, prot, flags, Some(obj)));
        Ok(start)
    }

    /// Unmaps `[lopage, lopage + npages)`. Each overlapping area is either
    /// split in two, trimmed on one side (adjusting the object offset when
    /// its start moves), or removed whole.
    pub fn remove(&mut self, lopage: usize, npages: usize) -> Result<()> {
        let hipage = lopage + npages;
        let overlapping: Vec<usize> = self
            .areas
            .values()
            .filter(|area| area.start < hipage && area.end > lopage)
            .map(|area| area.start)
            .collect();

        for start in overlapping {
            let area = self.areas.remove(&start).expect("area vanished");
            if area.start < lopage && area.end > hipage {
                // The range is strictly inside: split into two areas that
                // share the backing object.
                let right = VmArea::new(
                    hipage,
                    area.end,
                    area.off + (hipage - area.start),
                    area.prot,
                    area.flags,
                    area.obj.clone(),
                );
                let left = VmArea::new(area.start, lopage, area.off, area.prot, area.flags, area.obj);
                self.areas.insert(left.start, left);
                self.areas.insert(right.start, right);
            } else if area.start < lopage {
                // Overlaps the tail: shorten the area.
                let left = VmArea::new(area.start, lopage, area.off, area.prot, area.flags, area.obj);
                self.areas.insert(left.start, left);
            } else if area.end > hipage {
                // Overlaps the head: move the start and the object offset.
                let right = VmArea::new(
                    hipage,
                    area.end,
                    area.off + (hipage - area.start),
                    area.prot,
                    area.flags,
                    area.obj,
                );
                self.areas.insert(right.start, right);
            }
            // Fully covered: the area is simply gone, releasing its object.
        }
        Ok(())
    }

    /// A structural copy for fork: the same areas with no backing objects;
    /// the caller wires up objects afterwards.
    pub fn clone_structure(&self) -> VmMap {
        let mut clone = VmMap::new();
        for area in self.areas.values() {
            clone.areas.insert(
                area.start,
                VmArea::new(area.start, area.end, area.off, area.prot, area.flags, None),
            );
        }
        clone
    }

    pub fn clear(&mut self) {
        self.areas.clear();
    }

    /// Copies `buf.len()` bytes out of the address space starting at
    /// virtual address `vaddr`, going through the backing objects without
    /// any permission checks.
    pub fn read(&self, vaddr: usize, buf: &mut [u8]) -> Result<()> {
        self.for_each_page(vaddr, buf.len(), |frame, page_off, chunk_range| {
            let (start, len) = chunk_range;
            frame.with_data(|data| {
                buf[start..start + len].copy_from_slice(&data[page_off..page_off + len]);
            });
            Ok(())
        })
    }

    /// Copies `buf` into the address space starting at `vaddr`, dirtying
    /// every touched page.
    pub fn write(&self, vaddr: usize, buf: &[u8]) -> Result<()> {
        self.for_each_page(vaddr, buf.len(), |frame, page_off, chunk_range| {
            let (start, len) = chunk_range;
            frame.with_data(|data| {
                data[page_off..page_off + len].copy_from_slice(&buf[start..start + len]);
            });
            frame.set_dirty();
            if let Some(obj) = frame.object() {
                obj.dirty_page(&frame)?;
            }
            Ok(())
        })
    }

    fn for_each_page(
        &self,
        vaddr: usize,
        len: usize,
        mut f: impl FnMut(Arc<crate::mm::pframe::PFrame>, usize, (usize, usize)) -> Result<()>,
    ) -> Result<()> {
        let mut done = 0;
        while done < len {
            let addr = vaddr + done;
            let vfn = addr_to_pn(addr);
            let page_off = addr % PAGE_SIZE;
            let chunk = (PAGE_SIZE - page_off).min(len - done);

            let area = self
                .lookup(vfn)
                .ok_or(Error::with_message(Errno::EFAULT, "unmapped address"))?;
            let obj = area
                .obj()
                .ok_or(Error::with_message(Errno::EFAULT, "area without an object"))?;
            let frame = pframe_get(obj, area.obj_pagenum(vfn))?;
            f(frame, page_off, (done, chunk))?;
            done += chunk;
        }
        Ok(())
    }
}

impl Default for VmMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LO: usize = addr_to_pn(USER_MEM_LOW);
    const HI: usize = addr_to_pn(USER_MEM_HIGH);

    fn anon_area(start: usize, end: usize, off: usize) -> VmArea {
        let obj: Arc<dyn MmObj> = AnonObj::new();
        VmArea::new(
            start,
            end,
            off,
            Prot::READ | Prot::WRITE,
            MapFlags::PRIVATE,
            Some(obj),
        )
    }

    #[test]
    fn insert_keeps_areas_sorted() {
        let mut map = VmMap::new();
        map.insert(anon_area(LO + 20, LO + 30, 0));
        map.insert(anon_area(LO, LO + 10, 0));
        map.insert(anon_area(LO + 40, LO + 50, 0));
        let starts: Vec<usize> = map.areas().map(|a| a.start()).collect();
        assert_eq!(starts, vec![LO, LO + 20, LO + 40]);
    }

    #[test]
    #[should_panic(expected = "overlapping")]
    fn insert_rejects_overlap() {
        let mut map = VmMap::new();
        map.insert(anon_area(LO, LO + 10, 0));
        map.insert(anon_area(LO + 5, LO + 15, 0));
    }

    #[test]
    fn lookup_finds_containing_area() {
        let mut map = VmMap::new();
        map.insert(anon_area(LO + 10, LO + 20, 0));
        assert!(map.lookup(LO + 9).is_none());
        assert_eq!(map.lookup(LO + 10).unwrap().start(), LO + 10);
        assert_eq!(map.lookup(LO + 19).unwrap().start(), LO + 10);
        assert!(map.lookup(LO + 20).is_none());
    }

    #[test]
    fn range_emptiness() {
        let mut map = VmMap::new();
        map.insert(anon_area(LO + 10, LO + 20, 0));
        assert!(map.is_range_empty(LO, 10));
        assert!(map.is_range_empty(LO + 20, 5));
        assert!(!map.is_range_empty(LO + 15, 1));
        assert!(!map.is_range_empty(LO + 5, 10));
    }

    #[test]
    fn find_range_first_fit_low() {
        let mut map = VmMap::new();
        assert_eq!(map.find_range(4, SearchDir::LoHi), Some(LO));
        map.insert(anon_area(LO, LO + 4, 0));
        map.insert(anon_area(LO + 8, LO + 12, 0));
        // The four-page hole between the areas is the first fit.
        assert_eq!(map.find_range(4, SearchDir::LoHi), Some(LO + 4));
        assert_eq!(map.find_range(5, SearchDir::LoHi), Some(LO + 12));
    }

    #[test]
    fn find_range_first_fit_high() {
        let mut map = VmMap::new();
        assert_eq!(map.find_range(4, SearchDir::HiLo), Some(HI - 4));
        map.insert(anon_area(HI - 4, HI, 0));
        map.insert(anon_area(HI - 12, HI - 8, 0));
        assert_eq!(map.find_range(4, SearchDir::HiLo), Some(HI - 8));
        assert_eq!(map.find_range(5, SearchDir::HiLo), Some(HI - 17));
    }

    #[test]
    fn find_range_full_space() {
        let mut map = VmMap::new();
        map.insert(anon_area(LO, HI, 0));
        assert_eq!(map.find_range(1, SearchDir::LoHi), None);
        assert_eq!(map.find_range(1, SearchDir::HiLo), None);
    }

    #[test]
    fn remove_splits_containing_area() {
        let mut map = VmMap::new();
        map.insert(anon_area(LO, LO + 10, 0));
        map.remove(LO + 3, 4).unwrap();
        let areas: Vec<(usize, usize, usize)> =
            map.areas().map(|a| (a.start(), a.end(), a.off())).collect();
        assert_eq!(areas, vec![(LO, LO + 3, 0), (LO + 7, LO + 10, 7)]);
        // Both halves keep the same backing object.
        let objs: Vec<_> = map.areas().map(|a| a.obj().unwrap().clone()).collect();
        assert!(Arc::ptr_eq(&objs[0], &objs[1]));
    }

    #[test]
    fn remove_trims_tail() {
        let mut map = VmMap::new();
        map.insert(anon_area(LO, LO + 10, 2));
        map.remove(LO + 6, 10).unwrap();
        let areas: Vec<(usize, usize, usize)> =
            map.areas().map(|a| (a.start(), a.end(), a.off())).collect();
        assert_eq!(areas, vec![(LO, LO + 6, 2)]);
    }

    #[test]
    fn remove_trims_head_and_moves_offset() {
        let mut map = VmMap::new();
        map.insert(anon_area(LO + 4, LO + 14, 0));
        map.remove(LO, 8).unwrap();
        let areas: Vec<(usize, usize, usize)> =
            map.areas().map(|a| (a.start(), a.end(), a.off())).collect();
        assert_eq!(areas, vec![(LO + 8, LO + 14, 4)]);
    }

    #[test]
    fn remove_drops_covered_area() {
        let mut map = VmMap::new();
        map.insert(anon_area(LO + 2, LO + 4, 0));
        map.insert(anon_area(LO + 6, LO + 8, 0));
        map.remove(LO, 10).unwrap();
        assert_eq!(map.area_count(), 0);
    }

    #[test]
    fn map_private_wraps_backing_in_shadow() {
        let mut map = VmMap::new();
        let start = map
            .map(
                None,
                0,
                4,
                Prot::READ | Prot::WRITE,
                MapFlags::PRIVATE,
                0,
                SearchDir::LoHi,
            )
            .unwrap();
        assert_eq!(start, LO);
        let area = map.lookup(start).unwrap();
        let obj = area.obj().unwrap();
        assert!(obj.shadowed().is_some());
        assert!(super::super::mmobj::bottom_object(obj).shadowed().is_none());
    }

    #[test]
    fn map_shared_uses_backing_directly() {
        let mut map = VmMap::new();
        let start = map
            .map(
                None,
                0,
                4,
                Prot::READ | Prot::WRITE,
                MapFlags::SHARED,
                0,
                SearchDir::LoHi,
            )
            .unwrap();
        let area = map.lookup(start).unwrap();
        assert!(area.obj().unwrap().shadowed().is_none());
    }

    #[test]
    fn map_forced_range_replaces_existing_mapping() {
        let mut map = VmMap::new();
        map.insert(anon_area(LO, LO + 8, 0));
        let start = map
            .map(
                None,
                LO + 2,
                4,
                Prot::READ,
                MapFlags::SHARED,
                0,
                SearchDir::LoHi,
            )
            .unwrap();
        assert_eq!(start, LO + 2);
        let starts: Vec<(usize, usize)> = map.areas().map(|a| (a.start(), a.end())).collect();
        assert_eq!(starts, vec![(LO, LO + 2), (LO + 2, LO + 6), (LO + 6, LO + 8)]);
    }

    #[test]
    fn read_and_write_round_trip() {
        let mut map = VmMap::new();
        let start = map
            .map(
                None,
                0,
                2,
                Prot::READ | Prot::WRITE,
                MapFlags::SHARED,
                0,
                SearchDir::LoHi,
            )
            .unwrap();
        let addr = crate::config::pn_to_addr(start) + PAGE_SIZE - 3;
        // Straddles the page boundary.
        map.write(addr, b"abcdef").unwrap();
        let mut buf = [0u8; 6];
        map.read(addr, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn read_of_unmapped_range_faults() {
        let map = VmMap::new();
        let mut buf = [0u8; 4];
        let err = map.read(USER_MEM_LOW, &mut buf).unwrap_err();
        assert_eq!(err.error(), Errno::EFAULT);
    }
}
