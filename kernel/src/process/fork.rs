// SPDX-License-Identifier: MPL-2.0

use super::{proc_create, ExitCode, Pid};
use crate::{
    prelude::*,
    sched,
    thread::kthread_create,
    vm::{MapFlags, ShadowObj},
};

/// Forks the current process.
///
/// The child receives a copy-on-write image of the parent's address space,
/// shares its open files (one shared `File` per descriptor, positions
/// included) and working directory, and runs `child_entry` on its own
/// kernel thread, the analog of resuming fork's saved register state with
/// a zero return value. Returns the child's pid to the parent.
///
/// Every private area, in both parent and child, gets a fresh shadow
/// object over the former top object, so the first write on either side
/// copies the page instead of sharing it. Shared areas keep referencing
/// the same object. The parent's page-table entries are dropped so its
/// next access re-faults through the new shadows.
pub fn do_fork<F>(child_entry: F) -> Result<Pid>
where
    F: FnOnce() -> ExitCode + Send + 'static,
{
    let parent = current!();
    let child = proc_create(parent.name())?;

    {
        let mut parent_map = parent.vmmap().lock();
        let mut child_map_new = parent_map.clone_structure();

        for (parent_area, child_area) in
            parent_map.areas_mut().zip(child_map_new.areas_mut())
        {
            let obj = parent_area
                .obj()
                .cloned()
                .expect("mapped area without a backing object");
            if parent_area.flags().contains(MapFlags::PRIVATE) {
                let parent_shadow = ShadowObj::new(obj.clone());
                let child_shadow = ShadowObj::new(obj);
                parent_area.set_obj(parent_shadow);
                child_area.set_obj(child_shadow);
            } else {
                child_area.set_obj(obj);
            }
        }

        *child.vmmap().lock() = child_map_new;
    }

    // Force the parent to re-fault every user page so writes go through
    // the new shadow objects.
    parent.page_dir().unmap_all();
    parent.page_dir().flush_tlb();

    *child.files().lock() = parent.files().lock().clone();

    let thread = kthread_create(&child, child_entry);
    sched::make_runnable(&thread);

    debug!("forked process {} from {}", child.pid(), parent.pid());
    Ok(child.pid())
}
