// SPDX-License-Identifier: MPL-2.0

//! The user page-fault handler.

use super::vmmap::Prot;
use crate::{config::addr_to_pn, prelude::*, process};

bitflags! {
    /// Why a fault happened.
    pub struct FaultCause: u32 {
        const PRESENT  = 0x01;
        const WRITE    = 0x02;
        const EXEC     = 0x04;
        const USER     = 0x08;
        const RESERVED = 0x10;
    }
}

/// Handles a user-mode fault at `vaddr`.
///
/// The faulting page must lie in a mapped area whose protections satisfy
/// the fault cause; otherwise the current process is killed with `EFAULT`.
/// On success the page's frame is resolved through the area's memory
/// object (copying into the topmost shadow on a private write) and
/// installed in the page directory. Mappings installed for reads are
/// write-protected even in writable areas, so the first write faults again
/// and takes the copy-on-write path.
pub fn handle_page_fault(vaddr: usize, cause: FaultCause) {
    let vfn = addr_to_pn(vaddr);
    let current = current!();

    let looked_up = {
        let vmmap = current.vmmap().lock();
        vmmap.lookup(vfn).map(|area| {
            (
                area.prot(),
                area.obj().cloned(),
                area.obj_pagenum(vfn),
            )
        })
    };

    let Some((prot, obj, pagenum)) = looked_up else {
        warn!("fault at unmapped address {:#x}", vaddr);
        process::proc_kill(&current, Errno::EFAULT.as_i32());
        return;
    };

    let allowed = !(cause.contains(FaultCause::WRITE) && !prot.contains(Prot::WRITE)
        || cause.contains(FaultCause::EXEC) && !prot.contains(Prot::EXEC)
        || cause.contains(FaultCause::PRESENT) && !prot.contains(Prot::READ)
        || cause.contains(FaultCause::RESERVED) && prot.is_empty());
    if !allowed {
        warn!("fault at {:#x} violates protections {:?}", vaddr, prot);
        process::proc_kill(&current, Errno::EFAULT.as_i32());
        return;
    }

    let Some(obj) = obj else {
        process::proc_kill(&current, Errno::EFAULT.as_i32());
        return;
    };

    let for_write = cause.contains(FaultCause::WRITE);
    let frame = match obj.lookup_page(pagenum, for_write) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("fault at {:#x}: no page ({:?})", vaddr, e.error());
            process::proc_kill(&current, Errno::EFAULT.as_i32());
            return;
        }
    };

    if for_write {
        frame.set_dirty();
    }

    let mapped_prot = if for_write { prot } else { prot - Prot::WRITE };
    current.page_dir().map(vfn, frame, mapped_prot);
    current.page_dir().flush_tlb();
}
