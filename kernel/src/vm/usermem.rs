// SPDX-License-Identifier: MPL-2.0

//! Simulated user-memory access.
//!
//! User loads and stores go through the current process's page directory
//! the way the MMU would: a missing or insufficient mapping raises a page
//! fault, and the access retries once the handler has installed the
//! mapping. An illegal access therefore kills the process rather than
//! returning an error, exactly as it would on hardware.

use super::page_fault::{handle_page_fault, FaultCause};
use crate::{
    config::{addr_to_pn, pn_to_addr},
    mm::pframe::PFrame,
    prelude::*,
    vm::vmmap::Prot,
};

fn touch(vfn: usize, write: bool) -> Arc<PFrame> {
    let current = current!();
    loop {
        if let Some((frame, prot)) = current.page_dir().lookup(vfn) {
            if !write || prot.contains(Prot::WRITE) {
                return frame;
            }
        }
        let mut cause = FaultCause::USER;
        if write {
            cause |= FaultCause::WRITE;
        } else {
            cause |= FaultCause::PRESENT;
        }
        // Kills the process on an illegal access and does not come back.
        handle_page_fault(pn_to_addr(vfn), cause);
    }
}

/// Reads `buf.len()` bytes of user memory at `vaddr`.
pub fn copy_from_user(vaddr: usize, buf: &mut [u8]) {
    let mut done = 0;
    while done < buf.len() {
        let addr = vaddr + done;
        let page_off = addr % PAGE_SIZE;
        let chunk = (PAGE_SIZE - page_off).min(buf.len() - done);
        let frame = touch(addr_to_pn(addr), false);
        frame.with_data(|data| {
            buf[done..done + chunk].copy_from_slice(&data[page_off..page_off + chunk]);
        });
        done += chunk;
    }
}

/// Writes `buf` into user memory at `vaddr`.
pub fn copy_to_user(vaddr: usize, buf: &[u8]) {
    let mut done = 0;
    while done < buf.len() {
        let addr = vaddr + done;
        let page_off = addr % PAGE_SIZE;
        let chunk = (PAGE_SIZE - page_off).min(buf.len() - done);
        let frame = touch(addr_to_pn(addr), true);
        frame.with_data(|data| {
            data[page_off..page_off + chunk].copy_from_slice(&buf[done..done + chunk]);
        });
        done += chunk;
    }
}
