// SPDX-License-Identifier: MPL-2.0

//! The global pid-to-process table and the pid allocator.

use super::{Pid, Process};
use crate::{config::PROC_MAX_COUNT, prelude::*};

static PROCESS_TABLE: SpinLock<BTreeMap<Pid, Arc<Process>>> = SpinLock::new(BTreeMap::new());
static NEXT_PID: SpinLock<Pid> = SpinLock::new(0);

/// Gets a process by pid.
pub fn get_process(pid: Pid) -> Option<Arc<Process>> {
    PROCESS_TABLE.lock().get(&pid).cloned()
}

/// Gets the init process (pid 1), the reparenting sink for orphans.
pub fn init_process() -> Option<Arc<Process>> {
    get_process(super::PID_INIT)
}

/// Snapshot of every live process, in pid order.
pub fn processes() -> Vec<Arc<Process>> {
    PROCESS_TABLE.lock().values().cloned().collect()
}

pub fn process_count() -> usize {
    PROCESS_TABLE.lock().len()
}

pub(crate) fn table_mut() -> SpinLockGuard<'static, BTreeMap<Pid, Arc<Process>>> {
    PROCESS_TABLE.lock()
}

pub(crate) fn remove(pid: Pid) -> Option<Arc<Process>> {
    PROCESS_TABLE.lock().remove(&pid)
}

/// Returns the next free pid, sweeping a counter modulo `PROC_MAX_COUNT`
/// and skipping pids that are still live. Fails once every pid is taken.
pub(crate) fn alloc_pid(table: &BTreeMap<Pid, Arc<Process>>) -> Result<Pid> {
    let mut next = NEXT_PID.lock();
    let mut pid = *next;
    loop {
        if !table.contains_key(&pid) {
            *next = (pid + 1) % PROC_MAX_COUNT;
            return Ok(pid);
        }
        pid = (pid + 1) % PROC_MAX_COUNT;
        if pid == *next {
            return_errno_with_message!(Errno::ENOMEM, "out of process ids");
        }
    }
}

pub(crate) fn reset() {
    PROCESS_TABLE.lock().clear();
    *NEXT_PID.lock() = 0;
}
