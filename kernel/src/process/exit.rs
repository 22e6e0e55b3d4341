// SPDX-License-Identifier: MPL-2.0

use super::{process_table, ExitCode, Process, PID_IDLE, PID_INIT};
use crate::{prelude::*, sched, thread};

/// Terminates the current process with `status`. Never returns.
pub fn do_exit(status: ExitCode) -> ! {
    thread::kthread_exit(status);
}

/// Called by the thread trampoline once the process's only thread has
/// exited: release what the process can release itself, then hand the CPU
/// away for good. Returns only so the exiting native thread can end.
pub(crate) fn thread_exited(status: ExitCode) {
    proc_cleanup(status);
    sched::exit_switch();
}

/// The half of process teardown that runs on the dying process's own
/// thread: reparent children to init, close files, release the working
/// directory, drop the address space, mark the process dead and wake the
/// parent. The stack and page directory stay alive until the parent reaps.
pub(crate) fn proc_cleanup(status: ExitCode) {
    let current = current!();
    if current.is_dead() {
        return;
    }

    reparent_children(&current);

    let closed = current.files().lock().close_all();
    drop(closed);
    current.release_cwd();

    // Dropping the address space releases the memory objects; the page
    // directory mappings go with it.
    current.page_dir().unmap_all();
    current.vmmap().lock().clear();

    current.set_dead(status);
    debug!("process {} ({}) exited with {}", current.pid(), current.name(), status);

    if let Some(parent) = current.parent() {
        parent.wait_queue().broadcast();
    }
}

/// Moves every child of `process` into init's children list.
pub(crate) fn reparent_children(process: &Arc<Process>) {
    if process.pid() == PID_INIT {
        // Init is the sink; its children stay where they are.
        return;
    }
    let Some(init) = process_table::init_process() else {
        return;
    };
    let mut orphans = BTreeMap::new();
    core::mem::swap(&mut *process.children().lock(), &mut orphans);
    if orphans.is_empty() {
        return;
    }
    let mut init_children = init.children().lock();
    for (pid, child) in orphans {
        trace!("reparenting process {} to init", pid);
        child.set_parent(&init);
        init_children.insert(pid, child);
    }
    // A reparented child may already be dead; let init know.
    init.wait_queue().broadcast();
}

/// Kills `process`, recording `status` as its exit status. On the current
/// process this is `do_exit` and does not return. On any other process its
/// children are reparented at once and every thread is cancelled, so the
/// victim finishes dying at its next cancellation point.
pub fn proc_kill(process: &Arc<Process>, status: ExitCode) {
    if Arc::ptr_eq(process, &current!()) {
        do_exit(status);
    }
    debug!("killing process {} ({})", process.pid(), process.name());
    reparent_children(process);
    let threads: Vec<_> = process.threads().lock().clone();
    for thread in threads {
        thread::kthread_cancel(&thread, status);
    }
}

/// Kills every process except the idle process and its direct children.
/// If the current process qualifies it is killed last, in which case this
/// call does not return.
pub fn proc_kill_all() {
    let current = current!();
    let qualifies = |p: &Arc<Process>| {
        p.pid() != PID_IDLE
            && p.parent().map(|parent| parent.pid()) != Some(PID_IDLE)
    };

    for process in process_table::processes() {
        if Arc::ptr_eq(&process, &current) || !qualifies(&process) {
            continue;
        }
        proc_kill(&process, process.exit_status());
    }
    if qualifies(&current) {
        do_exit(current.exit_status());
    }
}
