// SPDX-License-Identifier: MPL-2.0

//! Kernel bring-up and shutdown.
//!
//! `run_kernel` stands in for the boot sequence: the calling native thread
//! becomes the idle process (pid 0), which mounts the root filesystem,
//! creates the init process (pid 1) running the supplied entry function,
//! and waits for it. Init reaps any orphans reparented to it before
//! exiting, so by the time idle reaps init the process table is empty
//! again and the kernel can be torn down.

use lazy_static::lazy_static;
use std::panic;

use crate::{
    fs::{self, device, rootfs, vnode::VnodeKind},
    prelude::*,
    process::{self, do_waitpid, proc_create, ExitCode, Process},
    sched,
    thread::{self, kthread_create, Thread, ThreadExit},
    vm,
};

lazy_static! {
    /// Serializes kernel instances: the globals support one at a time.
    static ref BOOT_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
}

static PANIC_SLOT: SpinLock<Option<Box<dyn Any + Send>>> = SpinLock::new(None);

/// Stores the payload of a kernel-thread panic so `run_kernel` can re-raise
/// it after shutdown. The first panic wins.
pub(crate) fn record_panic(payload: Box<dyn Any + Send>) {
    let mut slot = PANIC_SLOT.lock();
    if slot.is_none() {
        *slot = Some(payload);
    }
}

fn install_panic_hook() {
    static HOOK: std::sync::Once = std::sync::Once::new();
    HOOK.call_once(|| {
        let default_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            // Thread exit rides on the unwind machinery; it is not a
            // failure and should not be reported as one.
            if info.payload().downcast_ref::<ThreadExit>().is_none() {
                default_hook(info);
            }
        }));
    });
}

fn reset_globals() {
    PANIC_SLOT.lock().take();
    sched::reset();
    thread::reset_tid_allocator();
    process::process_table::reset();
    rootfs::mount_root();
    device::init();
    vm::shadow::reset_cow_copies();
    vm::anon::reset_anon_count();
}

fn populate_dev() {
    fs::do_mkdir("/dev").expect("creating /dev");
    fs::do_mknod("/dev/null", VnodeKind::CharDev(device::MEM_NULL_DEVID))
        .expect("creating /dev/null");
    fs::do_mknod("/dev/zero", VnodeKind::CharDev(device::MEM_ZERO_DEVID))
        .expect("creating /dev/zero");
}

/// Boots the kernel, runs `entry` as the body of the init process, and
/// shuts everything down again. Returns init's exit status.
///
/// A panic on any kernel thread (a failed assertion, say) is re-raised
/// here once the machine is quiet.
pub fn run_kernel<F>(entry: F) -> ExitCode
where
    F: FnOnce() -> ExitCode + Send + 'static,
{
    let _boot_guard = BOOT_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    install_panic_hook();
    reset_globals();

    // The calling native thread becomes the idle process.
    let idle = Process::new_idle();
    let idle_thread = Thread::new_bootstrap(&idle);
    sched::set_current(idle_thread);
    populate_dev();

    let init = proc_create("init").expect("creating the init process");
    let init_pid = init.pid();
    let init_thread = kthread_create(&init, move || {
        let status = entry();
        // Reap whatever was reparented to us before going away.
        while do_waitpid(-1, 0).is_ok() {}
        status
    });
    sched::make_runnable(&init_thread);

    let (reaped, status) = do_waitpid(init_pid as i32, 0).expect("reaping init");
    debug_assert_eq!(reaped, init_pid);

    let panicked = PANIC_SLOT.lock().take();
    if panicked.is_none() {
        debug_assert_eq!(
            process::process_table::process_count(),
            1,
            "processes survived shutdown"
        );
    }

    // Tear the kernel down: release idle's resources and the globals.
    idle.release_cwd();
    process::process_table::reset();
    rootfs::unmount_root();
    sched::reset();
    drop(idle);

    if let Some(payload) = panicked {
        panic::resume_unwind(payload);
    }
    status
}
