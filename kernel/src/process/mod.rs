// SPDX-License-Identifier: MPL-2.0

//! Processes: creation, lifecycle, wait/reap, and fork.

use crate::prelude::*;

mod exit;
mod fork;
#[allow(clippy::module_inception)]
mod process;
pub mod process_table;
mod wait;

pub use exit::{do_exit, proc_kill, proc_kill_all};
pub use fork::do_fork;
pub use process::{proc_create, ExitCode, ProcState, Process};
pub use wait::do_waitpid;

pub(crate) use exit::{proc_cleanup, thread_exited};

pub type Pid = u32;

/// Pid of the idle process.
pub const PID_IDLE: Pid = 0;
/// Pid of the init process, the reparenting sink for orphans.
pub const PID_INIT: Pid = 1;

/// Returns the current process.
pub fn current() -> Arc<Process> {
    crate::thread::Thread::current().process()
}
