// SPDX-License-Identifier: MPL-2.0

use super::{process_table, Pid};
use crate::{
    config::PROC_NAME_LEN,
    fs::{file_table::FileTable, rootfs, vnode::Vnode},
    mm::page_dir::PageDir,
    prelude::*,
    sync::WaitQueue,
    thread::Thread,
    vm::vmmap::VmMap,
};

pub type ExitCode = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Running,
    /// Exited but not yet reaped by the parent.
    Dead,
}

/// A process: the container for one kernel thread's resources.
///
/// A process owns its open files, working directory, address space and page
/// directory, and the list of its children. It is destroyed in two phases:
/// the exiting thread releases what it can (`proc_cleanup`) and the parent
/// frees the rest while reaping in `do_waitpid`.
pub struct Process {
    pid: Pid,
    name: String,

    state: SpinLock<ProcState>,
    exit_status: SpinLock<ExitCode>,
    parent: SpinLock<Weak<Process>>,
    children: SpinLock<BTreeMap<Pid, Arc<Process>>>,
    threads: SpinLock<Vec<Arc<Thread>>>,
    /// Where this process sleeps while waiting for a child to die.
    wait_queue: WaitQueue,

    files: SpinLock<FileTable>,
    cwd: SpinLock<Option<Arc<dyn Vnode>>>,

    vmmap: SpinLock<VmMap>,
    page_dir: Arc<PageDir>,
}

impl Process {
    fn new(pid: Pid, name: &str, parent: Weak<Process>, cwd: Option<Arc<dyn Vnode>>) -> Arc<Self> {
        let mut name = String::from(name);
        name.truncate(PROC_NAME_LEN);
        Arc::new(Process {
            pid,
            name,
            state: SpinLock::new(ProcState::Running),
            exit_status: SpinLock::new(0),
            parent: SpinLock::new(parent),
            children: SpinLock::new(BTreeMap::new()),
            threads: SpinLock::new(Vec::new()),
            wait_queue: WaitQueue::new(),
            files: SpinLock::new(FileTable::new()),
            cwd: SpinLock::new(cwd),
            vmmap: SpinLock::new(VmMap::new()),
            page_dir: Arc::new(PageDir::new()),
        })
    }

    /// Creates the idle process (pid 0) during bring-up. It has no parent
    /// and is never reaped.
    pub(crate) fn new_idle() -> Arc<Self> {
        let mut table = process_table::table_mut();
        let pid = process_table::alloc_pid(&table).expect("pid table full at boot");
        debug_assert_eq!(pid, super::PID_IDLE);
        let idle = Self::new(pid, "idle", Weak::new(), Some(rootfs::root_vnode()));
        table.insert(pid, idle.clone());
        idle
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcState {
        *self.state.lock()
    }

    pub fn is_dead(&self) -> bool {
        self.state() == ProcState::Dead
    }

    pub(crate) fn set_dead(&self, status: ExitCode) {
        *self.state.lock() = ProcState::Dead;
        *self.exit_status.lock() = status;
    }

    pub fn exit_status(&self) -> ExitCode {
        *self.exit_status.lock()
    }

    pub fn parent(&self) -> Option<Arc<Process>> {
        self.parent.lock().upgrade()
    }

    pub(crate) fn set_parent(&self, parent: &Arc<Process>) {
        *self.parent.lock() = Arc::downgrade(parent);
    }

    pub(crate) fn children(&self) -> &SpinLock<BTreeMap<Pid, Arc<Process>>> {
        &self.children
    }

    pub fn has_child(&self, pid: Pid) -> bool {
        self.children.lock().contains_key(&pid)
    }

    pub fn threads(&self) -> &SpinLock<Vec<Arc<Thread>>> {
        &self.threads
    }

    pub fn wait_queue(&self) -> &WaitQueue {
        &self.wait_queue
    }

    pub fn files(&self) -> &SpinLock<FileTable> {
        &self.files
    }

    pub fn cwd(&self) -> Arc<dyn Vnode> {
        self.cwd
            .lock()
            .clone()
            .expect("process has no working directory")
    }

    pub fn set_cwd(&self, cwd: Arc<dyn Vnode>) {
        *self.cwd.lock() = Some(cwd);
    }

    pub(crate) fn release_cwd(&self) {
        self.cwd.lock().take();
    }

    pub fn vmmap(&self) -> &SpinLock<VmMap> {
        &self.vmmap
    }

    pub fn page_dir(&self) -> &Arc<PageDir> {
        &self.page_dir
    }
}

impl Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Creates a process named `name` as a child of the current process.
///
/// The child starts with an empty file table and address space, shares the
/// parent's working directory, and gets a fresh page directory. It has no
/// threads until `kthread_create` gives it one.
pub fn proc_create(name: &str) -> Result<Arc<Process>> {
    let parent = current!();
    let mut table = process_table::table_mut();
    let pid = process_table::alloc_pid(&table)?;
    let child = Process::new(pid, name, Arc::downgrade(&parent), Some(parent.cwd()));
    table.insert(pid, child.clone());
    drop(table);
    parent.children().lock().insert(pid, child.clone());
    debug!("created process {} ({}), parent {}", pid, name, parent.pid());
    Ok(child)
}
