// SPDX-License-Identifier: MPL-2.0

//! Kernel threads.
//!
//! A kernel thread runs on its own stack under the cooperative scheduler: it
//! keeps the CPU until it yields, sleeps or exits. Exiting, from whatever
//! call depth, unwinds back to the thread trampoline, which hands the
//! process over to its exit path and dispatches the next runnable thread.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

use crate::{
    config::DEFAULT_STACK_SIZE,
    prelude::*,
    process::{ExitCode, Process},
    sched,
};

mod context;

pub(crate) use context::Context;

pub type Tid = u32;

static TID_ALLOCATOR: AtomicU32 = AtomicU32::new(0);

/// The list of threads sleeping on one wait queue, shared so that
/// cancellation can pull a sleeper out of whatever queue it is on.
pub(crate) type WaiterList = Arc<SpinLock<VecDeque<Arc<Thread>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Created but never made runnable.
    Init,
    /// Currently on the CPU.
    Running,
    /// On the run queue.
    Runnable,
    /// Sleeping on a wait queue.
    Sleeping,
    /// Sleeping on a wait queue, wakeable by cancellation.
    SleepingCancellable,
    /// Finished; waiting to be reaped by the parent process.
    Exited,
}

/// How a sleeping thread was last woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeKind {
    Normal,
    Cancelled,
}

/// The unwind payload used to leave a thread from arbitrary call depth.
pub(crate) struct ThreadExit(pub(crate) ExitCode);

pub struct Thread {
    tid: Tid,
    process: Weak<Process>,
    ctx: Context,
    status: SpinLock<ThreadStatus>,
    cancelled: AtomicBool,
    retval: SpinLock<ExitCode>,
    wchan: SpinLock<Option<WaiterList>>,
    wake: SpinLock<WakeKind>,
    join: SpinLock<Option<JoinHandle<()>>>,
}

impl Thread {
    fn new(process: &Arc<Process>) -> Arc<Self> {
        Arc::new(Thread {
            tid: TID_ALLOCATOR.fetch_add(1, Ordering::SeqCst),
            process: Arc::downgrade(process),
            ctx: Context::new(),
            status: SpinLock::new(ThreadStatus::Init),
            cancelled: AtomicBool::new(false),
            retval: SpinLock::new(0),
            wchan: SpinLock::new(None),
            wake: SpinLock::new(WakeKind::Normal),
            join: SpinLock::new(None),
        })
    }

    /// Binds a thread to the native thread that is bringing the kernel up.
    /// Used only for the idle thread, which is already executing.
    pub(crate) fn new_bootstrap(process: &Arc<Process>) -> Arc<Self> {
        let thread = Self::new(process);
        *thread.status.lock() = ThreadStatus::Running;
        process.threads().lock().push(thread.clone());
        thread
    }

    pub fn current() -> Arc<Thread> {
        sched::current_thread()
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn process(&self) -> Arc<Process> {
        self.process
            .upgrade()
            .expect("thread outlived its process")
    }

    pub fn status(&self) -> ThreadStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: ThreadStatus) {
        *self.status.lock() = status;
    }

    pub(crate) fn status_slot(&self) -> &SpinLock<ThreadStatus> {
        &self.status
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn set_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn retval(&self) -> ExitCode {
        *self.retval.lock()
    }

    pub(crate) fn set_retval(&self, retval: ExitCode) {
        *self.retval.lock() = retval;
    }

    pub(crate) fn ctx(&self) -> &Context {
        &self.ctx
    }

    pub(crate) fn wchan(&self) -> &SpinLock<Option<WaiterList>> {
        &self.wchan
    }

    pub(crate) fn wake_slot(&self) -> &SpinLock<WakeKind> {
        &self.wake
    }

    /// Frees the thread's stack. Called by the parent while reaping; the
    /// thread must already have exited.
    pub(crate) fn destroy(&self) {
        debug_assert_eq!(self.status(), ThreadStatus::Exited);
        if let Some(handle) = self.join.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Creates a kernel thread belonging to `process`.
///
/// The thread begins in the `Init` state and does not run until it is handed
/// to the scheduler with `make_runnable`. `entry`'s return value becomes the
/// exit status of the process.
pub fn kthread_create<F>(process: &Arc<Process>, entry: F) -> Arc<Thread>
where
    F: FnOnce() -> ExitCode + Send + 'static,
{
    let thread = Thread::new(process);
    process.threads().lock().push(thread.clone());

    let trampoline_thread = thread.clone();
    let handle = std::thread::Builder::new()
        .name(alloc::format!("{}:{}", process.name(), thread.tid()))
        .stack_size(DEFAULT_STACK_SIZE)
        .spawn(move || trampoline(trampoline_thread, entry))
        .expect("failed to allocate a kernel stack");
    *thread.join.lock() = Some(handle);

    trace!(
        "created thread {} for process {} ({})",
        thread.tid(),
        process.pid(),
        process.name()
    );
    thread
}

/// Sets the cancelled flag of `thread` and records `retval` as its pending
/// exit status. A thread in a cancellable sleep is pulled off its wait queue
/// and resumed; anything else keeps running until its next cancellation
/// point. Cancelling the current thread exits immediately.
pub fn kthread_cancel(thread: &Arc<Thread>, retval: ExitCode) {
    if Arc::ptr_eq(thread, &Thread::current()) {
        kthread_exit(retval);
    }
    thread.set_retval(retval);
    sched::cancel(thread);
}

/// Terminates the current thread with `retval`, unwinding out of any call
/// depth back to the trampoline.
pub fn kthread_exit(retval: ExitCode) -> ! {
    panic::panic_any(ThreadExit(retval));
}

fn trampoline<F>(thread: Arc<Thread>, entry: F)
where
    F: FnOnce() -> ExitCode + Send + 'static,
{
    // Parked until the scheduler dispatches this thread for the first time.
    thread.ctx.suspend();

    let status = match panic::catch_unwind(AssertUnwindSafe(entry)) {
        Ok(code) => code,
        Err(payload) => match payload.downcast::<ThreadExit>() {
            Ok(exit) => exit.0,
            Err(other) => {
                // A genuine panic: an invariant was violated somewhere on
                // this stack. Record it so the boot path can re-raise it
                // once the machine is quiesced.
                error!("kernel thread {} panicked", thread.tid());
                crate::boot::record_panic(other);
                -1
            }
        },
    };

    thread.set_retval(status);
    thread.set_status(ThreadStatus::Exited);
    crate::process::thread_exited(status);
    // The process has been cleaned up and the next thread dispatched; this
    // native thread simply ends. Its stack is reclaimed when the parent
    // reaps the process.
}

pub(crate) fn reset_tid_allocator() {
    TID_ALLOCATOR.store(0, Ordering::SeqCst);
}
