// SPDX-License-Identifier: MPL-2.0

//! The cooperative scheduler.
//!
//! A single global FIFO run queue holds the runnable threads. A thread keeps
//! the CPU until it explicitly yields, sleeps or exits; interrupts never
//! preempt kernel execution, so everything between two suspension points is
//! a critical section.

use crate::{
    prelude::*,
    sync::WaitQueue,
    thread::{Thread, ThreadStatus, WakeKind},
};

static RUN_QUEUE: SpinLock<VecDeque<Arc<Thread>>> = SpinLock::new(VecDeque::new());
static CURRENT: SpinLock<Option<Arc<Thread>>> = SpinLock::new(None);

/// Returns the thread currently on the CPU.
pub fn current_thread() -> Arc<Thread> {
    CURRENT
        .lock()
        .clone()
        .expect("no current thread; the kernel is not running")
}

pub(crate) fn set_current(thread: Arc<Thread>) {
    *CURRENT.lock() = Some(thread);
}

pub(crate) fn clear_current() {
    *CURRENT.lock() = None;
}

/// Moves a thread in the `Init` or `Sleeping` state onto the run queue.
/// Idempotent on a thread that is already runnable.
pub fn make_runnable(thread: &Arc<Thread>) {
    {
        let mut status = thread.status_slot().lock();
        match *status {
            ThreadStatus::Runnable | ThreadStatus::Running => return,
            ThreadStatus::Exited => panic!("making an exited thread runnable"),
            ThreadStatus::Init
            | ThreadStatus::Sleeping
            | ThreadStatus::SleepingCancellable => *status = ThreadStatus::Runnable,
        }
    }
    if let Some(waiters) = thread.wchan().lock().take() {
        waiters.lock().retain(|waiter| !Arc::ptr_eq(waiter, thread));
    }
    RUN_QUEUE.lock().push_back(thread.clone());
}

/// Gives up the CPU but stays runnable; the thread goes to the back of the
/// run queue.
pub fn yield_now() {
    let current = current_thread();
    current.set_status(ThreadStatus::Runnable);
    RUN_QUEUE.lock().push_back(current.clone());
    switch();
}

/// Dispatches the next runnable thread and suspends the current one. The
/// call returns when the current thread is scheduled again.
pub fn switch() {
    let prev = current_thread();
    let next = RUN_QUEUE.lock().pop_front();
    let Some(next) = next else {
        if prev.status() == ThreadStatus::Runnable {
            // Nothing else to run; keep going.
            prev.set_status(ThreadStatus::Running);
            return;
        }
        // With no device interrupts there is nothing left that could ever
        // wake a sleeper, so this is a guaranteed hang. Fail loudly.
        panic!("run queue empty and the current thread cannot run");
    };

    if Arc::ptr_eq(&next, &prev) {
        next.set_status(ThreadStatus::Running);
        return;
    }

    next.set_status(ThreadStatus::Running);
    set_current(next.clone());
    next.ctx().resume();
    prev.ctx().suspend();
}

/// Dispatches the next runnable thread without suspending the caller. Used
/// by the exit path: the calling thread is done and its native thread is
/// about to end.
pub(crate) fn exit_switch() {
    let prev = current_thread();
    debug_assert_eq!(prev.status(), ThreadStatus::Exited);
    let next = RUN_QUEUE
        .lock()
        .pop_front()
        .expect("last runnable thread exited");
    next.set_status(ThreadStatus::Running);
    set_current(next.clone());
    next.ctx().resume();
}

/// Puts the current thread to sleep on `queue`. Returns when a waker hands
/// the thread back to the run queue.
pub fn sleep_on(queue: &WaitQueue) {
    // An uncancellable sleep never reports cancellation.
    let _ = do_sleep(queue, false);
}

/// As `sleep_on`, but the sleep can be interrupted by `cancel`, which is
/// reported as `EINTR`.
pub fn cancellable_sleep_on(queue: &WaitQueue) -> Result<()> {
    do_sleep(queue, true)
}

fn do_sleep(queue: &WaitQueue, cancellable: bool) -> Result<()> {
    let current = current_thread();
    if cancellable && current.is_cancelled() {
        return_errno_with_message!(Errno::EINTR, "cancelled before sleeping");
    }

    current.set_status(if cancellable {
        ThreadStatus::SleepingCancellable
    } else {
        ThreadStatus::Sleeping
    });
    *current.wchan().lock() = Some(queue.waiters().clone());
    *current.wake_slot().lock() = WakeKind::Normal;
    queue.waiters().lock().push_back(current.clone());

    switch();

    if cancellable && *current.wake_slot().lock() == WakeKind::Cancelled {
        return_errno_with_message!(Errno::EINTR, "woken by cancellation");
    }
    Ok(())
}

/// Marks a thread woken and queues it to run. Called by the wait-queue wake
/// paths with the thread already removed from its queue.
pub(crate) fn wake_thread(thread: &Arc<Thread>, kind: WakeKind) {
    debug_assert!(matches!(
        thread.status(),
        ThreadStatus::Sleeping | ThreadStatus::SleepingCancellable
    ));
    *thread.wake_slot().lock() = kind;
    thread.wchan().lock().take();
    thread.set_status(ThreadStatus::Runnable);
    RUN_QUEUE.lock().push_back(thread.clone());
}

/// Flags `thread` as cancelled. A thread in a cancellable sleep is removed
/// from its wait queue and resumed; any other thread will observe the flag
/// at its next cancellation point.
pub fn cancel(thread: &Arc<Thread>) {
    thread.set_cancelled();

    let mut status = thread.status_slot().lock();
    if *status != ThreadStatus::SleepingCancellable {
        return;
    }
    *status = ThreadStatus::Runnable;
    drop(status);

    if let Some(waiters) = thread.wchan().lock().take() {
        waiters.lock().retain(|waiter| !Arc::ptr_eq(waiter, thread));
    }
    *thread.wake_slot().lock() = WakeKind::Cancelled;
    RUN_QUEUE.lock().push_back(thread.clone());
}

pub(crate) fn reset() {
    RUN_QUEUE.lock().clear();
    clear_current();
}
