// SPDX-License-Identifier: MPL-2.0

use crate::{
    prelude::*,
    sched,
    thread::{Thread, WaiterList, WakeKind},
};

/// A FIFO wait queue.
///
/// A thread sleeps on a wait queue to wait for some condition; other threads
/// wake the longest sleeper (`wake_one`) or everyone (`broadcast`). Wake
/// order always matches sleep order.
pub struct WaitQueue {
    waiters: WaiterList,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self {
            waiters: Arc::new(SpinLock::new(VecDeque::new())),
        }
    }

    /// Puts the current thread to sleep until woken.
    pub fn sleep(&self) {
        sched::sleep_on(self);
    }

    /// Puts the current thread to sleep until woken or cancelled; a sleep
    /// ended by cancellation reports `EINTR`.
    pub fn sleep_cancellable(&self) -> Result<()> {
        sched::cancellable_sleep_on(self)
    }

    /// Wakes the longest-waiting thread, returning it.
    pub fn wake_one(&self) -> Option<Arc<Thread>> {
        let thread = self.waiters.lock().pop_front()?;
        sched::wake_thread(&thread, WakeKind::Normal);
        Some(thread)
    }

    /// Wakes every waiting thread, preserving their order.
    pub fn broadcast(&self) {
        while self.wake_one().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    pub(crate) fn waiters(&self) -> &WaiterList {
        &self.waiters
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
