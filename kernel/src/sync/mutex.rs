// SPDX-License-Identifier: MPL-2.0

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};

use super::WaitQueue;
use crate::{prelude::*, thread::Thread};

/// A sleep lock with FIFO ownership transfer.
///
/// `lock` blocks by sleeping on the mutex's wait queue. On unlock, if any
/// thread is waiting, ownership moves directly to the head of the queue in
/// the same step that wakes it; woken threads never race for the lock again,
/// so acquisition order is exactly arrival order.
pub struct Mutex<T: ?Sized> {
    owner: SpinLock<Option<Arc<Thread>>>,
    queue: WaitQueue,
    val: UnsafeCell<T>,
}

impl<T> Mutex<T> {
    pub fn new(val: T) -> Self {
        Self {
            owner: SpinLock::new(None),
            queue: WaitQueue::new(),
            val: UnsafeCell::new(val),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex, sleeping until it is available.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let current = Thread::current();
        {
            let mut owner = self.owner.lock();
            match &*owner {
                None => {
                    *owner = Some(current);
                    return MutexGuard { mutex: self };
                }
                Some(holder) => {
                    assert!(
                        !Arc::ptr_eq(holder, &current),
                        "thread locking a mutex it already holds"
                    );
                }
            }
        }
        self.queue.sleep();
        // Woken by the direct handoff in `unlock`; we already own the lock.
        debug_assert!(self.held_by_current());
        MutexGuard { mutex: self }
    }

    /// As `lock`, but the wait can be cancelled; cancellation is reported
    /// without the lock being taken.
    pub fn lock_cancellable(&self) -> Result<MutexGuard<'_, T>> {
        let current = Thread::current();
        {
            let mut owner = self.owner.lock();
            match &*owner {
                None => {
                    *owner = Some(current);
                    return Ok(MutexGuard { mutex: self });
                }
                Some(holder) => {
                    assert!(
                        !Arc::ptr_eq(holder, &current),
                        "thread locking a mutex it already holds"
                    );
                }
            }
        }
        self.queue.sleep_cancellable()?;
        debug_assert!(self.held_by_current());
        Ok(MutexGuard { mutex: self })
    }

    /// Acquires the mutex only if it is free.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let mut owner = self.owner.lock();
        if owner.is_none() {
            *owner = Some(Thread::current());
            drop(owner);
            return Some(MutexGuard { mutex: self });
        }
        None
    }

    /// Whether the current thread holds the mutex.
    pub fn held_by_current(&self) -> bool {
        self.owner
            .lock()
            .as_ref()
            .is_some_and(|holder| Arc::ptr_eq(holder, &Thread::current()))
    }

    fn unlock(&self) {
        let mut owner = self.owner.lock();
        debug_assert!(owner
            .as_ref()
            .is_some_and(|holder| Arc::ptr_eq(holder, &Thread::current())));
        // Hand the lock to the head waiter in the same step that wakes it.
        *owner = self.queue.wake_one();
    }
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Mutex { .. }")
    }
}

#[clippy::has_significant_drop]
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.val.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.val.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
