// SPDX-License-Identifier: MPL-2.0

//! Sleeping synchronization primitives built on the scheduler.

mod mutex;
mod wait_queue;

pub use mutex::{Mutex, MutexGuard};
pub use wait_queue::WaitQueue;
