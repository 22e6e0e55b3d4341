// SPDX-License-Identifier: MPL-2.0

#![allow(unused)]

pub(crate) use alloc::{
    boxed::Box,
    collections::{BTreeMap, BTreeSet, VecDeque},
    string::{String, ToString},
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};
pub(crate) use core::{any::Any, fmt::Debug};

pub(crate) use bitflags::bitflags;
pub(crate) use log::{debug, error, info, trace, warn};
pub(crate) use spin::{Mutex as SpinLock, MutexGuard as SpinLockGuard, RwLock};

pub(crate) use crate::{
    config::PAGE_SIZE,
    error::{Errno, Error},
    return_errno, return_errno_with_message,
};

/// Returns the current process.
#[macro_export]
macro_rules! current {
    () => {
        $crate::process::current()
    };
}

/// Returns the current thread.
#[macro_export]
macro_rules! current_thread {
    () => {
        $crate::thread::Thread::current()
    };
}

pub(crate) use crate::{current, current_thread};

pub(crate) type Result<T> = core::result::Result<T, Error>;
