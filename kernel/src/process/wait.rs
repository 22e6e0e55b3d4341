// SPDX-License-Identifier: MPL-2.0

use super::{process_table, ExitCode, Pid, Process};
use crate::{prelude::*, thread};

/// Waits for a child to die and reaps it, returning its pid and exit status.
///
/// `pid == -1` waits for any child; `pid > 0` waits for that specific child.
/// With no (matching) children the call fails with `ECHILD`. `options` must
/// be zero. The caller sleeps on its own wait queue until a child's exit
/// path wakes it. This is a cancellation point.
pub fn do_waitpid(pid: i32, options: u32) -> Result<(Pid, ExitCode)> {
    if options != 0 {
        return_errno_with_message!(Errno::EINVAL, "unsupported waitpid options");
    }
    if pid == 0 || pid < -1 {
        return_errno_with_message!(Errno::EINVAL, "unsupported waitpid pid");
    }

    let current = current!();
    loop {
        if current_thread!().is_cancelled() {
            thread::kthread_exit(current_thread!().retval());
        }

        let dead_child = {
            let children = current.children().lock();
            if children.is_empty() {
                return_errno!(Errno::ECHILD);
            }
            if pid == -1 {
                children.values().find(|child| child.is_dead()).cloned()
            } else {
                let Some(child) = children.get(&(pid as Pid)) else {
                    return_errno_with_message!(Errno::ECHILD, "no such child");
                };
                child.is_dead().then(|| child.clone())
            }
        };

        if let Some(child) = dead_child {
            let status = child.exit_status();
            let child_pid = child.pid();
            reap(&current, &child);
            return Ok((child_pid, status));
        }

        // No matching dead child yet; sleep until one of them exits.
        if current.wait_queue().sleep_cancellable().is_err() {
            thread::kthread_exit(current_thread!().retval());
        }
    }
}

/// Parent-side destruction of a dead child: free its threads' stacks,
/// unlink it from the process table and from this parent. The process
/// structure and page directory go away with the last reference.
fn reap(parent: &Arc<Process>, child: &Arc<Process>) {
    debug_assert!(child.is_dead());
    debug_assert!(child.children().lock().is_empty());

    let threads: Vec<_> = child.threads().lock().drain(..).collect();
    for thread in threads {
        thread.destroy();
    }

    process_table::remove(child.pid());
    parent.children().lock().remove(&child.pid());
    debug!("reaped process {} ({})", child.pid(), child.name());
}

#[cfg(test)]
mod tests {
    use super::super::{do_fork, do_waitpid, proc_kill, process_table};
    use crate::{
        prelude::*,
        sched,
        sync::WaitQueue,
        test_utils,
        thread::kthread_cancel,
    };

    #[test]
    fn waitpid_argument_validation() {
        test_utils::run(|| {
            assert_eq!(do_waitpid(-1, 1).unwrap_err().error(), Errno::EINVAL);
            assert_eq!(do_waitpid(0, 0).unwrap_err().error(), Errno::EINVAL);
            assert_eq!(do_waitpid(-2, 0).unwrap_err().error(), Errno::EINVAL);
            // No children yet.
            assert_eq!(do_waitpid(-1, 0).unwrap_err().error(), Errno::ECHILD);
            assert_eq!(do_waitpid(42, 0).unwrap_err().error(), Errno::ECHILD);
            0
        });
    }

    #[test]
    fn waitpid_collects_each_child_once() {
        test_utils::run(|| {
            let mut expected = BTreeMap::new();
            for i in 0..5 {
                let pid = do_fork(move || 40 + i).unwrap();
                expected.insert(pid, 40 + i);
            }
            for _ in 0..5 {
                let (pid, status) = do_waitpid(-1, 0).unwrap();
                assert_eq!(expected.remove(&pid), Some(status));
            }
            assert!(expected.is_empty());
            assert_eq!(do_waitpid(-1, 0).unwrap_err().error(), Errno::ECHILD);
            0
        });
    }

    #[test]
    fn waitpid_for_a_specific_child() {
        test_utils::run(|| {
            let first = do_fork(|| 1).unwrap();
            let second = do_fork(|| 2).unwrap();
            // Wait for the second child even though the first dies too.
            let (pid, status) = do_waitpid(second as i32, 0).unwrap();
            assert_eq!((pid, status), (second, 2));
            let (pid, status) = do_waitpid(first as i32, 0).unwrap();
            assert_eq!((pid, status), (first, 1));
            0
        });
    }

    #[test]
    fn exit_unwinds_from_any_depth() {
        fn deep(n: usize) -> i32 {
            if n == 0 {
                crate::process::do_exit(33);
            }
            deep(n - 1)
        }
        test_utils::run(|| {
            let pid = do_fork(|| deep(10)).unwrap();
            let (_, status) = do_waitpid(pid as i32, 0).unwrap();
            assert_eq!(status, 33);
            0
        });
    }

    #[test]
    fn killed_child_reports_the_kill_status() {
        test_utils::run(|| {
            let queue = Arc::new(WaitQueue::new());
            let sleeper_queue = queue.clone();
            let pid = do_fork(move || {
                match sleeper_queue.sleep_cancellable() {
                    Err(_) => current_thread!().retval(),
                    Ok(_) => 0,
                }
            })
            .unwrap();

            let victim = process_table::get_process(pid).unwrap();
            // Let the child get into its sleep first.
            while queue.is_empty() {
                sched::yield_now();
            }
            proc_kill(&victim, 42);
            let (_, status) = do_waitpid(pid as i32, 0).unwrap();
            assert_eq!(status, 42);
            0
        });
    }

    #[test]
    fn cancellation_of_an_uncancellable_sleep_is_deferred() {
        test_utils::run(|| {
            let queue = Arc::new(WaitQueue::new());
            let sleeper_queue = queue.clone();
            let pid = do_fork(move || {
                sleeper_queue.sleep();
                // Woken normally; the cancellation is observed here.
                if current_thread!().is_cancelled() {
                    current_thread!().retval()
                } else {
                    0
                }
            })
            .unwrap();

            let victim = process_table::get_process(pid).unwrap();
            while queue.is_empty() {
                sched::yield_now();
            }
            let thread = victim.threads().lock()[0].clone();
            kthread_cancel(&thread, 55);
            // Still asleep: an uncancellable sleep ignores cancellation.
            sched::yield_now();
            assert!(!victim.is_dead());
            assert_eq!(queue.len(), 1);

            queue.wake_one();
            let (_, status) = do_waitpid(pid as i32, 0).unwrap();
            assert_eq!(status, 55);
            0
        });
    }

    #[test]
    fn kill_reparents_the_victims_children() {
        test_utils::run(|| {
            let ready = Arc::new(SpinLock::new(None::<u32>));
            let hold = Arc::new(WaitQueue::new());
            let done = Arc::new(WaitQueue::new());

            let (child_ready, child_hold, child_done) =
                (ready.clone(), hold.clone(), done.clone());
            let middle = do_fork(move || {
                let grandchild = do_fork(move || {
                    // Outlives its parent; init will reap it.
                    child_done.sleep();
                    7
                })
                .unwrap();
                *child_ready.lock() = Some(grandchild);
                match child_hold.sleep_cancellable() {
                    Err(_) => current_thread!().retval(),
                    Ok(_) => 0,
                }
            })
            .unwrap();

            // Wait until the grandchild exists.
            let grandchild = loop {
                if let Some(pid) = *ready.lock() {
                    break pid;
                }
                sched::yield_now();
            };

            let victim = process_table::get_process(middle).unwrap();
            while hold.is_empty() {
                sched::yield_now();
            }
            proc_kill(&victim, 9);
            let (_, status) = do_waitpid(middle as i32, 0).unwrap();
            assert_eq!(status, 9);

            // The orphan now belongs to init (this process).
            let orphan = process_table::get_process(grandchild).unwrap();
            assert_eq!(orphan.parent().unwrap().pid(), crate::process::PID_INIT);
            assert!(current!().has_child(grandchild));

            done.wake_one();
            let (pid, status) = do_waitpid(grandchild as i32, 0).unwrap();
            assert_eq!((pid, status), (grandchild, 7));
            0
        });
    }

    #[test]
    fn kill_all_sweeps_everything_but_init() {
        test_utils::run(|| {
            let hold = Arc::new(WaitQueue::new());
            let mut pids = Vec::new();
            for _ in 0..3 {
                let q = hold.clone();
                let pid = do_fork(move || match q.sleep_cancellable() {
                    Err(_) => current_thread!().retval(),
                    Ok(_) => 0,
                })
                .unwrap();
                pids.push(pid);
            }
            while hold.len() < 3 {
                sched::yield_now();
            }

            crate::process::proc_kill_all();
            for _ in 0..3 {
                let (pid, _) = do_waitpid(-1, 0).unwrap();
                assert!(pids.contains(&pid));
            }
            assert_eq!(do_waitpid(-1, 0).unwrap_err().error(), Errno::ECHILD);
            // Init itself survived the sweep.
            assert!(process_table::get_process(crate::process::PID_INIT).is_some());
            0
        });
    }
}
