// SPDX-License-Identifier: MPL-2.0

//! End-to-end scenarios across the scheduler, VFS and VM subsystems.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kernos::boot::run_kernel;
use kernos::config::{pn_to_addr, PROC_MAX_COUNT, USER_MEM_LOW};
use kernos::fs::{self, do_close, do_dup, do_open, do_read, do_write, Whence};
use kernos::process::{current, do_fork, do_waitpid, ExitCode};
use kernos::sched;
use kernos::sync::{Mutex, WaitQueue};
use kernos::vm::{
    shadow::cow_copies,
    usermem::{copy_from_user, copy_to_user},
    MapFlags, Prot, SearchDir,
};
use kernos::Errno;

fn boot(f: impl FnOnce() -> ExitCode + Send + 'static) {
    let _ = env_logger::builder().is_test(true).try_init();
    let status = run_kernel(f);
    assert_eq!(status, 0, "init exited with a failure status");
}

#[test]
fn s1_read_write_round_trip() {
    boot(|| {
        let fd1 = do_open("/f", fs::O_RDWR | fs::O_CREAT).unwrap();
        assert!(fd1 >= 0);
        assert_eq!(do_write(fd1, b"hello").unwrap(), 5);
        do_close(fd1).unwrap();

        let fd2 = do_open("/f", fs::O_RDONLY).unwrap();
        assert!(fd2 >= 0);
        let mut buf = [0u8; 5];
        assert_eq!(do_read(fd2, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        do_close(fd2).unwrap();
        0
    });
}

#[test]
fn s2_dup_shares_the_offset() {
    boot(|| {
        let fd = do_open("/f", fs::O_RDWR | fs::O_CREAT).unwrap();
        do_write(fd, b"hello").unwrap();
        do_close(fd).unwrap();

        let fd1 = do_open("/f", fs::O_RDONLY).unwrap();
        let fd2 = do_dup(fd1).unwrap();
        let mut a = [0u8; 3];
        let mut b = [0u8; 3];
        assert_eq!(do_read(fd1, &mut a).unwrap(), 3);
        assert_eq!(do_read(fd2, &mut b).unwrap(), 2);
        assert_eq!(&a, b"hel");
        assert_eq!(&b[..2], b"lo");
        do_close(fd1).unwrap();
        do_close(fd2).unwrap();
        0
    });
}

#[test]
fn s3_fork_copies_private_pages_on_write() {
    boot(|| {
        let vfn = current()
            .vmmap()
            .lock()
            .map(
                None,
                0,
                1,
                Prot::READ | Prot::WRITE,
                MapFlags::PRIVATE,
                0,
                SearchDir::LoHi,
            )
            .unwrap();
        let addr = pn_to_addr(vfn);

        copy_to_user(addr, &[0xAA; 64]);
        // The first private write copied the zero page into the shadow.
        assert_eq!(cow_copies(), 1);

        let child = do_fork(move || {
            let mut seen = [0u8; 64];
            copy_from_user(addr, &mut seen);
            assert_eq!(seen, [0xAA; 64]);

            copy_to_user(addr, &[0xBB; 64]);
            copy_from_user(addr, &mut seen);
            assert_eq!(seen, [0xBB; 64]);
            0
        })
        .unwrap();
        let (_, status) = do_waitpid(child as i32, 0).unwrap();
        assert_eq!(status, 0);

        // Exactly one copy for the child's write; the parent still sees its
        // own bytes through the pre-fork shadow.
        assert_eq!(cow_copies(), 2);
        let mut seen = [0u8; 64];
        copy_from_user(addr, &mut seen);
        assert_eq!(seen, [0xAA; 64]);
        assert_eq!(cow_copies(), 2);

        // And exactly one more for the parent's next write.
        copy_to_user(addr, &[0xCC; 64]);
        assert_eq!(cow_copies(), 3);
        0
    });
}

#[test]
fn s4_producer_consumer() {
    boot(|| {
        const ITEMS: usize = 100;
        let slot: Arc<Mutex<Option<usize>>> = Arc::new(Mutex::new(None));
        let not_full = Arc::new(WaitQueue::new());
        let not_empty = Arc::new(WaitQueue::new());
        let produced = Arc::new(AtomicUsize::new(0));
        let consumed = Arc::new(AtomicUsize::new(0));

        let producer = {
            let (slot, not_full, not_empty, produced) = (
                slot.clone(),
                not_full.clone(),
                not_empty.clone(),
                produced.clone(),
            );
            do_fork(move || {
                for item in 0..ITEMS {
                    loop {
                        let mut buffer = slot.lock();
                        if buffer.is_none() {
                            *buffer = Some(item);
                            produced.fetch_add(1, Ordering::SeqCst);
                            drop(buffer);
                            not_empty.wake_one();
                            break;
                        }
                        drop(buffer);
                        not_full.sleep();
                    }
                }
                0
            })
            .unwrap()
        };

        let consumer = {
            let (slot, not_full, not_empty, consumed) = (
                slot.clone(),
                not_full.clone(),
                not_empty.clone(),
                consumed.clone(),
            );
            do_fork(move || {
                let mut expected = 0;
                while expected < ITEMS {
                    let mut buffer = slot.lock();
                    if let Some(item) = buffer.take() {
                        assert_eq!(item, expected);
                        expected += 1;
                        consumed.fetch_add(1, Ordering::SeqCst);
                        drop(buffer);
                        not_full.wake_one();
                    } else {
                        drop(buffer);
                        not_empty.sleep();
                    }
                }
                0
            })
            .unwrap()
        };

        let (_, status) = do_waitpid(producer as i32, 0).unwrap();
        assert_eq!(status, 0);
        let (_, status) = do_waitpid(consumer as i32, 0).unwrap();
        assert_eq!(status, 0);

        assert!(slot.lock().is_none());
        assert_eq!(produced.load(Ordering::SeqCst), ITEMS);
        assert_eq!(consumed.load(Ordering::SeqCst), ITEMS);
        0
    });
}

#[test]
fn s5_reap_each_child_once() {
    boot(|| {
        let mut expected = BTreeMap::new();
        for i in 0..10 {
            let pid = do_fork(move || i).unwrap();
            expected.insert(pid, i);
        }
        for _ in 0..10 {
            let (pid, status) = do_waitpid(-1, 0).unwrap();
            assert_eq!(expected.remove(&pid), Some(status));
        }
        assert!(expected.is_empty());
        assert_eq!(do_waitpid(-1, 0).unwrap_err().error(), Errno::ECHILD);
        0
    });
}

#[test]
fn s6_orphan_is_reparented_to_init_and_reaped() {
    boot(|| {
        let announce = Arc::new(kernos::sync::Mutex::new(None));
        let hold = Arc::new(WaitQueue::new());
        let release = Arc::new(WaitQueue::new());

        let middle = {
            let (announce, hold, release) = (announce.clone(), hold.clone(), release.clone());
            do_fork(move || {
                let grandchild = do_fork(move || {
                    release.sleep();
                    21
                })
                .unwrap();
                *announce.lock() = Some(grandchild);
                match hold.sleep_cancellable() {
                    Err(_) => kernos::thread::Thread::current().retval(),
                    Ok(_) => 0,
                }
            })
            .unwrap()
        };

        let grandchild = loop {
            if let Some(pid) = *announce.lock() {
                break pid;
            }
            sched::yield_now();
        };
        while hold.is_empty() {
            sched::yield_now();
        }

        let victim = kernos::process::process_table::get_process(middle).unwrap();
        kernos::process::proc_kill(&victim, 5);
        let (_, status) = do_waitpid(middle as i32, 0).unwrap();
        assert_eq!(status, 5);

        // The grandchild now answers to init.
        let orphan = kernos::process::process_table::get_process(grandchild).unwrap();
        assert_eq!(orphan.parent().unwrap().pid(), kernos::process::PID_INIT);

        release.wake_one();
        let (pid, status) = do_waitpid(-1, 0).unwrap();
        assert_eq!((pid, status), (grandchild, 21));
        0
    });
}

#[test]
fn fork_shares_open_files() {
    boot(|| {
        let fd = do_open("/f", fs::O_RDWR | fs::O_CREAT).unwrap();
        do_write(fd, b"0123456789").unwrap();
        kernos::fs::do_lseek(fd, 0, Whence::Set).unwrap();

        let child = do_fork(move || {
            // The child reads through the shared file instance.
            let mut buf = [0u8; 4];
            assert_eq!(do_read(fd, &mut buf).unwrap(), 4);
            assert_eq!(&buf, b"0123");
            0
        })
        .unwrap();
        let (_, status) = do_waitpid(child as i32, 0).unwrap();
        assert_eq!(status, 0);

        // The shared offset moved for the parent too.
        let mut buf = [0u8; 4];
        assert_eq!(do_read(fd, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"4567");
        do_close(fd).unwrap();
        0
    });
}

#[test]
fn fork_fails_once_the_pid_space_is_full() {
    boot(|| {
        let mut spawned = 0u32;
        loop {
            match do_fork(|| 0) {
                Ok(_) => spawned += 1,
                Err(e) => {
                    assert_eq!(e.error(), Errno::ENOMEM);
                    break;
                }
            }
        }
        // Everything but idle and init is ours.
        assert_eq!(spawned, PROC_MAX_COUNT - 2);
        for _ in 0..spawned {
            do_waitpid(-1, 0).unwrap();
        }
        assert_eq!(do_waitpid(-1, 0).unwrap_err().error(), Errno::ECHILD);
        0
    });
}

#[test]
fn illegal_user_access_kills_with_efault() {
    boot(|| {
        // Touching unmapped memory.
        let child = do_fork(|| {
            let mut buf = [0u8; 4];
            copy_from_user(USER_MEM_LOW, &mut buf);
            unreachable!("survived an access to unmapped memory");
        })
        .unwrap();
        let (_, status) = do_waitpid(child as i32, 0).unwrap();
        assert_eq!(status, Errno::EFAULT.as_i32());

        // Writing a read-only mapping.
        let vfn = current()
            .vmmap()
            .lock()
            .map(
                None,
                0,
                1,
                Prot::READ,
                MapFlags::PRIVATE,
                0,
                SearchDir::LoHi,
            )
            .unwrap();
        let addr = pn_to_addr(vfn);
        let child = do_fork(move || {
            copy_to_user(addr, &[1u8; 4]);
            unreachable!("survived a write to read-only memory");
        })
        .unwrap();
        let (_, status) = do_waitpid(child as i32, 0).unwrap();
        assert_eq!(status, Errno::EFAULT.as_i32());
        0
    });
}

#[test]
fn file_backed_mapping_reads_and_writes_back() {
    boot(|| {
        let fd = do_open("/data", fs::O_RDWR | fs::O_CREAT).unwrap();
        let content: Vec<u8> = (0..5000u32).map(|i| (i % 241) as u8).collect();
        assert_eq!(do_write(fd, &content).unwrap(), content.len());
        do_close(fd).unwrap();

        let vnode = kernos::fs::namev::open_namev("/data", false, None).unwrap();
        let start = current()
            .vmmap()
            .lock()
            .map(
                Some(&vnode),
                0,
                2,
                Prot::READ | Prot::WRITE,
                MapFlags::SHARED,
                0,
                SearchDir::LoHi,
            )
            .unwrap();
        let addr = pn_to_addr(start);

        // Faulting in the pages yields the file's bytes.
        let mut seen = vec![0u8; content.len()];
        copy_from_user(addr, &mut seen);
        assert_eq!(seen, content);

        // A shared write lands in the file once the mapping goes away.
        copy_to_user(addr, b"patched");
        current().vmmap().lock().remove(start, 2).unwrap();
        current().page_dir().unmap_all();

        let fd = do_open("/data", fs::O_RDONLY).unwrap();
        let mut head = [0u8; 7];
        assert_eq!(do_read(fd, &mut head).unwrap(), 7);
        assert_eq!(&head, b"patched");
        do_close(fd).unwrap();
        0
    });
}
