use kernel_sync::SpinLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::{panic, thread};

#[test]
fn guard_releases_on_drop() {
    let l = SpinLock::new(0_u32);
    {
        let mut g = l.lock();
        *g = 41;
        assert!(l.is_locked());
    }
    assert!(!l.is_locked());
    l.with_lock(|v| *v += 1);
    assert_eq!(l.into_inner(), 42);
}

#[test]
fn try_lock_fails_while_held() {
    let l = SpinLock::new(1u8);
    let g1 = l.try_lock();
    assert!(g1.is_some());
    assert!(l.try_lock().is_none());
    drop(g1);
    assert!(l.try_lock().is_some());
}

#[test]
fn get_mut_bypasses_the_lock() {
    let mut l = SpinLock::new(vec![1, 2, 3]);
    l.get_mut().push(4);
    assert_eq!(l.lock().as_slice(), &[1, 2, 3, 4]);
    assert_eq!(l.contended_acquisitions(), 0);
}

#[test]
fn contended_increments_are_exclusive() {
    let threads = 8;
    let iters = 2_000;

    let lock = Arc::new(SpinLock::new(0usize));
    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let in_cs = Arc::clone(&in_cs);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    lock.with_lock(|v| {
                        let prev = in_cs.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(prev, 0, "mutual exclusion violated");
                        *v += 1;
                        in_cs.fetch_sub(1, Ordering::SeqCst);
                    });
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(lock.with_lock(|v| *v), threads * iters);
}

#[test]
fn waiters_are_served_in_arrival_order() {
    // Hold the lock, let two threads queue up one after the other, then
    // release and check they ran in the order they drew tickets.
    let lock = Arc::new(SpinLock::new(()));
    let order = Arc::new(Mutex::new(Vec::new()));
    let holder = lock.lock();

    let mut handles = Vec::new();
    for id in 0..2 {
        let thread_lock = Arc::clone(&lock);
        let order = Arc::clone(&order);
        handles.push(thread::spawn(move || {
            let _g = thread_lock.lock();
            order.lock().unwrap().push(id);
        }));
        // Wait until this thread has drawn its ticket.
        while lock.contended_acquisitions() < id + 1 {
            thread::yield_now();
        }
    }

    drop(holder);
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1]);
}

#[test]
fn lock_is_released_on_panic() {
    let l = SpinLock::new(0u32);
    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err());
    assert_eq!(l.with_lock(|v| *v), 123);
}

#[test]
fn spinlock_is_sync_for_send_t() {
    fn takes_sync<S: Sync>(_s: &S) {}
    takes_sync(&SpinLock::new(0u8));
}

#[test]
fn spinlock_moves_across_threads() {
    let lock = SpinLock::new(vec![1u8]);
    let lock = std::thread::spawn(move || {
        lock.with_lock(|v| v.push(2));
        lock
    })
    .join()
    .unwrap();
    assert_eq!(lock.with_lock(|v| v.clone()), vec![1, 2]);
}
