#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Barrier,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use kernel_sync::SpinMutex;

#[test]
fn lock_and_raii_release() {
    let mutex = SpinMutex::new(41);
    {
        let mut guard = mutex.lock();
        *guard += 1;
    }
    assert_eq!(*mutex.lock(), 42);
}

#[test]
fn try_lock_fails_while_held() {
    let mutex = SpinMutex::new(());
    let guard = mutex.lock();
    assert!(mutex.try_lock().is_none());
    drop(guard);
    assert!(mutex.try_lock().is_some());
}

#[test]
fn explicit_unlock_releases() {
    let mutex = SpinMutex::new(7);
    let guard = mutex.lock();
    guard.unlock();
    assert_eq!(*mutex.lock(), 7);
}

#[test]
fn with_lock_runs_and_releases() {
    let mutex = SpinMutex::new(String::from("a"));
    let len = mutex.with_lock(|s| {
        s.push('b');
        s.len()
    });
    assert_eq!(len, 2);
    assert_eq!(*mutex.lock(), "ab");
}

#[test]
fn get_mut_bypasses_locking() {
    let mut mutex = SpinMutex::new(vec![1, 2, 3]);
    mutex.get_mut().push(4);
    assert_eq!(*mutex.lock(), [1, 2, 3, 4]);
}

#[test]
fn contended_increments_are_exact_and_exclusive() {
    const THREADS: usize = 8;
    const ITERS: usize = 5000;

    let mutex = Arc::new(SpinMutex::new(0_usize));
    let in_critical = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let mutex = Arc::clone(&mutex);
            let in_critical = Arc::clone(&in_critical);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ITERS {
                    let mut guard = mutex.lock();
                    let others = in_critical.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(others, 0, "another thread is inside the critical section");
                    *guard += 1;
                    in_critical.fetch_sub(1, Ordering::SeqCst);
                    drop(guard);
                    thread::yield_now();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*mutex.lock(), THREADS * ITERS);
}

#[test]
fn lock_released_on_panic() {
    let mutex = SpinMutex::new(123);
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let _guard = mutex.lock();
        panic!("boom");
    }));
    result.unwrap_err();
    assert_eq!(*mutex.lock(), 123);
}

#[test]
fn debug_renders_data_or_locked_marker() {
    let mutex = SpinMutex::new(5);
    assert_eq!(format!("{mutex:?}"), "SpinMutex { data: 5 }");

    let guard = mutex.lock();
    assert_eq!(format!("{mutex:?}"), "SpinMutex { data: \"<locked>\" }");
    drop(guard);
}

#[test]
fn mutex_is_sync_for_send_data() {
    fn takes_sync<T: Sync>(_value: &T) {}
    let mutex = SpinMutex::new(0_u32);
    takes_sync(&mutex);
}
