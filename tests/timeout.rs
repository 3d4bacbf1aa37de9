use fifo_lock::{AcquireOptions, FifoLock, LockOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[test]
fn test_timeout_fails_within_bound() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("held.lock");
    let mut holder = FifoLock::at_path(&path, LockOptions::new());
    holder.acquire().unwrap();

    let mut waiter = FifoLock::at_path(&path, LockOptions::new());
    let opts = AcquireOptions {
        timeout: Some(Duration::from_millis(300)),
        blocking: true,
        poll_interval: Duration::from_millis(10),
    };
    let start = Instant::now();
    let err = waiter.acquire_with(opts).unwrap_err();
    let waited = start.elapsed();

    assert!(err.is_timeout(), "{}", err);
    assert!(waited >= Duration::from_millis(290), "waited {:?}", waited);
    assert!(waited < Duration::from_millis(1500), "waited {:?}", waited);
    assert!(!waiter.is_locked());
}

#[test]
fn test_non_blocking_returns_immediately() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("held.lock");
    let mut holder = FifoLock::at_path(&path, LockOptions::new());
    holder.acquire().unwrap();

    let mut waiter = FifoLock::at_path(&path, LockOptions::new().blocking(false));
    let start = Instant::now();
    assert!(waiter.acquire().unwrap_err().is_timeout());
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_held_intervals_never_overlap() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mutex.lock");
    let inside = Arc::new(AtomicUsize::new(0));
    let entries = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let path = path.clone();
            let inside = Arc::clone(&inside);
            let entries = Arc::clone(&entries);
            thread::spawn(move || {
                let mut lock = FifoLock::at_path(
                    &path,
                    LockOptions::new()
                        .timeout(Duration::from_secs(30))
                        .poll_interval(Duration::from_millis(2)),
                );
                for _ in 0..5 {
                    let _guard = lock.lock().unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    entries.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(entries.load(Ordering::SeqCst), 30);
}

#[test]
fn test_zero_timeout_acquires_free_lock() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("free.lock");

    let mut lock = FifoLock::at_path(&path, LockOptions::new().timeout(Duration::ZERO));
    lock.acquire().unwrap();
    assert!(lock.is_locked());
    lock.close();

    let mut lock = FifoLock::at_path(
        &path,
        LockOptions::new()
            .timeout(Duration::from_millis(300))
            .stale_timeout(Duration::ZERO),
    );
    lock.try_acquire().unwrap();
    assert!(lock.is_locked());
}

#[test]
fn test_exclusion_survives_close_of_idle_handle() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared.lock");
    let opts = LockOptions::new().poll_interval(Duration::from_millis(2));

    let mut first = FifoLock::at_path(&path, opts.clone());
    first.acquire().unwrap();
    first.release();

    let mut idle = FifoLock::at_path(&path, opts.clone());
    idle.close();

    first.acquire().unwrap();
    let mut second = FifoLock::at_path(&path, opts.clone().blocking(false));
    assert!(second.acquire().unwrap_err().is_timeout());

    let mut third = FifoLock::at_path(&path, opts.timeout(Duration::from_millis(100)));
    assert!(third.acquire().unwrap_err().is_timeout());
    first.release();
    third.acquire().unwrap();
}
