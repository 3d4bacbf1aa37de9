//! Runs against a live server; set `REDIS_URL` and pass `--ignored`.
#![cfg(feature = "redis")]

use fifo_lock::{LockOptions, RedisFifoLock};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn redis_url() -> Option<String> {
    std::env::var("REDIS_URL").ok()
}

fn connection(url: &str) -> redis::Connection {
    redis::Client::open(url).unwrap().get_connection().unwrap()
}

fn reset(url: &str, name: &str) {
    let mut conn = connection(url);
    let _: i64 = redis::cmd("DEL")
        .arg(name)
        .arg(format!("{}:queue", name))
        .arg(format!("{}:seq", name))
        .query(&mut conn)
        .unwrap();
}

fn opts() -> LockOptions {
    LockOptions::new()
        .timeout(Duration::from_secs(10))
        .poll_interval(Duration::from_millis(10))
}

#[test]
#[ignore = "needs REDIS_URL"]
fn test_exclusive_and_timeout() {
    let Some(url) = redis_url() else { return };
    let name = "fifo-lock:it:exclusive";
    reset(&url, name);

    let mut a = RedisFifoLock::open(&url, name, opts()).unwrap();
    let mut b = RedisFifoLock::open(
        &url,
        name,
        opts().timeout(Duration::from_millis(200)),
    )
    .unwrap();

    a.acquire().unwrap();
    let err = b.acquire().unwrap_err();
    assert!(err.is_timeout());
    a.release().unwrap();
    b.acquire().unwrap();
    b.release().unwrap();
}

#[test]
#[ignore = "needs REDIS_URL"]
fn test_release_leaves_foreign_token() {
    let Some(url) = redis_url() else { return };
    let name = "fifo-lock:it:ownership";
    reset(&url, name);

    let mut lock = RedisFifoLock::open(&url, name, opts().fifo(false)).unwrap();
    lock.acquire().unwrap();

    // simulate expiry followed by another client taking the key
    let mut conn = connection(&url);
    let _: () = redis::cmd("SET")
        .arg(name)
        .arg("someone-else")
        .query(&mut conn)
        .unwrap();

    lock.release().unwrap();
    assert!(!lock.is_locked());
    let value: Option<String> = redis::cmd("GET").arg(name).query(&mut conn).unwrap();
    assert_eq!(value.as_deref(), Some("someone-else"));
    reset(&url, name);
}

#[test]
#[ignore = "needs REDIS_URL"]
fn test_fair_order_and_key_cleanup() {
    let Some(url) = redis_url() else { return };
    let name = "fifo-lock:it:order";
    reset(&url, name);

    let mut holder = RedisFifoLock::open(&url, name, opts()).unwrap();
    holder.acquire().unwrap();

    let entered = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for id in 0..4 {
        let url = url.clone();
        let entered = Arc::clone(&entered);
        handles.push(thread::spawn(move || {
            let mut lock = RedisFifoLock::open(&url, name, opts()).unwrap();
            let guard = lock.lock().unwrap();
            entered.lock().unwrap().push(id);
            thread::sleep(Duration::from_millis(20));
            drop(guard);
            lock.close();
        }));
        thread::sleep(Duration::from_millis(100));
    }

    holder.release().unwrap();
    for handle in handles {
        handle.join().unwrap();
    }
    holder.close();

    assert_eq!(*entered.lock().unwrap(), vec![0, 1, 2, 3]);
    let mut conn = connection(&url);
    let exists: i64 = redis::cmd("EXISTS")
        .arg(format!("{}:queue", name))
        .arg(format!("{}:seq", name))
        .query(&mut conn)
        .unwrap();
    assert_eq!(exists, 0);
}

#[test]
#[ignore = "needs REDIS_URL"]
fn test_head_waiter_outlives_stale_threshold() {
    let Some(url) = redis_url() else { return };
    let name = "fifo-lock:it:long-wait";
    reset(&url, name);

    let mut holder = RedisFifoLock::open(&url, name, opts()).unwrap();
    holder.acquire().unwrap();

    let waiter_url = url.clone();
    let handle = thread::spawn(move || {
        let mut waiter = RedisFifoLock::open(
            &waiter_url,
            name,
            LockOptions::new()
                .stale_timeout(Duration::from_millis(50))
                .poll_interval(Duration::from_millis(10)),
        )
        .unwrap();
        waiter.acquire().unwrap();
        waiter.close();
    });

    // hold well past the waiter's stale threshold
    thread::sleep(Duration::from_millis(400));
    holder.release().unwrap();
    handle.join().unwrap();
    holder.close();
}
