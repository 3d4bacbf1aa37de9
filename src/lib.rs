//! Fair (FIFO) inter-process locks.
//!
//! A [`FifoLock`] wraps an OS file lock and, with fairness on, makes waiters
//! take a ticket in a queue directory so the lock is granted in arrival
//! order. [`ReentrantFifoLock`] lets the owning thread nest acquisitions, and
//! [`RedisFifoLock`] gives the same model across hosts.
//!
//! ## Modules
//! - `core` — Locks, ticket queues, OS lock backends, settings loading
//! - `models` — Options, settings and ticket types
//! - `error` — `LockError` and the separate cleanup error
//! - `util` — Path, filesystem and warning helpers

pub mod constants;
pub mod core;
pub mod error;
pub mod models;
pub mod util;

pub use crate::core::fifo_lock::{FifoLock, FifoLockGuard};
pub use crate::core::paths::LockPaths;
pub use crate::core::queue::file::FileTicketQueue;
#[cfg(feature = "redis")]
pub use crate::core::queue::redis::RedisTicketQueue;
pub use crate::core::queue::TicketQueue;
#[cfg(feature = "redis")]
pub use crate::core::redis_lock::{RedisFifoLock, RedisLockGuard};
pub use crate::core::reentrant::{ReentrantFifoLock, ReentrantGuard};
pub use crate::error::{CleanupError, LockError, Result};
pub use crate::models::options::{AcquireOptions, LockOptions};
pub use crate::models::settings::LockSettings;
pub use crate::util::warn::WarnHook;
