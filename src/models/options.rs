//! In-memory lock configuration.

use crate::constants;
use crate::util::warn::{WarnHook, Warner};
use std::fmt;
use std::time::Duration;

/// Configuration shared by every lock type.
#[derive(Clone)]
pub struct LockOptions {
    /// Maximum time to wait in `acquire`. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Whether `acquire` waits at all (subject to `timeout`).
    pub blocking: bool,
    /// Sleep between attempts while queued or while the OS lock is contended.
    pub poll_interval: Duration,
    /// Serve waiters in arrival order through a ticket queue.
    pub fifo: bool,
    /// Age after which a head ticket is presumed abandoned.
    /// Falls back to `timeout`; with neither set, stale tickets are never reclaimed.
    pub stale_timeout: Option<Duration>,
    pub warn_hook: Option<WarnHook>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            blocking: true,
            poll_interval: constants::DEFAULT_POLL_INTERVAL,
            fifo: true,
            stale_timeout: None,
            warn_hook: None,
        }
    }
}

impl LockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn fifo(mut self, fifo: bool) -> Self {
        self.fifo = fifo;
        self
    }

    pub fn stale_timeout(mut self, stale: Duration) -> Self {
        self.stale_timeout = Some(stale);
        self
    }

    pub fn warn_hook(mut self, hook: WarnHook) -> Self {
        self.warn_hook = Some(hook);
        self
    }

    pub fn effective_stale_timeout(&self) -> Option<Duration> {
        self.stale_timeout.or(self.timeout)
    }

    pub(crate) fn warner(&self) -> Warner {
        Warner::new(self.warn_hook.clone())
    }

    /// Parameters for a plain `acquire()` call.
    pub fn acquire_defaults(&self) -> AcquireOptions {
        AcquireOptions {
            timeout: self.timeout,
            blocking: self.blocking,
            poll_interval: self.poll_interval,
        }
    }
}

impl fmt::Debug for LockOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockOptions")
            .field("timeout", &self.timeout)
            .field("blocking", &self.blocking)
            .field("poll_interval", &self.poll_interval)
            .field("fifo", &self.fifo)
            .field("stale_timeout", &self.stale_timeout)
            .field("warn_hook", &self.warn_hook.is_some())
            .finish()
    }
}

/// Per-call overrides for a single acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOptions {
    pub timeout: Option<Duration>,
    pub blocking: bool,
    pub poll_interval: Duration,
}

impl AcquireOptions {
    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Whether the OS-level lock may be taken with a blocking syscall.
    pub(crate) fn os_blocking(&self) -> bool {
        self.blocking && self.timeout.is_none()
    }
}
