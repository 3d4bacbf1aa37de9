//! Fair inter-process lock backed by a file.
//!
//! Mutual exclusion comes from an exclusive OS lock on `<lockpath>`. Fairness
//! comes from the [`FileTicketQueue`] in `<lockpath>.queue/`: each waiter takes
//! a ticket and only the waiter holding the smallest ticket tries the OS lock,
//! so waiters are served in arrival order instead of whichever one the
//! scheduler wakes first.
//!
//! ```no_run
//! use fifo_lock::{FifoLock, LockOptions};
//! use std::time::Duration;
//!
//! let mut lock = FifoLock::new("jobs.lock", LockOptions::new().timeout(Duration::from_secs(5)))?;
//! {
//!     let _guard = lock.lock()?;
//!     // critical section
//! }
//! lock.close();
//! # Ok::<(), fifo_lock::LockError>(())
//! ```

use crate::core::deadline::Deadline;
use crate::core::os_lock::{
    open_lock_file, remove_if_unlocked, still_linked, Attempt, OsLock, PlatformLock,
};
use crate::core::paths::LockPaths;
use crate::core::queue::file::FileTicketQueue;
use crate::core::queue::{wait_for_head, TicketQueue};
use crate::error::{LockError, Result};
use crate::models::options::{AcquireOptions, LockOptions};
use crate::models::settings::LockSettings;
use crate::util::warn::Warner;
use std::fmt;
use std::fs::File;
use std::path::Path;

pub struct FifoLock {
    paths: LockPaths,
    options: LockOptions,
    queue: Option<FileTicketQueue>,
    file: Option<File>,
    locked: bool,
    warner: Warner,
}

impl FifoLock {
    /// Bind a lock to `name`. A bare name is placed in the lock directory
    /// (`FIFO_LOCK_DIR` or the temp dir); a path is used as given.
    ///
    /// Nothing is locked or opened yet, so this only fails if the name is empty.
    pub fn new(name: &str, options: LockOptions) -> Result<Self> {
        if name.is_empty() {
            return Err(LockError::failure("lock name is empty"));
        }
        Ok(Self::with_paths(LockPaths::resolve(name, None), options))
    }

    pub fn at_path(path: &Path, options: LockOptions) -> Self {
        Self::with_paths(LockPaths::from_lock_file(path.to_path_buf()), options)
    }

    /// Bind `name` using a loaded settings file; its `lock_dir` wins over the
    /// environment for bare names.
    pub fn from_settings(name: &str, settings: &LockSettings) -> Result<Self> {
        if name.is_empty() {
            return Err(LockError::failure("lock name is empty"));
        }
        let paths = LockPaths::resolve(name, settings.lock_dir.as_deref());
        Ok(Self::with_paths(paths, settings.to_options()))
    }

    pub fn with_paths(paths: LockPaths, options: LockOptions) -> Self {
        let warner = options.warner();
        let queue = if options.fifo {
            match FileTicketQueue::open(&paths, options.effective_stale_timeout()) {
                Ok(queue) => Some(queue),
                Err(e) => {
                    warner.warn(&format!(
                        "fifo queue unavailable for {}, locking without fairness: {}",
                        paths, e
                    ));
                    None
                }
            }
        } else {
            None
        };
        Self {
            paths,
            options,
            queue,
            file: None,
            locked: false,
            warner,
        }
    }

    pub fn path(&self) -> &Path {
        &self.paths.lock_file
    }

    pub fn paths(&self) -> &LockPaths {
        &self.paths
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Acquire with the configured timeout and blocking mode.
    pub fn acquire(&mut self) -> Result<()> {
        let opts = self.options.acquire_defaults();
        self.acquire_with(opts)
    }

    /// Acquire without waiting; fails with `Timeout` if the lock is taken.
    pub fn try_acquire(&mut self) -> Result<()> {
        let opts = self.options.acquire_defaults().non_blocking();
        self.acquire_with(opts)
    }

    /// Acquire with per-call overrides. Acquiring a lock this handle already
    /// holds returns immediately.
    pub fn acquire_with(&mut self, opts: AcquireOptions) -> Result<()> {
        if self.locked {
            return Ok(());
        }
        let deadline = Deadline::after(opts.timeout);
        let name = self.paths.to_string();

        let mut queue = match self.queue.take() {
            Some(queue) => queue,
            None => return self.lock_os(&opts, &deadline),
        };
        let result = self.acquire_queued(&mut queue, &opts, &deadline, &name);
        self.queue = Some(queue);
        result
    }

    fn acquire_queued(
        &mut self,
        queue: &mut FileTicketQueue,
        opts: &AcquireOptions,
        deadline: &Deadline,
        name: &str,
    ) -> Result<()> {
        let ticket = match queue.register() {
            Ok(ticket) => ticket,
            Err(e) => {
                self.warner
                    .warn(&format!("cannot register ticket for {}, locking without fairness: {}", name, e));
                return self.lock_os(opts, deadline);
            }
        };

        let result = wait_for_head(queue, &ticket, deadline, opts, &self.warner, name)
            .and_then(|()| self.lock_os(opts, deadline));

        // runs on success and on every failure path
        self.warner.cleanup("remove ticket", queue.remove(&ticket.member));
        result
    }

    /// Take the OS lock, polling when a timeout or non-blocking mode is in effect.
    ///
    /// A descriptor left open across a `close()` by another handle may point at
    /// an unlinked file; locking that would exclude nobody, so the file is
    /// reopened until the lock lands on the one currently at the path.
    fn lock_os(&mut self, opts: &AcquireOptions, deadline: &Deadline) -> Result<()> {
        let name = self.paths.to_string();
        loop {
            let file = match self.file.take() {
                Some(file) => file,
                None => open_lock_file(&self.paths.lock_file)?,
            };
            let file = self.file.insert(file);

            if opts.os_blocking() {
                PlatformLock::lock(file)?;
            } else {
                loop {
                    if PlatformLock::try_lock(file)? == Attempt::Acquired {
                        break;
                    }
                    deadline.check(opts.blocking, &name)?;
                    deadline.sleep(opts.poll_interval);
                }
            }

            if still_linked(file, &self.paths.lock_file) {
                break;
            }
            let _ = PlatformLock::unlock(file);
            self.file = None;
            tracing::debug!(lock = %name, "lock file was replaced, reopening");
        }
        self.locked = true;
        tracing::debug!(lock = %self.paths, "lock acquired");
        Ok(())
    }

    /// Release the lock. A no-op when not held; an unlock failure is reported
    /// to the warn hook and the handle still counts as unlocked.
    pub fn release(&mut self) {
        if !self.locked {
            return;
        }
        if let Some(file) = self.file.as_ref() {
            if let Err(e) = PlatformLock::unlock(file) {
                self.warner
                    .warn(&format!("unlock {} failed: {}", self.paths, e));
            }
        }
        self.locked = false;
        tracing::debug!(lock = %self.paths, "lock released");
        if let Some(queue) = self.queue.as_mut() {
            self.warner.cleanup("reclaim stale ticket", queue.cleanup_stale());
        }
    }

    /// Acquire and return a guard that releases on drop.
    pub fn lock(&mut self) -> Result<FifoLockGuard<'_>> {
        self.acquire()?;
        Ok(FifoLockGuard { lock: self })
    }

    /// Release, close the descriptor, and remove queue artifacts and the lock
    /// file when nobody else is using them. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.release();
        // closing the descriptor also drops any OS lock still attached to it
        self.file = None;

        if let Some(queue) = self.queue.as_mut() {
            self.warner.cleanup("reclaim stale ticket", queue.cleanup_stale());
            self.warner.cleanup("remove queue", queue.maybe_cleanup());
        }

        self.warner
            .cleanup("remove lock file", remove_if_unlocked(&self.paths.lock_file));
    }
}

impl Drop for FifoLock {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for FifoLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<FifoLock path={:?} locked={}>",
            self.paths.lock_file, self.locked
        )
    }
}

impl fmt::Debug for FifoLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FifoLock")
            .field("paths", &self.paths)
            .field("options", &self.options)
            .field("locked", &self.locked)
            .field("fifo", &self.queue.is_some())
            .finish()
    }
}

/// Holds a [`FifoLock`] for the guard's lifetime.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct FifoLockGuard<'a> {
    lock: &'a mut FifoLock,
}

impl FifoLockGuard<'_> {
    pub fn path(&self) -> &Path {
        self.lock.path()
    }
}

impl Drop for FifoLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
