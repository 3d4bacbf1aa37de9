//! Reentrant wrapper around [`FifoLock`].
//!
//! The owning (process, thread) may acquire again without contending; the
//! file lock is taken on the first acquire and given back on the matching
//! last release. Threads of the same process are arbitrated with a mutex and
//! condvar, since the OS lock cannot tell two threads sharing a descriptor
//! apart.

use crate::core::deadline::Deadline;
use crate::core::fifo_lock::FifoLock;
use crate::core::paths::LockPaths;
use crate::error::Result;
use crate::models::options::{AcquireOptions, LockOptions};
use crate::models::settings::LockSettings;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

type Owner = (u32, ThreadId);

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<Owner>,
    depth: usize,
}

pub struct ReentrantFifoLock {
    inner: Mutex<FifoLock>,
    state: Mutex<Ownership>,
    released: Condvar,
    defaults: AcquireOptions,
    path: PathBuf,
}

fn current_owner() -> Owner {
    (std::process::id(), thread::current().id())
}

impl ReentrantFifoLock {
    pub fn new(name: &str, options: LockOptions) -> Result<Self> {
        Ok(Self::from_lock(FifoLock::new(name, options)?))
    }

    pub fn at_path(path: &Path, options: LockOptions) -> Self {
        Self::from_lock(FifoLock::at_path(path, options))
    }

    pub fn with_paths(paths: LockPaths, options: LockOptions) -> Self {
        Self::from_lock(FifoLock::with_paths(paths, options))
    }

    pub fn from_settings(name: &str, settings: &LockSettings) -> Result<Self> {
        Ok(Self::from_lock(FifoLock::from_settings(name, settings)?))
    }

    fn from_lock(lock: FifoLock) -> Self {
        let defaults = lock.options().acquire_defaults();
        let path = lock.path().to_path_buf();
        Self {
            inner: Mutex::new(lock),
            state: Mutex::new(Ownership::default()),
            released: Condvar::new(),
            defaults,
            path,
        }
    }

    fn state(&self) -> MutexGuard<'_, Ownership> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn inner(&self) -> MutexGuard<'_, FifoLock> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Nesting depth held by the calling thread (0 when it is not the owner).
    pub fn depth(&self) -> usize {
        let state = self.state();
        if state.owner == Some(current_owner()) {
            state.depth
        } else {
            0
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state().depth > 0
    }

    pub fn acquire(&self) -> Result<()> {
        self.acquire_with(self.defaults)
    }

    pub fn try_acquire(&self) -> Result<()> {
        self.acquire_with(self.defaults.non_blocking())
    }

    pub fn acquire_with(&self, opts: AcquireOptions) -> Result<()> {
        let me = current_owner();
        let deadline = Deadline::after(opts.timeout);

        {
            let mut state = self.state();
            if state.owner == Some(me) {
                state.depth += 1;
                return Ok(());
            }
            while state.owner.is_some() {
                deadline.check(opts.blocking, &self.path.display().to_string())?;
                state = match deadline.remaining() {
                    Some(left) => {
                        self.released
                            .wait_timeout(state, left)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0
                    }
                    None => self
                        .released
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner),
                };
            }
            // claimed: depth stays 0 until the file lock is actually held
            state.owner = Some(me);
        }

        let remaining = opts.with_timeout(deadline.remaining());
        let result = self.inner().acquire_with(remaining);

        let mut state = self.state();
        match result {
            Ok(()) => {
                state.depth = 1;
                Ok(())
            }
            Err(e) => {
                state.owner = None;
                state.depth = 0;
                drop(state);
                self.released.notify_one();
                Err(e)
            }
        }
    }

    /// Undo one acquire by the owning thread. Releases the file lock at depth
    /// zero; a call from a thread that does not own the lock does nothing.
    pub fn release(&self) {
        let mut state = self.state();
        if state.owner != Some(current_owner()) || state.depth == 0 {
            return;
        }
        state.depth -= 1;
        if state.depth > 0 {
            return;
        }
        self.inner().release();
        state.owner = None;
        drop(state);
        self.released.notify_one();
    }

    pub fn lock(&self) -> Result<ReentrantGuard<'_>> {
        self.acquire()?;
        Ok(ReentrantGuard { lock: self })
    }

    /// Fully release if the calling thread owns the lock, then close the
    /// underlying [`FifoLock`].
    pub fn close(&self) {
        let mut state = self.state();
        if state.owner == Some(current_owner()) && state.depth > 0 {
            state.depth = 0;
            state.owner = None;
            self.released.notify_all();
        }
        if state.owner.is_none() {
            self.inner().close();
        }
    }
}

impl fmt::Display for ReentrantFifoLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        write!(
            f,
            "<ReentrantFifoLock path={:?} locked={} depth={}>",
            self.path,
            state.depth > 0,
            state.depth
        )
    }
}

impl fmt::Debug for ReentrantFifoLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantFifoLock")
            .field("path", &self.path)
            .field("state", &*self.state())
            .finish()
    }
}

#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReentrantGuard<'a> {
    lock: &'a ReentrantFifoLock,
}

impl ReentrantGuard<'_> {
    pub fn depth(&self) -> usize {
        self.lock.depth()
    }
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
