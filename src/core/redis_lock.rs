//! Distributed FIFO lock on Redis.
//!
//! The lock itself is `SET <name> <token> NX [PX <timeout_ms>]`; the random
//! token proves ownership and release deletes the key only while it still
//! holds that token. With fairness on, waiters first queue in
//! [`RedisTicketQueue`] and only the head issues the `SET`.

use crate::constants;
use crate::core::deadline::Deadline;
use crate::core::queue::redis::{LazyConnection, RedisTicketQueue};
use crate::core::queue::{wait_for_head, TicketQueue};
use crate::error::{LockError, Result};
use crate::models::options::{AcquireOptions, LockOptions};
use crate::models::settings::LockSettings;
use crate::models::ticket::{random_hex, Ticket};
use crate::util::warn::Warner;
use redis::Client;
use std::fmt;

pub struct RedisFifoLock {
    name: String,
    options: LockOptions,
    conn: LazyConnection,
    queue: Option<RedisTicketQueue>,
    token: Option<String>,
    queue_member: Option<String>,
    warner: Warner,
}

impl RedisFifoLock {
    pub fn new(name: &str, client: Client, options: LockOptions) -> Self {
        let queue = options
            .fifo
            .then(|| RedisTicketQueue::new(name, client.clone(), options.effective_stale_timeout()));
        Self {
            name: name.to_string(),
            warner: options.warner(),
            options,
            conn: LazyConnection::new(client),
            queue,
            token: None,
            queue_member: None,
        }
    }

    /// Build from a connection URL. The URL is validated here, not on first use.
    pub fn open(url: &str, name: &str, options: LockOptions) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| LockError::failure(format!("invalid redis url '{}': {}", url, e)))?;
        Ok(Self::new(name, client, options))
    }

    pub fn from_settings(name: &str, settings: &LockSettings) -> Result<Self> {
        Self::open(settings.redis_url(), name, settings.to_options())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_locked(&self) -> bool {
        self.token.is_some()
    }

    /// Ownership token stored in the lock key while held.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn acquire(&mut self) -> Result<()> {
        let opts = self.options.acquire_defaults();
        self.acquire_with(opts)
    }

    pub fn try_acquire(&mut self) -> Result<()> {
        let opts = self.options.acquire_defaults().non_blocking();
        self.acquire_with(opts)
    }

    /// Acquire with per-call overrides. The key expires after `opts.timeout`
    /// when one is given, so a crashed holder cannot keep it forever.
    pub fn acquire_with(&mut self, opts: AcquireOptions) -> Result<()> {
        if self.token.is_some() {
            return Ok(());
        }
        let deadline = Deadline::after(opts.timeout);
        let expiry_ms = opts.timeout.map(|t| (t.as_millis() as u64).max(1));
        let token = random_hex();

        let mut queue = match self.queue.take() {
            Some(queue) => queue,
            None => return self.acquire_direct(&token, expiry_ms, &opts, &deadline),
        };
        let result = self.acquire_queued(&mut queue, &token, expiry_ms, &opts, &deadline);
        self.queue = Some(queue);
        result
    }

    fn acquire_direct(
        &mut self,
        token: &str,
        expiry_ms: Option<u64>,
        opts: &AcquireOptions,
        deadline: &Deadline,
    ) -> Result<()> {
        loop {
            if self.try_set(token, expiry_ms)? {
                return Ok(());
            }
            deadline.check(opts.blocking, &self.name)?;
            deadline.sleep(opts.poll_interval);
        }
    }

    fn acquire_queued(
        &mut self,
        queue: &mut RedisTicketQueue,
        token: &str,
        expiry_ms: Option<u64>,
        opts: &AcquireOptions,
        deadline: &Deadline,
    ) -> Result<()> {
        let ticket = queue.register()?;
        self.queue_member = Some(ticket.member.clone());

        let result = self.wait_and_set(queue, &ticket, token, expiry_ms, opts, deadline);

        // a failed removal is retried by `release`
        if self
            .warner
            .cleanup("remove queue entry", queue.remove(&ticket.member))
            .is_some()
        {
            self.queue_member = None;
        }
        result
    }

    fn wait_and_set(
        &mut self,
        queue: &mut RedisTicketQueue,
        ticket: &Ticket,
        token: &str,
        expiry_ms: Option<u64>,
        opts: &AcquireOptions,
        deadline: &Deadline,
    ) -> Result<()> {
        loop {
            wait_for_head(queue, ticket, deadline, opts, &self.warner, &self.name)?;
            if self.try_set(token, expiry_ms)? {
                return Ok(());
            }
            // lost the race at the head (e.g. a non-fair client); keep polling
            deadline.check(opts.blocking, &self.name)?;
            deadline.sleep(opts.poll_interval);
        }
    }

    fn try_set(&mut self, token: &str, expiry_ms: Option<u64>) -> Result<bool> {
        let name = self.name.clone();
        let reply: Option<String> = self.conn.run(|c| {
            let mut cmd = redis::cmd("SET");
            cmd.arg(&name).arg(token).arg("NX");
            if let Some(ms) = expiry_ms {
                cmd.arg("PX").arg(ms);
            }
            cmd.query(c)
        })?;
        if reply.is_some() {
            self.token = Some(token.to_string());
            tracing::debug!(lock = %self.name, "redis lock acquired");
        }
        Ok(reply.is_some())
    }

    /// Release if held by this instance. The key is deleted only while it
    /// still holds our token; a key that expired and was re-acquired by
    /// another client is left alone.
    pub fn release(&mut self) -> Result<()> {
        let token = match self.token.take() {
            Some(token) => token,
            None => return Ok(()),
        };
        let name = self.name.clone();
        let result = self.conn.run(|c| {
            redis::Script::new(constants::RELEASE_SCRIPT)
                .key(&name)
                .arg(&token)
                .invoke::<i64>(c)
        });

        if let Some(member) = self.queue_member.take() {
            if let Some(queue) = self.queue.as_mut() {
                self.warner
                    .cleanup("remove queue entry", queue.remove(&member));
            }
        }

        match result {
            Ok(0) => {
                tracing::debug!(lock = %self.name, "redis lock was no longer owned at release");
                Ok(())
            }
            Ok(_) => {
                tracing::debug!(lock = %self.name, "redis lock released");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn lock(&mut self) -> Result<RedisLockGuard<'_>> {
        self.acquire()?;
        Ok(RedisLockGuard { lock: self })
    }

    /// Release if held, then delete the queue keys when no waiter remains.
    /// Never fails; problems go to the warn hook.
    pub fn close(&mut self) {
        if let Err(e) = self.release() {
            self.warner
                .warn(&format!("release redis lock '{}' failed: {}", self.name, e));
        }
        if let Some(queue) = self.queue.as_mut() {
            self.warner.cleanup("remove queue keys", queue.maybe_cleanup());
        }
    }
}

impl Drop for RedisFifoLock {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for RedisFifoLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<RedisFifoLock name={:?} locked={}>",
            self.name,
            self.is_locked()
        )
    }
}

impl fmt::Debug for RedisFifoLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisFifoLock")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("locked", &self.is_locked())
            .field("fifo", &self.queue.is_some())
            .finish()
    }
}

#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct RedisLockGuard<'a> {
    lock: &'a mut RedisFifoLock,
}

impl RedisLockGuard<'_> {
    pub fn token(&self) -> Option<&str> {
        self.lock.token()
    }
}

impl Drop for RedisLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            self.lock
                .warner
                .warn(&format!("release redis lock '{}' failed: {}", self.lock.name, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_fails_eagerly() {
        let err = RedisFifoLock::open("not a url", "jobs", LockOptions::default()).unwrap_err();
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("invalid redis url"));
    }

    #[test]
    fn test_release_unheld_is_noop() {
        // no server is contacted when nothing is held
        let mut lock =
            RedisFifoLock::open("redis://127.0.0.1:1/", "jobs", LockOptions::default().fifo(false))
                .unwrap();
        assert!(!lock.is_locked());
        lock.release().unwrap();
        lock.release().unwrap();
    }

    #[test]
    fn test_unreachable_server_is_lock_failure() {
        let mut lock = RedisFifoLock::open(
            "redis://127.0.0.1:1/",
            "jobs",
            LockOptions::default().fifo(false),
        )
        .unwrap();
        let err = lock.try_acquire().unwrap_err();
        assert!(!err.is_timeout());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_display() {
        let lock =
            RedisFifoLock::open("redis://127.0.0.1:1/", "jobs", LockOptions::default().fifo(false))
                .unwrap();
        assert_eq!(lock.to_string(), "<RedisFifoLock name=\"jobs\" locked=false>");
    }
}
