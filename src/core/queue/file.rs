//! Filesystem ticket queue.
//!
//! Layout of `<lockpath>.queue/`:
//! - `seq`: decimal ticket counter, bumped under an exclusive flock.
//! - `{ticket:020}.{pid}.{hex}`: one file per waiter; its mtime is the
//!   registration time used for staleness.
//!
//! Zero padding makes the lexicographically first filename the head. When the
//! counter cannot be locked a timestamp-derived ticket is used instead, which
//! keeps the queue working but only orders waiters on a best-effort basis.

use crate::core::os_lock::{still_linked, Attempt, OsLock, PlatformLock};
use crate::core::paths::LockPaths;
use crate::core::queue::TicketQueue;
use crate::error::{CleanupError, CleanupResult, LockError, Result};
use crate::models::ticket::{file_member, parse_file_member, random_hex, Ticket};
use crate::util::fs::{ensure_dir, file_age, remove_file_if_exists};
use chrono::Utc;
use rand::Rng;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Attempts at bumping the counter before giving up on it.
const COUNTER_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct FileTicketQueue {
    queue_dir: PathBuf,
    seq_file: PathBuf,
    stale_timeout: Option<Duration>,
}

impl FileTicketQueue {
    pub fn new(paths: &LockPaths, stale_timeout: Option<Duration>) -> Self {
        Self {
            queue_dir: paths.queue_dir.clone(),
            seq_file: paths.seq_file.clone(),
            stale_timeout,
        }
    }

    /// Like [`new`](Self::new), but creates the queue directory up front so the
    /// first registration does not race its creation.
    pub fn open(paths: &LockPaths, stale_timeout: Option<Duration>) -> io::Result<Self> {
        ensure_dir(&paths.queue_dir)?;
        Ok(Self::new(paths, stale_timeout))
    }

    pub fn queue_dir(&self) -> &Path {
        &self.queue_dir
    }

    /// Ticket filenames currently in the queue, sorted (head first).
    pub fn members(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.queue_dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if parse_file_member(name).is_some() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn head(&self) -> io::Result<Option<String>> {
        match self.members() {
            Ok(names) => Ok(names.into_iter().next()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Open and exclusively lock the counter file.
    ///
    /// Retries when `maybe_cleanup` unlinked the file between our open and our
    /// lock, since bumping an unlinked counter would restart numbering.
    fn lock_counter(&self) -> Result<File> {
        for _ in 0..COUNTER_ATTEMPTS {
            ensure_dir(&self.queue_dir).map_err(|e| {
                LockError::failure(format!("create {}: {}", self.queue_dir.display(), e))
            })?;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.seq_file)
                .map_err(|e| {
                    LockError::failure(format!("open {}: {}", self.seq_file.display(), e))
                })?;
            PlatformLock::lock(&file)?;
            if still_linked(&file, &self.seq_file) {
                return Ok(file);
            }
            let _ = PlatformLock::unlock(&file);
        }
        Err(LockError::failure(format!(
            "counter {} kept disappearing",
            self.seq_file.display()
        )))
    }

    fn write_ticket_file(&self, member: &str) -> io::Result<()> {
        let path = self.queue_dir.join(member);
        let stamp = Utc::now().timestamp_micros().to_string();
        match fs::write(&path, &stamp) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                ensure_dir(&self.queue_dir)?;
                fs::write(&path, &stamp)
            }
            other => other,
        }
    }

    fn register_with_counter(&self) -> Result<Ticket> {
        let mut counter = self.lock_counter()?;
        // the ticket file is written while the counter is still locked, so
        // `maybe_cleanup` never sees an issued ticket without its file
        let result = bump(&mut counter).and_then(|number| {
            let member = file_member(number, std::process::id(), &random_hex());
            self.write_ticket_file(&member)
                .map_err(|e| {
                    LockError::failure(format!("create ticket in {}: {}", self.queue_dir.display(), e))
                })?;
            Ok(Ticket { number, member })
        });
        let _ = PlatformLock::unlock(&counter);
        result
    }

    fn register_fallback(&self) -> Result<Ticket> {
        let number = fallback_ticket();
        let member = file_member(number, std::process::id(), &random_hex());
        self.write_ticket_file(&member).map_err(|e| {
            LockError::failure(format!("create ticket in {}: {}", self.queue_dir.display(), e))
        })?;
        Ok(Ticket { number, member })
    }
}

impl TicketQueue for FileTicketQueue {
    fn register(&mut self) -> Result<Ticket> {
        let ticket = match self.register_with_counter() {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::debug!(
                    queue = %self.queue_dir.display(),
                    error = %e,
                    "ticket counter unavailable, using timestamp ticket"
                );
                self.register_fallback()?
            }
        };
        tracing::debug!(queue = %self.queue_dir.display(), ticket = %ticket, "registered ticket");
        Ok(ticket)
    }

    fn is_head(&mut self, ticket: u64) -> Result<bool> {
        let head = self.head().map_err(|e| {
            LockError::failure(format!("list queue {}: {}", self.queue_dir.display(), e))
        })?;
        Ok(head.and_then(|name| parse_file_member(&name)) == Some(ticket))
    }

    fn remove(&mut self, member: &str) -> CleanupResult {
        remove_file_if_exists(&self.queue_dir.join(member), "remove ticket").map(|_| ())
    }

    fn cleanup_stale_except(&mut self, keep: Option<&str>) -> CleanupResult<bool> {
        let stale = match self.stale_timeout {
            Some(stale) => stale,
            None => return Ok(false),
        };
        let head = match self.head() {
            Ok(Some(head)) => head,
            Ok(None) => return Ok(false),
            Err(e) => return Err(CleanupError::io("list queue", &self.queue_dir, e)),
        };
        if keep == Some(head.as_str()) {
            return Ok(false);
        }
        let path = self.queue_dir.join(&head);
        match file_age(&path) {
            Some(age) if age >= stale => {
                let removed = remove_file_if_exists(&path, "remove stale ticket")?;
                if removed {
                    tracing::debug!(ticket = %head, age_ms = age.as_millis() as u64, "removed stale ticket");
                }
                Ok(removed)
            }
            _ => Ok(false),
        }
    }

    fn is_empty(&mut self) -> bool {
        match self.members() {
            Ok(names) => names.is_empty(),
            Err(e) => e.kind() == io::ErrorKind::NotFound,
        }
    }

    fn maybe_cleanup(&mut self) -> CleanupResult {
        if !self.is_empty() {
            return Ok(());
        }
        if self.seq_file.exists() {
            let counter = match OpenOptions::new().read(true).write(true).open(&self.seq_file) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(CleanupError::io("open counter", &self.seq_file, e)),
            };
            // a held counter means a registration is in flight
            if !matches!(PlatformLock::try_lock(&counter), Ok(Attempt::Acquired)) {
                return Ok(());
            }
            if !self.is_empty() {
                let _ = PlatformLock::unlock(&counter);
                return Ok(());
            }
            #[cfg(windows)]
            drop(counter);
            remove_file_if_exists(&self.seq_file, "remove counter")?;
        }
        // fails while other artifacts remain, which means the queue is in use
        let _ = fs::remove_dir(&self.queue_dir);
        Ok(())
    }
}

fn bump(counter: &mut File) -> Result<u64> {
    let mut raw = String::new();
    counter
        .seek(SeekFrom::Start(0))
        .and_then(|_| counter.read_to_string(&mut raw))
        .map_err(|e| LockError::failure(format!("read ticket counter: {}", e)))?;
    let current: u64 = match raw.trim() {
        "" => 0,
        text => text
            .parse()
            .map_err(|_| LockError::failure(format!("malformed ticket counter {:?}", text)))?,
    };
    let next = current + 1;
    counter
        .seek(SeekFrom::Start(0))
        .and_then(|_| counter.set_len(0))
        .and_then(|_| counter.write_all(next.to_string().as_bytes()))
        .and_then(|_| counter.flush())
        .map_err(|e| LockError::failure(format!("write ticket counter: {}", e)))?;
    Ok(next)
}

/// Timestamp-derived ticket: microseconds since the epoch times 1000 plus a
/// random 0..1000 tie breaker. Fits in 20 digits until far past year 2500.
fn fallback_ticket() -> u64 {
    let micros = Utc::now().timestamp_micros().max(0) as u64;
    micros
        .saturating_mul(1000)
        .saturating_add(rand::thread_rng().gen_range(0..1000))
}
