//! Redis ticket queue: `INCR <name>:seq` hands out tickets, and waiters sit in
//! the sorted set `<name>:queue` as `{ticket}:{token}:{timestamp_ms}` scored by
//! ticket. The timestamp is wall-clock epoch milliseconds so that staleness
//! is comparable between hosts.

use crate::constants;
use crate::core::queue::TicketQueue;
use crate::error::{CleanupError, CleanupResult, Result};
use crate::models::ticket::{parse_redis_member, random_hex, Ticket};
use chrono::Utc;
use redis::{Client, Connection, RedisResult};
use std::time::Duration;

/// A connection opened on first use and dropped after I/O failures so the
/// next call reconnects.
pub(crate) struct LazyConnection {
    client: Client,
    conn: Option<Connection>,
}

impl LazyConnection {
    pub(crate) fn new(client: Client) -> Self {
        Self { client, conn: None }
    }

    pub(crate) fn run<T, F>(&mut self, op: F) -> RedisResult<T>
    where
        F: FnOnce(&mut Connection) -> RedisResult<T>,
    {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.client.get_connection()?,
        };
        let conn = self.conn.insert(conn);
        let result = op(conn);
        if let Err(ref e) = result {
            if e.is_io_error() || e.is_connection_dropped() {
                self.conn = None;
            }
        }
        result
    }
}

pub struct RedisTicketQueue {
    name: String,
    queue_key: String,
    seq_key: String,
    conn: LazyConnection,
    stale_timeout: Option<Duration>,
}

impl RedisTicketQueue {
    pub fn new(name: &str, client: Client, stale_timeout: Option<Duration>) -> Self {
        Self {
            name: name.to_string(),
            queue_key: format!("{}{}", name, constants::REDIS_QUEUE_SUFFIX),
            seq_key: format!("{}{}", name, constants::REDIS_SEQ_SUFFIX),
            conn: LazyConnection::new(client),
            stale_timeout,
        }
    }

    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    pub fn seq_key(&self) -> &str {
        &self.seq_key
    }

    fn head(&mut self) -> RedisResult<Option<String>> {
        let key = self.queue_key.clone();
        let head: Vec<String> = self
            .conn
            .run(|c| redis::cmd("ZRANGE").arg(&key).arg(0).arg(0).query(c))?;
        Ok(head.into_iter().next())
    }

    fn cleanup_err(&self, e: redis::RedisError) -> CleanupError {
        CleanupError::Redis {
            key: self.queue_key.clone(),
            message: e.to_string(),
        }
    }
}

impl TicketQueue for RedisTicketQueue {
    fn register(&mut self) -> Result<Ticket> {
        let seq_key = self.seq_key.clone();
        let queue_key = self.queue_key.clone();
        let suffix = format!("{}:{}", random_hex(), Utc::now().timestamp_millis());
        let (number, member): (u64, String) = self.conn.run(|c| {
            redis::Script::new(constants::REGISTER_SCRIPT)
                .key(&seq_key)
                .key(&queue_key)
                .arg(&suffix)
                .invoke(c)
        })?;
        let ticket = Ticket { number, member };
        tracing::debug!(lock = %self.name, ticket = %ticket, "registered redis ticket");
        Ok(ticket)
    }

    fn is_head(&mut self, ticket: u64) -> Result<bool> {
        let head = self.head()?;
        Ok(head.and_then(|m| parse_redis_member(&m)).map(|(n, _)| n) == Some(ticket))
    }

    fn remove(&mut self, member: &str) -> CleanupResult {
        let key = self.queue_key.clone();
        self.conn
            .run(|c| redis::cmd("ZREM").arg(&key).arg(member).query::<i64>(c))
            .map(|_| ())
            .map_err(|e| self.cleanup_err(e))
    }

    fn cleanup_stale_except(&mut self, keep: Option<&str>) -> CleanupResult<bool> {
        let stale = match self.stale_timeout {
            Some(stale) => stale,
            None => return Ok(false),
        };
        let head = match self.head().map_err(|e| self.cleanup_err(e))? {
            Some(head) => head,
            None => return Ok(false),
        };
        if keep == Some(head.as_str()) {
            return Ok(false);
        }
        let registered_ms = match parse_redis_member(&head) {
            Some((_, ts)) => ts,
            None => return Ok(false),
        };
        let age_ms = Utc::now().timestamp_millis().saturating_sub(registered_ms);
        if age_ms < 0 || (age_ms as u128) < stale.as_millis() {
            return Ok(false);
        }
        self.remove(&head)?;
        tracing::debug!(lock = %self.name, member = %head, age_ms, "removed stale redis ticket");
        Ok(true)
    }

    fn is_empty(&mut self) -> bool {
        let key = self.queue_key.clone();
        // errors count as busy so that cleanup never deletes live state
        matches!(
            self.conn.run(|c| redis::cmd("ZCARD").arg(&key).query::<u64>(c)),
            Ok(0)
        )
    }

    fn maybe_cleanup(&mut self) -> CleanupResult {
        let queue_key = self.queue_key.clone();
        let seq_key = self.seq_key.clone();
        self.conn
            .run(|c| {
                redis::Script::new(constants::QUEUE_CLEANUP_SCRIPT)
                    .key(&queue_key)
                    .key(&seq_key)
                    .invoke::<i64>(c)
            })
            .map(|_| ())
            .map_err(|e| self.cleanup_err(e))
    }
}
