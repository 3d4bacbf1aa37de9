//! Ticket queues giving lock waiters a FIFO order.
//!
//! A waiter registers to obtain a [`Ticket`], then polls until its ticket is
//! the smallest one still registered (the head). Only the head may attempt
//! the real lock. Two backends implement [`TicketQueue`]:
//!
//! - [`file::FileTicketQueue`] — counter file plus one file per waiter in
//!   `<lockpath>.queue/`.
//! - `redis::RedisTicketQueue` — `INCR` counter plus a sorted set (feature `redis`).

pub mod file;
#[cfg(feature = "redis")]
pub mod redis;

use crate::core::deadline::Deadline;
use crate::error::{CleanupResult, Result};
use crate::models::options::AcquireOptions;
use crate::models::ticket::Ticket;
use crate::util::warn::Warner;

pub trait TicketQueue {
    /// Allocate a ticket and durably record the waiter.
    fn register(&mut self) -> Result<Ticket>;

    /// True iff `ticket` is the smallest registered ticket. An absent queue is `false`.
    fn is_head(&mut self, ticket: u64) -> Result<bool>;

    /// Remove a member. Removing an absent member succeeds.
    fn remove(&mut self, member: &str) -> CleanupResult;

    /// Drop the head member if it is older than the staleness threshold,
    /// unless it is `keep`. Returns whether a member was removed.
    fn cleanup_stale_except(&mut self, keep: Option<&str>) -> CleanupResult<bool>;

    fn cleanup_stale(&mut self) -> CleanupResult<bool> {
        self.cleanup_stale_except(None)
    }

    /// True when no waiter is registered. Errors count as "not empty".
    fn is_empty(&mut self) -> bool;

    /// Delete backing storage if the queue is empty and idle.
    fn maybe_cleanup(&mut self) -> CleanupResult;
}

/// Poll until `ticket` is head of `queue`, reclaiming stale heads on the way.
/// The caller's own ticket is never reclaimed, however long it has waited.
///
/// Does not remove `ticket` on failure; callers own that cleanup.
pub(crate) fn wait_for_head<Q>(
    queue: &mut Q,
    ticket: &Ticket,
    deadline: &Deadline,
    opts: &AcquireOptions,
    warner: &Warner,
    name: &str,
) -> Result<()>
where
    Q: TicketQueue + ?Sized,
{
    loop {
        warner.cleanup(
            "reclaim stale ticket",
            queue.cleanup_stale_except(Some(&ticket.member)),
        );
        if queue.is_head(ticket.number)? {
            tracing::debug!(lock = %name, ticket = ticket.number, "reached head of queue");
            return Ok(());
        }
        deadline.check(opts.blocking, name)?;
        deadline.sleep(opts.poll_interval);
    }
}
