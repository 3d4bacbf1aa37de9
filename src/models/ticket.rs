//! Queue tickets and the member identifiers that encode them.

use crate::constants::{SEQ_FILE_NAME, TICKET_WIDTH};
use rand::Rng;
use std::fmt;

/// A waiter's place in line: its ticket number and backend-specific member id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub number: u64,
    pub member: String,
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.number, self.member)
    }
}

/// Random lowercase hex string of 32 characters.
pub fn random_hex() -> String {
    format!("{:032x}", rand::thread_rng().gen::<u128>())
}

/// Ticket filename: `{ticket:020}.{pid}.{hex}`.
pub fn file_member(number: u64, pid: u32, nonce: &str) -> String {
    format!("{:0width$}.{}.{}", number, pid, nonce, width = TICKET_WIDTH)
}

/// Ticket number of a queue directory entry, `None` for anything else.
pub fn parse_file_member(name: &str) -> Option<u64> {
    if name == SEQ_FILE_NAME {
        return None;
    }
    let mut parts = name.splitn(3, '.');
    let number = parts.next()?;
    let pid = parts.next()?;
    let nonce = parts.next()?;
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if pid.parse::<u32>().is_err() || nonce.is_empty() {
        return None;
    }
    number.parse().ok()
}

/// Redis sorted-set member: `{ticket}:{token}:{timestamp_ms}`.
pub fn redis_member(number: u64, token: &str, timestamp_ms: i64) -> String {
    format!("{}:{}:{}", number, token, timestamp_ms)
}

/// Split a Redis member into `(ticket, timestamp_ms)`.
pub fn parse_redis_member(member: &str) -> Option<(u64, i64)> {
    let mut parts = member.split(':');
    let number = parts.next()?.parse().ok()?;
    let _token = parts.next()?;
    let timestamp = parts.next()?.parse().ok()?;
    Some((number, timestamp))
}
