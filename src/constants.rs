//! Centralized constants for lock layout, defaults, and Redis scripts.

use std::time::Duration;

/// Environment variable overriding the directory used for bare lock names.
pub const LOCK_DIR_ENV: &str = "FIFO_LOCK_DIR";

/// Suffix appended to a lock path to form its ticket queue directory.
pub const QUEUE_DIR_SUFFIX: &str = ".queue";

/// Name of the ticket counter file inside a queue directory.
pub const SEQ_FILE_NAME: &str = "seq";

/// Zero-padded width of the ticket number in ticket filenames.
pub const TICKET_WIDTH: usize = 20;

/// Default interval between lock attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default Redis connection URL used when none is configured.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1/";

/// Suffix of the Redis ticket counter key.
pub const REDIS_SEQ_SUFFIX: &str = ":seq";

/// Suffix of the Redis sorted-set queue key.
pub const REDIS_QUEUE_SUFFIX: &str = ":queue";

/// Bumps the counter `KEYS[1]` and adds `{ticket}:ARGV[1]` to the queue
/// `KEYS[2]` scored by that ticket, in one step so that the cleanup script
/// cannot run in between. Returns `{ticket, member}`.
pub const REGISTER_SCRIPT: &str = r#"
local ticket = redis.call('incr', KEYS[1])
local member = tostring(ticket) .. ':' .. ARGV[1]
redis.call('zadd', KEYS[2], ticket, member)
return {ticket, member}
"#;

/// Deletes `KEYS[1]` only when it still holds the caller's token `ARGV[1]`.
pub const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// Deletes the queue (`KEYS[1]`) and counter (`KEYS[2]`) only if the queue is empty.
pub const QUEUE_CLEANUP_SCRIPT: &str = r#"
if redis.call('zcard', KEYS[1]) == 0 then
    return redis.call('del', KEYS[1], KEYS[2])
else
    return -1
end
"#;
