use crate::error::{LockError, Result};
use std::time::{Duration, Instant};

/// Absolute, monotonic end of an acquire attempt. `None` means unbounded.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|t| Instant::now() + t))
    }

    pub fn unbounded() -> Self {
        Self(None)
    }

    pub fn expired(&self) -> bool {
        matches!(self.0, Some(at) if Instant::now() >= at)
    }

    /// Time left, saturating at zero. `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Fail with `Timeout` when waiting longer is not allowed.
    pub fn check(&self, blocking: bool, name: &str) -> Result<()> {
        if !blocking {
            return Err(LockError::timeout(format!(
                "lock '{}' is already held and blocking is false",
                name
            )));
        }
        if self.expired() {
            return Err(LockError::timeout(format!(
                "timeout while waiting for lock '{}'",
                name
            )));
        }
        Ok(())
    }

    /// Sleep for `interval`, but not past the deadline.
    pub fn sleep(&self, interval: Duration) {
        let nap = match self.remaining() {
            Some(left) => interval.min(left),
            None => interval,
        };
        if !nap.is_zero() {
            std::thread::sleep(nap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_never_expires() {
        let d = Deadline::after(None);
        assert!(!d.expired());
        assert_eq!(d.remaining(), None);
    }

    #[test]
    fn test_zero_timeout_is_expired() {
        let d = Deadline::after(Some(Duration::ZERO));
        assert!(d.expired());
        assert_eq!(d.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_check() {
        assert!(Deadline::unbounded().check(true, "x").is_ok());
        assert!(Deadline::unbounded().check(false, "x").unwrap_err().is_timeout());
        let d = Deadline::after(Some(Duration::ZERO));
        let err = d.check(true, "x").unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("'x'"));
    }

    #[test]
    fn test_sleep_is_capped_by_deadline() {
        let d = Deadline::after(Some(Duration::from_millis(20)));
        let start = Instant::now();
        d.sleep(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(d.expired());
    }
}
