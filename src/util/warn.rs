//! Warning sink for non-fatal cleanup failures.
//!
//! Best-effort: a failing or absent hook must not change lock behaviour.

use crate::error::CleanupResult;
use std::fmt;
use std::sync::Arc;

/// Caller-supplied callback receiving one warning line.
pub type WarnHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Warner {
    hook: Option<WarnHook>,
}

impl Warner {
    pub fn new(hook: Option<WarnHook>) -> Self {
        Self { hook }
    }

    /// Forward a line to the hook, or to `tracing` when none was injected.
    pub fn warn(&self, line: &str) {
        match &self.hook {
            Some(hook) => hook(line),
            None => tracing::warn!("{}", line),
        }
    }

    /// Report a failed cleanup step and discard it.
    pub fn cleanup<T>(&self, context: &str, result: CleanupResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.warn(&format!("{}: {}", context, e));
                None
            }
        }
    }
}

impl fmt::Debug for Warner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Warner")
            .field("hook", &self.hook.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CleanupError;
    use std::sync::Mutex;

    #[test]
    fn test_hook_receives_cleanup_failure() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&seen);
        let warner = Warner::new(Some(Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        })));

        let res: CleanupResult = Err(CleanupError::Redis {
            key: "k".into(),
            message: "boom".into(),
        });
        assert!(warner.cleanup("drop queue", res).is_none());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("drop queue: "));
    }

    #[test]
    fn test_without_hook_passes_value_through() {
        let warner = Warner::default();
        assert_eq!(warner.cleanup("noop", Ok(7)), Some(7));
    }
}
