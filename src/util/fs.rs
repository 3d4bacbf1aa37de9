use crate::error::{CleanupError, CleanupResult};
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

pub fn ensure_dir(path: &Path) -> io::Result<()> {
    if !path.is_dir() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub fn remove_file_if_exists(path: &Path, action: &'static str) -> CleanupResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CleanupError::io(action, path, e)),
    }
}

/// Age of a file based on its modification time. `None` if it cannot be stat'ed.
pub fn file_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    // mtime in the future (clock skew on a shared filesystem) counts as fresh
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_remove_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let removed = remove_file_if_exists(&dir.path().join("nope"), "remove").unwrap();
        assert!(!removed);
    }

    #[test]
    fn test_remove_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"x").unwrap();
        assert!(remove_file_if_exists(&path, "remove").unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_file_age_of_epoch_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old");
        let file = fs::File::create(&path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH).unwrap();
        let age = file_age(&path).unwrap();
        assert!(age > Duration::from_secs(365 * 24 * 3600));
    }

    #[test]
    fn test_ensure_dir_nested() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).unwrap();
    }
}
