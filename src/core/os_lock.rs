//! Exclusive OS-level file locks: flock(2) on unix, LockFileEx on windows.
//!
//! The backend is chosen at compile time and exposed as [`PlatformLock`].
//! Every backend classifies failures into "contended, retry later" and fatal
//! errors; only the latter become [`LockError::LockFailure`].

use crate::error::{CleanupError, CleanupResult, LockError, Result};
use crate::util::fs::remove_file_if_exists;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Outcome of a non-blocking lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Acquired,
    Busy,
}

pub trait OsLock {
    /// Try to take the exclusive lock without blocking.
    fn try_lock(file: &File) -> Result<Attempt>;

    /// Block until the exclusive lock is held.
    fn lock(file: &File) -> Result<()>;

    fn unlock(file: &File) -> io::Result<()>;
}

#[cfg(unix)]
pub type PlatformLock = PosixLock;
#[cfg(windows)]
pub type PlatformLock = WindowsLock;
#[cfg(not(any(unix, windows)))]
pub type PlatformLock = UnsupportedLock;

/// Open (creating if needed) a lock file for locking. Never truncates.
pub fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        crate::util::fs::ensure_dir(parent).map_err(|e| {
            LockError::failure(format!("create lock directory {}: {}", parent.display(), e))
        })?;
    }
    OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| LockError::failure(format!("open lock file {}: {}", path.display(), e)))
}

/// Remove the lock file at `path` if nobody holds it.
///
/// The file is unlinked while our own lock on it is still held, so no other
/// descriptor can lock it in between. Descriptors opened before the removal
/// notice it through [`still_linked`] and reopen.
pub fn remove_if_unlocked(path: &Path) -> CleanupResult<bool> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(CleanupError::io("open lock file", path, e)),
    };
    if !matches!(PlatformLock::try_lock(&file), Ok(Attempt::Acquired)) {
        return Ok(false);
    }
    if !still_linked(&file, path) {
        return Ok(false);
    }
    remove_file_if_exists(path, "remove lock file")
    // dropping `file` closes the descriptor and releases our lock
}

/// True while `path` still names the file behind `file`.
#[cfg(unix)]
pub(crate) fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(open), Ok(named)) => open.dev() == named.dev() && open.ino() == named.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
pub(crate) fn still_linked(_file: &File, path: &Path) -> bool {
    // open files cannot be deleted here, so existence is enough
    path.exists()
}

fn matches_fs2_contended(err: &io::Error) -> bool {
    err.raw_os_error().is_some() && err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn attempt<F>(op: F, is_contended: fn(&io::Error) -> bool, what: &str) -> Result<Attempt>
where
    F: FnOnce() -> io::Result<()>,
{
    match op() {
        Ok(()) => Ok(Attempt::Acquired),
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Attempt::Busy),
        Err(ref e) if matches_fs2_contended(e) || is_contended(e) => Ok(Attempt::Busy),
        Err(e) => Err(LockError::failure(format!("{}: {}", what, e))),
    }
}

#[cfg(unix)]
pub struct PosixLock;

#[cfg(unix)]
impl PosixLock {
    fn is_contended(err: &io::Error) -> bool {
        use nix::errno::Errno;
        match err.raw_os_error() {
            Some(code) => matches!(
                Errno::from_raw(code),
                Errno::EAGAIN | Errno::EACCES | Errno::EDEADLK | Errno::EINTR
            ),
            None => false,
        }
    }
}

#[cfg(unix)]
impl OsLock for PosixLock {
    fn try_lock(file: &File) -> Result<Attempt> {
        attempt(
            || fs2::FileExt::try_lock_exclusive(file),
            Self::is_contended,
            "flock",
        )
    }

    fn lock(file: &File) -> Result<()> {
        loop {
            match fs2::FileExt::lock_exclusive(file) {
                Ok(()) => return Ok(()),
                // interrupted by a signal
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(LockError::failure(format!("flock: {}", e))),
            }
        }
    }

    fn unlock(file: &File) -> io::Result<()> {
        fs2::FileExt::unlock(file)
    }
}

#[cfg(windows)]
pub struct WindowsLock;

#[cfg(windows)]
impl WindowsLock {
    const ERROR_SHARING_VIOLATION: i32 = 32;
    const ERROR_LOCK_VIOLATION: i32 = 33;

    fn is_contended(err: &io::Error) -> bool {
        matches!(
            err.raw_os_error(),
            Some(Self::ERROR_SHARING_VIOLATION) | Some(Self::ERROR_LOCK_VIOLATION)
        )
    }
}

#[cfg(windows)]
impl OsLock for WindowsLock {
    fn try_lock(file: &File) -> Result<Attempt> {
        attempt(
            || fs2::FileExt::try_lock_exclusive(file),
            Self::is_contended,
            "LockFileEx",
        )
    }

    fn lock(file: &File) -> Result<()> {
        fs2::FileExt::lock_exclusive(file)
            .map_err(|e| LockError::failure(format!("LockFileEx: {}", e)))
    }

    fn unlock(file: &File) -> io::Result<()> {
        fs2::FileExt::unlock(file)
    }
}

/// Placeholder for targets without a supported locking syscall.
#[cfg(not(any(unix, windows)))]
pub struct UnsupportedLock;

#[cfg(not(any(unix, windows)))]
impl OsLock for UnsupportedLock {
    fn try_lock(_file: &File) -> Result<Attempt> {
        Err(LockError::failure("could not acquire lock: unsupported platform"))
    }

    fn lock(_file: &File) -> Result<()> {
        Err(LockError::failure("could not acquire lock: unsupported platform"))
    }

    fn unlock(_file: &File) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "unsupported platform"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_file_created() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("nested").join("test.lock");
        let file = open_lock_file(&lock_path).unwrap();
        PlatformLock::lock(&file).unwrap();
        assert!(lock_path.exists());
        PlatformLock::unlock(&file).unwrap();
    }

    #[test]
    fn test_try_lock_busy_when_held() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("test.lock");
        let holder = open_lock_file(&lock_path).unwrap();
        assert_eq!(PlatformLock::try_lock(&holder).unwrap(), Attempt::Acquired);

        let other = open_lock_file(&lock_path).unwrap();
        assert_eq!(PlatformLock::try_lock(&other).unwrap(), Attempt::Busy);
        assert!(!remove_if_unlocked(&lock_path).unwrap());
        assert!(lock_path.exists());
    }

    #[test]
    fn test_lock_released_on_unlock() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("test.lock");
        let holder = open_lock_file(&lock_path).unwrap();
        PlatformLock::lock(&holder).unwrap();
        PlatformLock::unlock(&holder).unwrap();

        let other = open_lock_file(&lock_path).unwrap();
        assert_eq!(PlatformLock::try_lock(&other).unwrap(), Attempt::Acquired);
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("test.lock");
        {
            let holder = open_lock_file(&lock_path).unwrap();
            PlatformLock::lock(&holder).unwrap();
        }
        assert!(remove_if_unlocked(&lock_path).unwrap());
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_remove_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(!remove_if_unlocked(&dir.path().join("missing.lock")).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_removed_file_is_not_linked() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("test.lock");
        let old = open_lock_file(&lock_path).unwrap();
        assert!(still_linked(&old, &lock_path));

        assert!(remove_if_unlocked(&lock_path).unwrap());
        assert!(!still_linked(&old, &lock_path));

        let fresh = open_lock_file(&lock_path).unwrap();
        assert!(!still_linked(&old, &lock_path));
        assert!(still_linked(&fresh, &lock_path));
    }

    #[test]
    fn test_open_does_not_truncate() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("test.lock");
        std::fs::write(&lock_path, b"keep").unwrap();
        let _file = open_lock_file(&lock_path).unwrap();
        assert_eq!(std::fs::read(&lock_path).unwrap(), b"keep");
    }
}
