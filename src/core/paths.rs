//! Lock path resolution and on-disk layout.

use crate::constants;
use crate::util::path::{is_bare_name, normalize, with_suffix};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPaths {
    pub lock_file: PathBuf,
    pub queue_dir: PathBuf,
    pub seq_file: PathBuf,
}

impl LockPaths {
    /// Resolve a lock name to its paths.
    ///
    /// A bare name (`"jobs.lock"`) lands in `lock_dir`, else `FIFO_LOCK_DIR`,
    /// else the OS temp directory. Anything with a directory part is used as given.
    pub fn resolve(name: &str, lock_dir: Option<&Path>) -> Self {
        if is_bare_name(name) {
            return Self::from_lock_file(default_lock_dir(lock_dir).join(name));
        }
        Self::from_lock_file(PathBuf::from(name))
    }

    pub fn from_lock_file(path: PathBuf) -> Self {
        let lock_file = normalize(&path);
        let queue_dir = with_suffix(&lock_file, constants::QUEUE_DIR_SUFFIX);
        let seq_file = queue_dir.join(constants::SEQ_FILE_NAME);
        Self {
            lock_file,
            queue_dir,
            seq_file,
        }
    }
}

fn default_lock_dir(lock_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = lock_dir {
        return dir.to_path_buf();
    }
    match env::var_os(constants::LOCK_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => env::temp_dir(),
    }
}

impl std::fmt::Display for LockPaths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.lock_file.display())
    }
}
