use crate::models::settings::{LockSettings, SettingsFile};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Load the `[lock]` table of a TOML settings file. A missing file yields defaults.
pub fn load(path: &Path) -> Result<LockSettings> {
    if !path.exists() {
        return Ok(LockSettings::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("read lock settings {}", path.display()))?;
    let file: SettingsFile = toml::from_str(&content)
        .with_context(|| format!("parse lock settings {}", path.display()))?;
    Ok(file.lock)
}
