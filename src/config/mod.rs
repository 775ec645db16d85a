//! Configuration management.
//!
//! Save settings are read from a JSON file and can be overridden from the
//! environment.
//!
//! Priority for the file location:
//! 1. Explicit path (`--config`)
//! 2. `GRAPHSAVER_CONFIG` environment variable
//! 3. Global location: `~/.graphsaver/config.json`
//!
//! A missing global file means defaults. `GRAPHSAVER_MAX_ROWS` overrides
//! `max_rows_per_statement` after the file is loaded.

use crate::error::{Error, Result};
use crate::saver::VersionPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "GRAPHSAVER_CONFIG";

/// Environment variable overriding the physical batch bound.
pub const MAX_ROWS_ENV: &str = "GRAPHSAVER_MAX_ROWS";

/// Default bound on rows per INSERT/UPDATE statement.
pub const DEFAULT_MAX_ROWS: usize = 128;

/// Knobs of the save engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveSettings {
    /// Rows per multi-row statement; longer lists are sliced sequentially.
    pub max_rows_per_statement: usize,
    /// When false every statement covers a single row.
    pub allows_multiple_rows: bool,
    pub version_policy: VersionPolicy,
}

impl Default for SaveSettings {
    fn default() -> Self {
        Self {
            max_rows_per_statement: DEFAULT_MAX_ROWS,
            allows_multiple_rows: true,
            version_policy: VersionPolicy::Counter,
        }
    }
}

impl SaveSettings {
    /// Rows per statement after applying `allows_multiple_rows`.
    #[must_use]
    pub fn rows_per_statement(&self) -> usize {
        if self.allows_multiple_rows {
            self.max_rows_per_statement.max(1)
        } else {
            1
        }
    }

    /// Builder-style batch bound.
    #[must_use]
    pub fn with_max_rows(mut self, rows: usize) -> Self {
        self.max_rows_per_statement = rows;
        self
    }

    #[must_use]
    pub fn single_row(mut self) -> Self {
        self.allows_multiple_rows = false;
        self
    }

    #[must_use]
    pub fn with_version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    fn check(self) -> Result<Self> {
        if self.max_rows_per_statement == 0 {
            return Err(Error::Config("max_rows_per_statement must be at least 1".into()));
        }
        Ok(self)
    }
}

/// Get the global config directory location (`~/.graphsaver`).
#[must_use]
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".graphsaver"))
}

/// Resolve the config file path.
#[must_use]
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Explicit path from CLI flag
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: GRAPHSAVER_CONFIG environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Global location
    global_config_dir().map(|dir| dir.join("config.json"))
}

/// Load settings from a JSON file.
///
/// # Errors
///
/// Returns [`Error::Config`] if the file cannot be read or parsed.
pub fn load_settings_from(path: &Path) -> Result<SaveSettings> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {}: {e}", path.display())))?;

    let settings: SaveSettings = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file {}: {e}", path.display())))?;
    settings.check()
}

/// Load settings with the full resolution order and environment overrides.
///
/// # Errors
///
/// Returns [`Error::Config`] if an explicitly named file is missing, a file
/// cannot be parsed, or an override is not a positive integer.
pub fn load_settings(explicit_path: Option<&Path>) -> Result<SaveSettings> {
    let settings = match resolve_config_path(explicit_path) {
        Some(path) if path.exists() => load_settings_from(&path)?,
        Some(path) if explicit_path.is_some() => {
            return Err(Error::Config(format!("Config file not found: {}", path.display())));
        }
        _ => SaveSettings::default(),
    };
    apply_env_overrides(settings, |key| std::env::var(key).ok())
}

/// Apply `GRAPHSAVER_MAX_ROWS` from `lookup`.
///
/// # Errors
///
/// Returns [`Error::Config`] if the override is not a positive integer.
pub fn apply_env_overrides(
    mut settings: SaveSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SaveSettings> {
    if let Some(raw) = lookup(MAX_ROWS_ENV) {
        let raw = raw.trim();
        if !raw.is_empty() {
            settings.max_rows_per_statement = raw
                .parse()
                .map_err(|_| Error::Config(format!("{MAX_ROWS_ENV} must be a positive integer, got '{raw}'")))?;
        }
    }
    settings.check()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SaveSettings::default();
        assert_eq!(settings.max_rows_per_statement, 128);
        assert_eq!(settings.rows_per_statement(), 128);
        assert_eq!(settings.clone().single_row().rows_per_statement(), 1);
        assert_eq!(settings.version_policy, VersionPolicy::Counter);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "max_rows_per_statement": 16, "version_policy": "clock" }"#).unwrap();

        let settings = load_settings_from(&path).unwrap();
        assert_eq!(settings.max_rows_per_statement, 16);
        assert!(settings.allows_multiple_rows);
        assert_eq!(settings.version_policy, VersionPolicy::Clock);
    }

    #[test]
    fn test_load_rejects_zero_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "max_rows_per_statement": 0 }"#).unwrap();
        assert!(matches!(load_settings_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(load_settings(Some(&missing)), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_override() {
        let settings = apply_env_overrides(SaveSettings::default(), |key| {
            (key == MAX_ROWS_ENV).then(|| " 7 ".to_string())
        })
        .unwrap();
        assert_eq!(settings.max_rows_per_statement, 7);

        let err = apply_env_overrides(SaveSettings::default(), |_| Some("many".into())).unwrap_err();
        assert!(err.to_string().contains(MAX_ROWS_ENV));
    }

    #[test]
    fn test_resolve_config_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/config.json");
        assert_eq!(resolve_config_path(Some(&explicit)), Some(explicit));
    }
}
