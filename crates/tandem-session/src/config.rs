//! Session configuration structures, loaded from `tandem.toml`.
//!
//! Every field has a default, so an empty (or missing) file is valid.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Top-level session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Realtime reconciliation settings
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Last-used change set persistence settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SessionError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| SessionError::ConfigError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load configuration, falling back to defaults when the file is missing.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Quiet period for collapsing `ChangeSetWritten` bursts.
    pub fn written_debounce(&self) -> Duration {
        Duration::from_millis(self.realtime.written_debounce_ms)
    }
}

/// Realtime reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Debounce window for ChangeSetWritten events, in milliseconds
    #[serde(default = "default_written_debounce_ms")]
    pub written_debounce_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            written_debounce_ms: default_written_debounce_ms(),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Fixed namespace the per-workspace slot key is derived from
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Directory for the file-backed store (defaults to the platform data dir)
    pub dir: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            dir: None,
        }
    }
}

impl PersistenceConfig {
    /// Directory the file-backed store should use.
    pub fn resolved_dir(&self) -> PathBuf {
        match &self.dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("tandem"),
        }
    }
}

// Serde default functions
fn default_written_debounce_ms() -> u64 {
    500
}

fn default_namespace() -> String {
    "tandem:last-change-set".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_yields_defaults() {
        let config: SessionConfig = toml::from_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.written_debounce(), Duration::from_millis(500));
        assert_eq!(config.persistence.namespace, "tandem:last-change-set");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: SessionConfig = toml::from_str(
            r#"
            [realtime]
            written_debounce_ms = 50

            [persistence]
            dir = "/var/lib/tandem"
            "#,
        )
        .unwrap();
        assert_eq!(config.written_debounce(), Duration::from_millis(50));
        assert_eq!(config.persistence.namespace, "tandem:last-change-set");
        assert_eq!(
            config.persistence.resolved_dir(),
            PathBuf::from("/var/lib/tandem")
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let config = SessionConfig::load_or_default(dir.path().join("tandem.toml")).unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tandem.toml");
        fs::write(&path, "[persistence]\nnamespace = \"custom\"\n").unwrap();
        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.persistence.namespace, "custom");
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tandem.toml");
        fs::write(&path, "[realtime]\nwritten_debounce_ms = \"soon\"\n").unwrap();
        let err = SessionConfig::load(&path).unwrap_err();
        assert!(matches!(err, SessionError::ConfigError { .. }));
        assert!(err.to_string().contains("tandem.toml"));
    }
}
