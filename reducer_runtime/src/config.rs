//! Runner configuration, loaded from a JSON file.
//!
//! ```json
//! { "data_dir": "/var/lib/reducers", "sync_writes": true }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    /// Directory holding the operation log.
    pub data_dir: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    /// fsync after every appended record.
    #[serde(default = "default_sync_writes")]
    pub sync_writes: bool,
}

fn default_log_file() -> String {
    String::from("operations.log")
}

fn default_sync_writes() -> bool {
    true
}

impl RunnerConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            log_file: default_log_file(),
            sync_writes: default_sync_writes(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.log_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.json");
        fs::write(&path, r#"{"data_dir": "/tmp/reducers"}"#).unwrap();
        let cfg = RunnerConfig::load(&path).unwrap();
        assert_eq!(cfg, RunnerConfig::new("/tmp/reducers"));
        assert_eq!(cfg.log_path(), PathBuf::from("/tmp/reducers/operations.log"));
    }

    #[test]
    fn unknown_fields_and_missing_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.json");
        fs::write(&path, r#"{"data_dir": "/x", "snapshot_every": 3}"#).unwrap();
        assert!(matches!(RunnerConfig::load(&path), Err(ConfigError::Parse { .. })));
        // channel capacity is set on the block source, not here
        fs::write(&path, r#"{"data_dir": "/x", "stream_buffer": 8}"#).unwrap();
        assert!(matches!(RunnerConfig::load(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            RunnerConfig::load(&dir.path().join("absent.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
