//! Daemon configuration: an optional JSON file plus command-line overrides.

use filesync_core::{ConflictStrategy, SyncConfig};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] filesync_core::ConfigError),
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub interval_seconds: Option<u64>,
    pub strategy: Option<ConflictStrategy>,
}

/// Load the sync configuration.
///
/// Without a file every option takes its default. Fields missing from the
/// file are defaulted too.
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<SyncConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        }
        None => SyncConfig::default(),
    };

    if let Some(interval) = overrides.interval_seconds {
        config.auto_sync_interval_seconds = interval;
    }
    if let Some(strategy) = overrides.strategy {
        config.conflict_resolution_strategy = strategy;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let config = load(None, &Overrides::default()).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_file_then_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.json");
        std::fs::write(
            &path,
            r#"{"autoSyncIntervalSeconds": 30, "conflictResolutionStrategy": "prefer-local", "ignoredPathPrefixes": ["build/"]}"#,
        )
        .unwrap();

        let config = load(Some(&path), &Overrides::default()).unwrap();
        assert_eq!(config.auto_sync_interval_seconds, 30);
        assert_eq!(config.conflict_resolution_strategy, ConflictStrategy::PreferLocal);
        assert_eq!(config.ignored_path_prefixes, vec!["build/".to_string()]);
        assert_eq!(config.hold_timeout_seconds, 30);

        let overrides = Overrides {
            interval_seconds: Some(5),
            strategy: Some(ConflictStrategy::Notify),
        };
        let config = load(Some(&path), &overrides).unwrap();
        assert_eq!(config.auto_sync_interval_seconds, 5);
        assert_eq!(config.conflict_resolution_strategy, ConflictStrategy::Notify);
    }

    #[test]
    fn test_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load(Some(&dir.path().join("missing.json")), &Overrides::default()),
            Err(ConfigError::Read { .. })
        ));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load(Some(&path), &Overrides::default()),
            Err(ConfigError::Parse { .. })
        ));

        let overrides = Overrides {
            interval_seconds: Some(0),
            strategy: None,
        };
        assert!(matches!(load(None, &overrides), Err(ConfigError::Invalid(_))));
    }
}
