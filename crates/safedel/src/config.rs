//! Database configuration.

use std::path::PathBuf;

use safedel_core::storage::DEFAULT_MAX_DEPTH;
use safedel_core::StorageConfig;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Configuration for a [`crate::Database`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Storage engine settings.
    pub storage: StorageConfig,

    /// Report a reinstated masked row as created by `upsert`.
    pub interpret_undeleted_objects_as_created: bool,

    /// Deepest relation chain a cascade may follow.
    pub max_cascade_depth: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            interpret_undeleted_objects_as_created: false,
            max_cascade_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl DatabaseConfig {
    /// Create a configuration storing data under `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::new(path),
            ..Default::default()
        }
    }

    /// Create an in-memory configuration for tests.
    pub fn temporary() -> Self {
        Self {
            storage: StorageConfig::temporary(),
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        if config.max_cascade_depth == 0 {
            return Err(Error::Config("max_cascade_depth must be at least 1".into()));
        }
        Ok(config)
    }

    /// Set the storage configuration.
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Report reinstated rows as created.
    pub fn with_undeleted_as_created(mut self, enabled: bool) -> Self {
        self.interpret_undeleted_objects_as_created = enabled;
        self
    }

    /// Set the cascade depth limit.
    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::default();
        assert!(!config.interpret_undeleted_objects_as_created);
        assert_eq!(config.max_cascade_depth, 100);
        assert!(!config.storage.temporary);
    }

    #[test]
    fn test_from_json_partial() {
        let config = DatabaseConfig::from_json_str(
            r#"{"interpret_undeleted_objects_as_created": true, "storage": {"temporary": true}}"#,
        )
        .unwrap();
        assert!(config.interpret_undeleted_objects_as_created);
        assert!(config.storage.temporary);
        assert_eq!(config.max_cascade_depth, 100);
    }

    #[test]
    fn test_from_json_rejects_zero_depth() {
        let result = DatabaseConfig::from_json_str(r#"{"max_cascade_depth": 0}"#);
        if let Err(Error::Config(msg)) = result {
            assert!(msg.contains("max_cascade_depth"));
        } else {
            panic!("Expected Config error");
        }

        assert!(matches!(
            DatabaseConfig::from_json_str("not json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_builders() {
        let config = DatabaseConfig::new("/tmp/data")
            .with_undeleted_as_created(true)
            .with_max_cascade_depth(0);
        assert_eq!(config.storage.path, PathBuf::from("/tmp/data"));
        assert!(config.interpret_undeleted_objects_as_created);
        assert_eq!(config.max_cascade_depth, 1);
    }
}
