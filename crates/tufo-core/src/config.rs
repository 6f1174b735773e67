//! # Store Configuration
//!
//! Explicit configuration handed to `Store::open`. Usually loaded from TOML:
//!
//! ```toml
//! feed_batch_size = 500
//!
//! [write_layer]
//! name = "default"
//! path = "/var/lib/tufo/default.redb"
//!
//! [[overlays]]
//! name = "base"
//! path = "/var/lib/tufo/base.redb"
//! ```
//!
//! A write layer without a path is kept in memory.

use crate::StoreError;
use crate::primitives::{DEFAULT_FEED_BATCH_SIZE, DEFAULT_LAYER_NAME};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// One layer mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
    #[serde(default = "default_layer_name")]
    pub name: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            name: default_layer_name(),
            path: None,
        }
    }
}

impl LayerConfig {
    /// A named layer backed by the given file.
    pub fn at(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
        }
    }
}

fn default_layer_name() -> String {
    DEFAULT_LAYER_NAME.to_string()
}

fn default_feed_batch_size() -> usize {
    DEFAULT_FEED_BATCH_SIZE
}

/// Everything a store needs besides its model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub write_layer: LayerConfig,
    /// Read-only layers in read priority order.
    #[serde(default)]
    pub overlays: Vec<LayerConfig>,
    /// Items per committed batch during feed ingestion.
    #[serde(default = "default_feed_batch_size")]
    pub feed_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            write_layer: LayerConfig::default(),
            overlays: Vec::new(),
            feed_batch_size: DEFAULT_FEED_BATCH_SIZE,
        }
    }
}

impl StoreConfig {
    /// A volatile single-layer store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A single file-backed write layer.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            write_layer: LayerConfig::at(DEFAULT_LAYER_NAME, path),
            ..Self::default()
        }
    }

    /// Mount a read-only overlay below the ones already configured.
    #[must_use]
    pub fn with_overlay(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.overlays.push(LayerConfig::at(name, path));
        self
    }

    #[must_use]
    pub fn with_feed_batch_size(mut self, size: usize) -> Self {
        self.feed_batch_size = size;
        self
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, StoreError> {
        let config: Self =
            toml::from_str(text).map_err(|e| StoreError::BadConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::BadConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.feed_batch_size == 0 {
            return Err(StoreError::BadConfig(
                "feed_batch_size must be at least 1".to_string(),
            ));
        }
        let mut names = BTreeSet::new();
        for layer in std::iter::once(&self.write_layer).chain(&self.overlays) {
            if layer.name.is_empty() {
                return Err(StoreError::BadConfig("layer name is empty".to_string()));
            }
            if !names.insert(layer.name.as_str()) {
                return Err(StoreError::BadConfig(format!(
                    "duplicate layer name {}",
                    layer.name
                )));
            }
        }
        if let Some(overlay) = self.overlays.iter().find(|l| l.path.is_none()) {
            return Err(StoreError::BadConfig(format!(
                "overlay {} has no path",
                overlay.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_toml() {
        let config = StoreConfig::from_toml_str("").expect("config");
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.write_layer.name, "default");
        assert_eq!(config.feed_batch_size, 1000);
    }

    #[test]
    fn full_toml() {
        let config = StoreConfig::from_toml_str(
            r#"
            feed_batch_size = 10

            [write_layer]
            path = "/tmp/default.redb"

            [[overlays]]
            name = "base"
            path = "/tmp/base.redb"
            "#,
        )
        .expect("config");
        assert_eq!(config.feed_batch_size, 10);
        assert_eq!(
            config.write_layer.path,
            Some(PathBuf::from("/tmp/default.redb"))
        );
        assert_eq!(config.overlays, vec![LayerConfig::at("base", "/tmp/base.redb")]);
    }

    #[test]
    fn rejects_bad_configs() {
        assert!(matches!(
            StoreConfig::from_toml_str("feed_batch_size = 0"),
            Err(StoreError::BadConfig(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("[[overlays]]\nname = \"default\"\npath = \"x\""),
            Err(StoreError::BadConfig(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("[[overlays]]\nname = \"base\""),
            Err(StoreError::BadConfig(_))
        ));
        assert!(matches!(
            StoreConfig::from_toml_str("feed_batch_size = \"lots\""),
            Err(StoreError::BadConfig(_))
        ));
    }

    #[test]
    fn missing_file_is_bad_config() {
        let temp = tempfile::tempdir().expect("temp dir");
        assert!(matches!(
            StoreConfig::load(temp.path().join("absent.toml")),
            Err(StoreError::BadConfig(_))
        ));
    }
}
