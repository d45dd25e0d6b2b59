//! Configuration management for the schema repository
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (xsd-repository.toml)
//! - Environment variables (XSD_REPOSITORY__*)
//!
//! ## Example config file (xsd-repository.toml):
//! ```toml
//! [repository]
//! path = "/var/lib/esb/schemas"
//! catalog_file = "catalog.xml"
//! create_if_missing = true
//!
//! [comparison]
//! strategy = "structural"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::equivalence::ComparisonStrategy;

/// Main configuration for the schema repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Storage settings
    #[serde(default)]
    pub repository: StorageConfig,

    /// Equivalence engine settings
    #[serde(default)]
    pub comparison: ComparisonConfig,
}

/// Where schemas and the catalog live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Repository directory holding the catalog and every schema file
    #[serde(default = "default_repository_path")]
    pub path: PathBuf,

    /// Catalog file name, relative to `path`
    #[serde(default = "default_catalog_file")]
    pub catalog_file: String,

    /// Create the repository directory on open
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
}

/// Equivalence engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparisonConfig {
    #[serde(default)]
    pub strategy: ComparisonStrategy,
}

fn default_repository_path() -> PathBuf {
    PathBuf::from("xsd-repository")
}

fn default_catalog_file() -> String {
    "catalog.xml".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_repository_path(),
            catalog_file: default_catalog_file(),
            create_if_missing: true,
        }
    }
}

impl RepositoryConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the defaults
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "xsd-repository.toml",
            ".xsd-repository.toml",
            "config/xsd-repository.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "xsd-repository") {
            let xdg_config = config_dir.config_dir().join("xsd-repository.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("XSD_REPOSITORY")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Repository directory, relative paths resolved against the working directory
    pub fn repository_path(&self) -> PathBuf {
        if self.repository.path.is_absolute() {
            self.repository.path.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.repository.path)
        }
    }

    /// Full path of the catalog file
    pub fn catalog_path(&self) -> PathBuf {
        self.repository_path().join(&self.repository.catalog_file)
    }
}
