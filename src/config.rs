//! Host Configuration
//!
//! Handles parsing and discovery of dynbridge.toml host configuration files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the host config file searched for from the working directory up.
pub const CONFIG_FILE: &str = "dynbridge.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config file not found: {0}")]
    NotFound(String),
}

/// Root configuration structure matching dynbridge.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub loader: LoaderConfig,
}

/// Loader settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoaderConfig {
    /// Extra directories searched for units, ahead of the platform defaults.
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

impl HostConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> Result<Self, ConfigError> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Err(ConfigError::NotFound(CONFIG_FILE.to_string()));
            }
        }
    }

    /// Load from the working directory upwards; a missing file yields the
    /// defaults.
    pub fn load_or_default() -> Self {
        std::env::current_dir()
            .ok()
            .and_then(|cwd| Self::find_and_load(&cwd).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_paths() {
        let config: HostConfig = toml::from_str(
            r#"
            [loader]
            search_paths = ["/opt/units/lib", "vendor/units"]
            "#,
        )
        .unwrap();
        assert_eq!(config.loader.search_paths.len(), 2);
        assert_eq!(
            config.loader.search_paths[0],
            PathBuf::from("/opt/units/lib")
        );
    }

    #[test]
    fn test_empty_config_defaults() {
        let config: HostConfig = toml::from_str("").unwrap();
        assert!(config.loader.search_paths.is_empty());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = HostConfig::load(Path::new("/no/such/dynbridge.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
