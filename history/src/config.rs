use crate::error::{HistoryError, HistoryResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Name of the optional configuration file inside the shadow store
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Record edits at all
    pub enabled: bool,
    /// Prune and gc refuse to run unless explicitly confirmed
    pub confirm_destructive: bool,
    /// Age in days after which abandoned branches are collected by gc
    pub retention_days: u32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confirm_destructive: true,
            retention_days: 30,
        }
    }
}

impl ShadowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_confirm_destructive(mut self, confirm: bool) -> Self {
        self.confirm_destructive = confirm;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.retention_days == 0 {
            return Err("Retention days must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Load `config.toml` from the store directory. A missing file means
    /// defaults.
    pub fn load(store_dir: &Path) -> HistoryResult<Self> {
        let path = store_dir.join(CONFIG_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        let config: ShadowConfig = toml::from_str(&text).map_err(|e| HistoryError::Config {
            message: format!("{}: {}", path.display(), e),
        })?;
        config.validate().map_err(|message| HistoryError::Config {
            message: format!("{}: {}", path.display(), message),
        })?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ShadowConfig::default();
        assert!(config.enabled);
        assert!(config.confirm_destructive);
        assert_eq!(config.retention_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ShadowConfig::new()
            .with_enabled(false)
            .with_confirm_destructive(false)
            .with_retention_days(7);

        assert!(!config.enabled);
        assert!(!config.confirm_destructive);
        assert_eq!(config.retention_days, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = ShadowConfig::new().with_retention_days(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            ShadowConfig::load(dir.path()).unwrap(),
            ShadowConfig::default()
        );
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "retention_days = 3\n").unwrap();

        let config = ShadowConfig::load(dir.path()).unwrap();
        assert_eq!(config.retention_days, 3);
        assert!(config.enabled);
    }

    #[test]
    fn test_load_rejects_bad_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "enabled = \"maybe\"\n").unwrap();
        assert!(matches!(
            ShadowConfig::load(dir.path()),
            Err(HistoryError::Config { .. })
        ));

        fs::write(dir.path().join(CONFIG_FILE), "retention_days = 0\n").unwrap();
        assert!(matches!(
            ShadowConfig::load(dir.path()),
            Err(HistoryError::Config { .. })
        ));
    }
}
