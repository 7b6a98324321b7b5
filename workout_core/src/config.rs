//! Configuration file support for Lift.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/lift/config.toml`.

use crate::sync::SyncPolicy;
use crate::{Error, Result, WorkoutPlan};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Retry behaviour for queued store writes
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl From<&SyncConfig> for SyncPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: millis(config.base_backoff_ms),
            max_backoff: millis(config.max_backoff_ms),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Minimum gap between telemetry-only store writes
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Extra workout plans merged over the built-in catalog
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct CatalogConfig {
    #[serde(default)]
    pub custom: Vec<WorkoutPlan>,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("lift")
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_debounce_ms() -> u64 {
    2_000
}

pub(crate) fn millis(ms: u64) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.sync.max_retries == 0 {
            return Err(Error::Config("sync.max_retries must be at least 1".into()));
        }
        if self.sync.base_backoff_ms > self.sync.max_backoff_ms {
            return Err(Error::Config(format!(
                "sync.base_backoff_ms ({}) exceeds sync.max_backoff_ms ({})",
                self.sync.base_backoff_ms, self.sync.max_backoff_ms
            )));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(std::env::temp_dir);
        base.join("lift").join("config.toml")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.base_backoff_ms, 500);
        assert_eq!(config.telemetry.debounce_ms, 2000);
        assert!(config.catalog.custom.is_empty());
        assert!(config.data.data_dir.ends_with("lift"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.sync.max_backoff_ms, parsed.sync.max_backoff_ms);
        assert_eq!(config.data.data_dir, parsed.data.data_dir);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[sync]
max_retries = 8
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sync.max_retries, 8);
        assert_eq!(config.sync.base_backoff_ms, 500); // default
        assert_eq!(config.telemetry.debounce_ms, 2000); // default
    }

    #[test]
    fn test_custom_workouts() {
        let toml_str = r#"
[[catalog.custom]]
id = "legs"
name = "Leg Day"

[[catalog.custom.exercises]]
exercise_id = "back_squat"
name = "Back Squat"
order_index = 0
target_sets = 5
target_reps = 5
rest_seconds = 180
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.catalog.custom.len(), 1);
        let plan = &config.catalog.custom[0];
        assert_eq!(plan.exercises[0].target_reps, Some(5));
        assert_eq!(plan.exercises[0].target_duration_seconds, None);
    }

    #[test]
    fn test_validate_rejects_bad_backoff() {
        let mut config = Config::default();
        config.sync.base_backoff_ms = 10_000;
        config.sync.max_backoff_ms = 1_000;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        let mut config = Config::default();
        config.telemetry.debounce_ms = 750;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.telemetry.debounce_ms, 750);
    }

    #[test]
    fn test_sync_policy_from_config() {
        let policy = SyncPolicy::from(&SyncConfig::default());
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base_backoff, chrono::Duration::milliseconds(500));
        assert_eq!(policy.max_backoff, chrono::Duration::seconds(60));
    }
}
