//! Service and per-account configuration.
//!
//! Service settings come from a JSON file with environment overrides. Account
//! settings arrive as raw JSON from the host's account module and are
//! validated into [`AccountSettings`] here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::accounts::ExecutorConfig;
use crate::classify::{FreeEntryPolicy, DEFAULT_LOOKUP_CHUNK};
use crate::models::{AccountSettings, FilterRule};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection settings for the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CatalogConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Wait between polls when the stream has nothing new.
    pub poll_interval_ms: u64,
    /// Transport retries per poll before the stream counts as disconnected.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub lookup_chunk: usize,
    pub request_timeout_secs: u64,
    /// Wait before the host resubscribes after a disconnect.
    pub reconnect_delay_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:17020/api/v1".to_string(),
            api_key: None,
            poll_interval_ms: 5_000,
            max_retries: 5,
            retry_backoff_ms: 1_000,
            lookup_chunk: DEFAULT_LOOKUP_CHUNK,
            request_timeout_secs: 60,
            reconnect_delay_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiConfig {
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 17030,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub catalog: CatalogConfig,
    pub eligibility: FreeEntryPolicy,
    pub executor: ExecutorConfig,
    pub api: ApiConfig,
    /// Overrides the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Account id to raw account module configuration.
    pub accounts: BTreeMap<String, serde_json::Value>,
}

impl AppConfig {
    /// Load from `path`, or from `config.json` in the data directory when it
    /// exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", path.display(), e)))
    }

    /// Apply `FREEPKGS_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("FREEPKGS_CATALOG_URL") {
            self.catalog.base_url = url;
        }
        if let Ok(key) = std::env::var("FREEPKGS_CATALOG_KEY") {
            self.catalog.api_key = Some(key);
        }
        if let Ok(dir) = std::env::var("FREEPKGS_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(key) = std::env::var("FREEPKGS_STATUS_KEY") {
            self.api.api_key = Some(key);
        }
        if let Some(port) = std::env::var("FREEPKGS_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
        {
            self.api.port = port;
        }
    }

    /// Database location; `None` means the platform default.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join("free-packages.db"))
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "free-packages")
        .map(|dirs| dirs.config_dir().join("config.json"))
}

/// Raw account module configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
    #[serde(default, alias = "EnableFreePackages")]
    pub enabled: bool,
    #[serde(default, alias = "FreePackagesPerHour")]
    pub hourly_limit: Option<u32>,
    #[serde(default, alias = "PauseFreePackagesWhilePlaying")]
    pub pause_on_activity: bool,
    #[serde(default, alias = "FreePackagesFilters")]
    pub filter_rules: Vec<FilterRule>,
    #[serde(default, alias = "FreePackagesFilter")]
    pub filter_rule: Option<FilterRule>,
}

impl AccountConfig {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ConfigError> {
        Self::deserialize(value).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Validate into orchestrator settings. The single-rule form is appended
    /// after the rule list.
    pub fn into_settings(self) -> Result<AccountSettings, ConfigError> {
        if self.hourly_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "hourlyLimit must be at least 1; omit it for no limit".to_string(),
            ));
        }

        let mut rules = self.filter_rules;
        rules.extend(self.filter_rule);
        Ok(AccountSettings {
            rules,
            hourly_limit: self.hourly_limit,
            pause_on_activity: self.pause_on_activity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryKind;
    use serde_json::json;

    #[test]
    fn account_config_accepts_plugin_property_names() {
        let config = AccountConfig::from_value(&json!({
            "EnableFreePackages": true,
            "FreePackagesPerHour": 20,
            "PauseFreePackagesWhilePlaying": true,
            "FreePackagesFilters": [{ "Types": ["dlc"] }],
            "FreePackagesFilter": { "IgnoredTags": ["adult"] },
        }))
        .unwrap();
        assert!(config.enabled);

        let settings = config.into_settings().unwrap();
        assert_eq!(settings.hourly_limit, Some(20));
        assert!(settings.pause_on_activity);
        assert_eq!(settings.rules.len(), 2);
        assert!(settings.rules[0].types.contains(&EntryKind::Dlc));
        assert!(settings.rules[1].ignored_tags.contains("adult"));
    }

    #[test]
    fn account_config_defaults_to_disabled_and_unlimited() {
        let config = AccountConfig::from_value(&json!({ "unrelated": 1 })).unwrap();
        assert!(!config.enabled);

        let settings = config.into_settings().unwrap();
        assert_eq!(settings.hourly_limit, None);
        assert!(!settings.pause_on_activity);
        assert!(settings.rules.is_empty());
    }

    #[test]
    fn zero_hourly_limit_is_rejected() {
        let config = AccountConfig::from_value(&json!({ "enabled": true, "hourlyLimit": 0 })).unwrap();
        assert!(matches!(config.into_settings(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn wrongly_typed_fields_are_rejected() {
        let result = AccountConfig::from_value(&json!({ "hourlyLimit": "many" }));
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn app_config_fills_missing_sections() {
        let config: AppConfig = serde_json::from_value(json!({
            "catalog": { "baseUrl": "http://catalog.test" },
            "api": { "port": 9000 },
        }))
        .unwrap();

        assert_eq!(config.catalog.base_url, "http://catalog.test");
        assert_eq!(config.catalog.max_retries, 5);
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.executor, ExecutorConfig::default());
        assert!(config.accounts.is_empty());
        assert_eq!(config.database_path(), None);
    }

    #[test]
    fn database_path_uses_data_dir() {
        let config = AppConfig {
            data_dir: Some(PathBuf::from("/tmp/freepkgs")),
            ..Default::default()
        };
        assert_eq!(
            config.database_path(),
            Some(PathBuf::from("/tmp/freepkgs/free-packages.db"))
        );
    }
}
