use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Default marketplace API endpoint
pub const DEFAULT_API_BASE_URL: &str = "https://marketplace.scriptkit.com";

/// Default page size for catalog queries
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Quiet period before a username/search check fires (milliseconds)
pub const DEFAULT_USERNAME_DEBOUNCE_MS: u64 = 500;

/// Quiet period before a source lint check fires (milliseconds)
pub const DEFAULT_LINT_DEBOUNCE_MS: u64 = 250;

/// User configuration for the marketplace engine, loaded from
/// `~/.scriptkit/market.json`. Every field is optional; getters fall back to
/// the defaults above.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "apiBaseUrl"
    )]
    pub api_base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "pageSize")]
    pub page_size: Option<usize>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "usernameDebounceMs"
    )]
    pub username_debounce_ms: Option<u64>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "lintDebounceMs"
    )]
    pub lint_debounce_ms: Option<u64>,
}

impl MarketConfig {
    /// Path to the config file (~/.scriptkit/market.json)
    pub fn config_path() -> PathBuf {
        PathBuf::from(shellexpand::tilde("~/.scriptkit").as_ref()).join("market.json")
    }

    /// Load the config from disk, falling back to defaults when the file is
    /// missing or malformed. A malformed file is a warning, never an error.
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &PathBuf) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<MarketConfig>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "Loaded marketplace config");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Malformed marketplace config, using defaults");
                    MarketConfig::default()
                }
            },
            Err(_) => MarketConfig::default(),
        }
    }

    /// Returns the configured API base URL, or the default endpoint
    pub fn api_base_url(&self) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    /// Returns the catalog page size, clamped to at least 1
    pub fn page_size(&self) -> usize {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1)
    }

    /// Quiet period for username/search debouncing
    pub fn username_debounce(&self) -> Duration {
        Duration::from_millis(
            self.username_debounce_ms
                .unwrap_or(DEFAULT_USERNAME_DEBOUNCE_MS),
        )
    }

    /// Quiet period for lint debouncing
    pub fn lint_debounce(&self) -> Duration {
        Duration::from_millis(self.lint_debounce_ms.unwrap_or(DEFAULT_LINT_DEBOUNCE_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        let config = MarketConfig::default();
        assert_eq!(config.api_base_url(), DEFAULT_API_BASE_URL);
        assert_eq!(config.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(config.username_debounce(), Duration::from_millis(500));
        assert_eq!(config.lint_debounce(), Duration::from_millis(250));
    }

    #[test]
    fn parses_camel_case_fields() {
        let config: MarketConfig = serde_json::from_str(
            r#"{"apiBaseUrl": "http://localhost:3000", "pageSize": 50, "usernameDebounceMs": 10}"#,
        )
        .unwrap();
        assert_eq!(config.api_base_url(), "http://localhost:3000");
        assert_eq!(config.page_size(), 50);
        assert_eq!(config.username_debounce(), Duration::from_millis(10));
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("market.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = MarketConfig::load_from(&path);
        assert_eq!(config.page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn zero_page_size_is_clamped() {
        let config = MarketConfig {
            page_size: Some(0),
            ..Default::default()
        };
        assert_eq!(config.page_size(), 1);
    }
}
