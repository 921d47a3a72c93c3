use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants;

/// Engine configuration.
///
/// Every field has a default, so a config file only needs the values it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub page_size: usize,
    pub edge_threshold_px: f64,
    pub context_before: usize,
    pub context_after: usize,
    pub context_page_size: usize,
    pub realtime_tail_size: usize,
    pub search_debounce_ms: u64,
    pub search_min_query_len: usize,
    pub search_page_size: usize,
    pub index_poll_interval_ms: u64,
    pub export_poll_interval_ms: u64,
}

impl CoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load a JSON config file. Missing fields fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: CoreConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Defaults overlaid with `CHATLOG_BASE_URL` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(constants::ENV_BASE_URL) {
            if !url.trim().is_empty() {
                config.base_url = url.trim().to_string();
            }
        }
        config
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn index_poll_interval(&self) -> Duration {
        Duration::from_millis(self.index_poll_interval_ms)
    }

    pub fn export_poll_interval(&self) -> Duration {
        Duration::from_millis(self.export_poll_interval_ms)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            base_url: constants::DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: constants::REQUEST_TIMEOUT_MS,
            page_size: constants::PAGE_SIZE,
            edge_threshold_px: constants::EDGE_THRESHOLD_PX,
            context_before: constants::CONTEXT_BEFORE,
            context_after: constants::CONTEXT_AFTER,
            context_page_size: constants::CONTEXT_PAGE_SIZE,
            realtime_tail_size: constants::REALTIME_TAIL_SIZE,
            search_debounce_ms: constants::SEARCH_DEBOUNCE_MS,
            search_min_query_len: constants::SEARCH_MIN_QUERY_LEN,
            search_page_size: constants::SEARCH_PAGE_SIZE,
            index_poll_interval_ms: constants::INDEX_POLL_INTERVAL_MS,
            export_poll_interval_ms: constants::EXPORT_POLL_INTERVAL_MS,
        }
    }
}
