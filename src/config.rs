//! Persistent tool configuration model and defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::backends::{claude_vision, scryfall};
use crate::resolution::rate_limited_client::DEFAULT_MIN_REQUEST_INTERVAL;
use crate::resolution::retrying_caller::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};

pub const CONFIG_FILE_NAME: &str = "card_collector.toml";
const MIN_REQUEST_INTERVAL_FLOOR_MS: u64 = DEFAULT_MIN_REQUEST_INTERVAL.as_millis() as u64;
const MAX_REQUEST_INTERVAL_MS: u64 = 10_000;
const MAX_RETRY_ATTEMPTS: u32 = 10;
const MAX_BASE_RETRY_DELAY_MS: u64 = 60_000;

/// Root configuration persisted to `card_collector.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Card catalog endpoint and request pacing.
    pub catalog: CatalogConfig,
    #[serde(default)]
    /// Image recognition endpoint, model and retry budget.
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Minimum spacing between catalog requests, process-wide. Never below 100 ms.
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RecognitionConfig {
    #[serde(default = "default_recognition_api_url")]
    pub api_url: String,
    #[serde(default = "default_recognition_model")]
    pub model: String,
    /// Environment variable holding the API key. The key itself is never persisted.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Storage location overrides. An empty path means the per-user data directory.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub database_path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_base_url(),
            user_agent: default_user_agent(),
            min_request_interval_ms: default_min_request_interval_ms(),
        }
    }
}

impl CatalogConfig {
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            api_url: default_recognition_api_url(),
            model: default_recognition_model(),
            api_key_env: default_api_key_env(),
            max_attempts: default_max_attempts(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl RecognitionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_retry_delay_ms),
        }
    }
}

impl StorageConfig {
    /// Configured database path, or `<data dir>/card_collector/collection.db`.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        let configured = self.database_path.trim();
        if !configured.is_empty() {
            return Some(PathBuf::from(configured));
        }
        dirs::data_dir().map(|dir| dir.join("card_collector").join("collection.db"))
    }
}

fn default_catalog_base_url() -> String {
    scryfall::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("card_collector/{}", env!("CARGO_PKG_VERSION"))
}

fn default_min_request_interval_ms() -> u64 {
    DEFAULT_MIN_REQUEST_INTERVAL.as_millis() as u64
}

fn default_recognition_api_url() -> String {
    claude_vision::DEFAULT_API_URL.to_string()
}

fn default_recognition_model() -> String {
    claude_vision::DEFAULT_MODEL.to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_retry_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY.as_millis() as u64
}

fn default_max_tokens() -> u32 {
    claude_vision::DEFAULT_MAX_TOKENS
}

/// Clamps values a hand-edited file may have pushed out of range.
pub fn sanitize_config(config: Config) -> Config {
    let mut catalog = config.catalog;
    catalog.min_request_interval_ms = catalog
        .min_request_interval_ms
        .clamp(MIN_REQUEST_INTERVAL_FLOOR_MS, MAX_REQUEST_INTERVAL_MS);
    if catalog.base_url.trim().is_empty() {
        catalog.base_url = default_catalog_base_url();
    }
    if catalog.user_agent.trim().is_empty() {
        catalog.user_agent = default_user_agent();
    }

    let mut recognition = config.recognition;
    recognition.max_attempts = recognition.max_attempts.clamp(1, MAX_RETRY_ATTEMPTS);
    recognition.base_retry_delay_ms = recognition
        .base_retry_delay_ms
        .min(MAX_BASE_RETRY_DELAY_MS);
    recognition.max_tokens = recognition.max_tokens.clamp(256, 8_192);
    if recognition.api_url.trim().is_empty() {
        recognition.api_url = default_recognition_api_url();
    }
    if recognition.model.trim().is_empty() {
        recognition.model = default_recognition_model();
    }
    if recognition.api_key_env.trim().is_empty() {
        recognition.api_key_env = default_api_key_env();
    }

    Config {
        catalog,
        recognition,
        storage: config.storage,
        logging: config.logging,
    }
}
