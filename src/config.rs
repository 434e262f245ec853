//! Configuration file parser for ~/.config/feedmill/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, but logged as warnings since they are
//! most likely typos.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::search::DEFAULT_SEARCH_ENDPOINT;
use crate::transport::DEFAULT_MAX_BODY_BYTES;

/// Environment variable that overrides `search_api_key`.
pub const SEARCH_API_KEY_ENV: &str = "FEEDMILL_SEARCH_API_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level client configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The Debug impl masks `search_api_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-request timeout in seconds, applied by the transport.
    pub timeout_secs: u64,

    /// User-Agent header sent with every request.
    pub user_agent: String,

    /// Largest accepted response body in bytes.
    pub max_feed_bytes: usize,

    /// Base URL of the feed search index.
    pub search_endpoint: String,

    /// API key for the search index (alternative to FEEDMILL_SEARCH_API_KEY).
    /// Env var takes precedence over config file.
    pub search_api_key: Option<String>,

    /// Keep the cached article list when a refresh yields the same first article.
    pub suppress_unchanged_articles: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("feedmill/", env!("CARGO_PKG_VERSION")).to_string(),
            max_feed_bytes: DEFAULT_MAX_BODY_BYTES,
            search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            search_api_key: None,
            suppress_unchanged_articles: true,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("max_feed_bytes", &self.max_feed_bytes)
            .field("search_endpoint", &self.search_endpoint)
            .field(
                "search_api_key",
                &self.search_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "suppress_unchanged_articles",
                &self.suppress_unchanged_articles,
            )
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "timeout_secs",
        "user_agent",
        "max_feed_bytes",
        "search_endpoint",
        "search_api_key",
        "suppress_unchanged_articles",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            timeout_secs = config.timeout_secs,
            search_endpoint = %config.search_endpoint,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// The search API key, preferring the environment over the file.
    pub fn resolved_search_api_key(&self) -> Option<String> {
        std::env::var(SEARCH_API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.search_api_key.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
