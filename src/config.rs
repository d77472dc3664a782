//! Configuration file parser for ~/.config/readly/config.toml.
//!
//! The config file is optional; a missing or empty file yields
//! `Config::default()`. Unknown keys are accepted (and logged) so config
//! files survive upgrades in both directions.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),
}

// ============================================================================
// Configuration
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified; missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database file path. Defaults to `~/.local/share/readly/readly.db`.
    pub db_path: Option<PathBuf>,

    /// Per-request timeout for feed fetches, in seconds.
    pub request_timeout_secs: u64,

    /// Pause between consecutive feeds during a batch refresh, in
    /// milliseconds. Keeps a subscriber with many feeds from hammering
    /// hosts back to back.
    pub refresh_delay_ms: u64,

    /// A feed fetched more recently than this is considered fresh and
    /// skipped by `refresh --stale-only`.
    pub stale_threshold_minutes: u64,

    /// Suggested interval for external schedulers (cron etc.). The CLI
    /// itself only refreshes when invoked.
    pub refresh_interval_minutes: u64,

    /// Endpoint for the streaming summarization service. Summarization
    /// is unavailable when unset.
    pub summarize_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            request_timeout_secs: 30,
            refresh_delay_ms: 500,
            stale_threshold_minutes: 5,
            refresh_interval_minutes: 15,
            summarize_endpoint: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as a warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "db_path",
                "request_timeout_secs",
                "refresh_delay_ms",
                "stale_threshold_minutes",
                "refresh_interval_minutes",
                "summarize_endpoint",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// The resolved database path: explicit config value, or the
    /// platform data directory fallback.
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.db_path {
            return path.clone();
        }
        let base = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        base.join(".local/share/readly/readly.db")
    }

    /// Default config file location (`~/.config/readly/config.toml`).
    pub fn default_path() -> PathBuf {
        let base = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        base.join(".config/readly/config.toml")
    }
}

// ============================================================================
// Tests
// ============================================================================
