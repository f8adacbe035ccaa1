use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const API_URL_ENV: &str = "TASKDECK_API_URL";

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080/api";
const MIN_REQUEST_TIMEOUT_MS: u64 = 500;
const MAX_REQUEST_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const MIN_READ_RETRY_ATTEMPTS: u32 = 1;
const MAX_READ_RETRY_ATTEMPTS: u32 = 10;
const DEFAULT_READ_RETRY_ATTEMPTS: u32 = 3;
const MIN_BACKOFF_MS: u64 = 50;
const MAX_INITIAL_BACKOFF_MS: u64 = 5_000;
const MAX_BACKOFF_CEILING_MS: u64 = 30_000;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;
const MIN_POLL_INTERVAL_MS: u64 = 1_000;
const MAX_POLL_INTERVAL_MS: u64 = 300_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub read_retry_attempts: u32,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub poll_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_board: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            read_retry_attempts: DEFAULT_READ_RETRY_ATTEMPTS,
            retry_initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            retry_max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            default_board: None,
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("taskdeck");
        path.push("settings.toml");
        Some(path)
    }

    /// Loads the config file (or defaults) and applies the API URL override
    /// from the environment.
    pub fn load() -> Self {
        let mut settings = match Self::config_path() {
            Some(path) => Self::load_from_path(&path),
            None => Self::default(),
        };

        if let Ok(url) = std::env::var(API_URL_ENV) {
            settings.apply_api_url_override(&url);
        }

        settings
    }

    /// Reads one settings file without environment overrides. A missing or
    /// unreadable file yields the defaults.
    pub fn load_from_path(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(mut settings) => {
                    settings.validate();
                    settings
                }
                Err(error) => {
                    warn!(
                        "failed to parse settings config '{}': {}",
                        path.display(),
                        error
                    );
                    Self::default()
                }
            },
            Err(error) => {
                warn!(
                    "failed to read settings config '{}': {}",
                    path.display(),
                    error
                );
                Self::default()
            }
        }
    }

    /// Validates and writes the settings through a temporary file renamed
    /// into place.
    pub fn save_to_path(&self, path: &Path) -> anyhow::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("invalid settings config path"))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory '{}'", parent.display()))?;

        let mut validated = self.clone();
        validated.validate();
        let contents =
            toml::to_string_pretty(&validated).context("failed to serialize settings to TOML")?;

        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("invalid settings config file name"))?
            .to_string_lossy()
            .to_string();
        let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

        fs::write(&tmp_path, contents).with_context(|| {
            format!(
                "failed to write temporary settings file '{}'",
                tmp_path.display()
            )
        })?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "failed to atomically rename settings file '{}' to '{}'",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }

    fn apply_api_url_override(&mut self, raw: &str) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return;
        }
        self.api_base_url = trimmed.to_string();
        self.validate();
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// An interval given outside the settings file, held to the same bounds.
    pub fn bounded_poll_interval(ms: u64) -> Duration {
        Duration::from_millis(ms.clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS))
    }

    fn validate(&mut self) {
        self.request_timeout_ms = self
            .request_timeout_ms
            .clamp(MIN_REQUEST_TIMEOUT_MS, MAX_REQUEST_TIMEOUT_MS);
        self.read_retry_attempts = self
            .read_retry_attempts
            .clamp(MIN_READ_RETRY_ATTEMPTS, MAX_READ_RETRY_ATTEMPTS);
        self.retry_initial_backoff_ms = self
            .retry_initial_backoff_ms
            .clamp(MIN_BACKOFF_MS, MAX_INITIAL_BACKOFF_MS);
        self.retry_max_backoff_ms = self
            .retry_max_backoff_ms
            .clamp(self.retry_initial_backoff_ms, MAX_BACKOFF_CEILING_MS);
        self.poll_interval_ms = self
            .poll_interval_ms
            .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS);

        let url = self.api_base_url.trim().trim_end_matches('/');
        self.api_base_url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            warn!(
                "invalid api_base_url '{}' in settings config; falling back to {}",
                self.api_base_url, DEFAULT_API_BASE_URL
            );
            DEFAULT_API_BASE_URL.to_string()
        };

        self.default_board = self
            .default_board
            .take()
            .map(|board| board.trim().to_string())
            .filter(|board| !board.is_empty());
    }
}
