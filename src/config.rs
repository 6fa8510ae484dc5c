//! Static engine configuration.

use crate::error::ConfigError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Immutable settings injected into each queue at construction.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Encoding worker count
    pub threads: usize,
    /// Maximum in-flight transfers
    pub download_concurrency: usize,
    /// Remote downloads switch; when off remote videos stay waiting
    pub enable_http_downloads: bool,
    /// Directory receiving downloaded sources
    pub download_storage_path: Option<PathBuf>,
    /// Directory receiving encoded outputs
    pub output_dir: PathBuf,
    /// JSON snapshot for the local entity store, in-memory only when unset
    pub store_path: Option<PathBuf>,
    /// Encoder executable
    pub encoder_program: String,
    pub encode_timeout: Duration,
    pub download_timeout: Duration,
    /// Transfer attempts before a video lands in `download_failed`
    pub download_max_attempts: u32,
    /// Base delay between transfer attempts, doubled per attempt
    pub download_backoff: Duration,
    /// Delay between store polls when a queue is idle
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            download_concurrency: 4,
            enable_http_downloads: true,
            download_storage_path: Some(PathBuf::from("./downloads")),
            output_dir: PathBuf::from("./encoded"),
            store_path: None,
            encoder_program: String::from("ffmpeg"),
            encode_timeout: Duration::from_secs(6 * 3600),
            download_timeout: Duration::from_secs(3600),
            download_max_attempts: 3,
            download_backoff: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            threads: parse_var("ENIGMA_THREADS")?.unwrap_or(defaults.threads),
            download_concurrency: parse_var("ENIGMA_DOWNLOAD_CONCURRENCY")?
                .unwrap_or(defaults.download_concurrency),
            enable_http_downloads: parse_var("ENIGMA_ENABLE_HTTP_DOWNLOADS")?
                .unwrap_or(defaults.enable_http_downloads),
            download_storage_path: match env::var("ENIGMA_DOWNLOAD_STORAGE_PATH") {
                Ok(path) if path.trim().is_empty() => None,
                Ok(path) => Some(PathBuf::from(path)),
                Err(_) => defaults.download_storage_path,
            },
            output_dir: env::var("ENIGMA_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            store_path: env::var("ENIGMA_STORE_PATH")
                .ok()
                .map(PathBuf::from)
                .or(defaults.store_path),
            encoder_program: env::var("ENIGMA_ENCODER_PROGRAM")
                .unwrap_or(defaults.encoder_program),
            encode_timeout: parse_var("ENIGMA_ENCODE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.encode_timeout),
            download_timeout: parse_var("ENIGMA_DOWNLOAD_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_timeout),
            download_max_attempts: parse_var("ENIGMA_DOWNLOAD_MAX_ATTEMPTS")?
                .unwrap_or(defaults.download_max_attempts),
            download_backoff: parse_var("ENIGMA_DOWNLOAD_BACKOFF_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_backoff),
            poll_interval: parse_var("ENIGMA_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        })
    }

    /// Checks the settings that would otherwise fail only after the queues start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Zero("threads"));
        }
        if self.download_concurrency == 0 {
            return Err(ConfigError::Zero("download_concurrency"));
        }
        if self.download_max_attempts == 0 {
            return Err(ConfigError::Zero("download_max_attempts"));
        }
        if self.enable_http_downloads && self.download_storage_path.is_none() {
            return Err(ConfigError::MissingStoragePath);
        }
        if self.encoder_program.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "encoder_program",
                value: self.encoder_program.clone(),
            });
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(None),
    }
}
