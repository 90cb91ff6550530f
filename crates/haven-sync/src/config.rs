//! # Sync Configuration
//!
//! Configuration for the queue engine, the orchestrator, the cache engine
//! and the default collaborators.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     HAVEN_BASE_URL=https://api.haven.app                               │
//! │     HAVEN_BATCH_SIZE=20                                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/haven/sync.toml (Linux)                                  │
//! │     ~/Library/Application Support/app.haven.haven/sync.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [queue]
//! batch_size = 10
//! max_retries = 5
//! base_delay_ms = 1000
//! max_delay_secs = 300
//! jitter = 0.3
//! drain_delay_ms = 500
//!
//! [sync]
//! min_interval_secs = 5
//! auto_sync = true
//!
//! [cache]
//! ttl_secs = 3600
//!
//! [http]
//! base_url = "https://api.haven.app/v1/"
//! request_timeout_secs = 30
//!
//! [storage]
//! database_path = "/var/lib/haven/haven.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use haven_core::RetryPolicy;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Queue Settings
// =============================================================================

/// Operation queue behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Operations executed concurrently per drain batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Failed attempts after which an operation is never retried.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry (milliseconds).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any backoff (seconds).
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Symmetric jitter factor applied to each backoff.
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Pause between consecutive drain batches (milliseconds).
    #[serde(default = "default_drain_delay_ms")]
    pub drain_delay_ms: u64,
}

fn default_batch_size() -> usize {
    10
}
fn default_max_retries() -> u32 {
    haven_core::DEFAULT_MAX_RETRIES
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_secs() -> u64 {
    300
}
fn default_jitter() -> f64 {
    haven_core::DEFAULT_JITTER
}
fn default_drain_delay_ms() -> u64 {
    500
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            jitter: default_jitter(),
            drain_delay_ms: default_drain_delay_ms(),
        }
    }
}

// =============================================================================
// Orchestrator Settings
// =============================================================================

/// Sync orchestrator behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Minimum spacing between the starts of two sync cycles (seconds).
    /// An early `sync()` waits out the remainder.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,

    /// Drain automatically when connectivity comes back.
    #[serde(default = "default_true")]
    pub auto_sync: bool,
}

fn default_min_interval_secs() -> u64 {
    5
}
fn default_true() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            min_interval_secs: default_min_interval_secs(),
            auto_sync: true,
        }
    }
}

// =============================================================================
// Cache Settings
// =============================================================================

/// Read-through cache behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Time after a refresh during which the snapshot counts as fresh.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            ttl_secs: default_ttl_secs(),
        }
    }
}

// =============================================================================
// HTTP Settings
// =============================================================================

/// Default request executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Base URL operation endpoints are resolved against.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Where the key-value store lives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite database file. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync core configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub http: HttpSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl SyncConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.queue.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        self.retry_policy().validate()?;

        if self.cache.ttl_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "ttl_secs must be greater than 0".into(),
            ));
        }

        if self.http.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if let Some(ref raw) = self.http.base_url {
            let url = url::Url::parse(raw)?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(SyncError::InvalidUrl(format!(
                    "Base URL must start with http:// or https://, got: {}",
                    raw
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("HAVEN_BASE_URL") {
            debug!(url = %url, "Overriding base URL from environment");
            self.http.base_url = Some(url);
        }

        if let Ok(size) = std::env::var("HAVEN_BATCH_SIZE") {
            match size.parse::<usize>() {
                Ok(n) => self.queue.batch_size = n,
                Err(_) => warn!(value = %size, "Ignoring invalid HAVEN_BATCH_SIZE"),
            }
        }

        if let Ok(retries) = std::env::var("HAVEN_MAX_RETRIES") {
            if let Ok(n) = retries.parse::<u32>() {
                self.queue.max_retries = n;
            }
        }

        if let Ok(secs) = std::env::var("HAVEN_MIN_SYNC_INTERVAL_SECS") {
            if let Ok(n) = secs.parse::<u64>() {
                self.sync.min_interval_secs = n;
            }
        }

        if let Ok(flag) = std::env::var("HAVEN_AUTO_SYNC") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "on" => self.sync.auto_sync = true,
                "0" | "false" | "off" => self.sync.auto_sync = false,
                _ => warn!(value = %flag, "Unknown HAVEN_AUTO_SYNC value"),
            }
        }

        if let Ok(secs) = std::env::var("HAVEN_CACHE_TTL_SECS") {
            if let Ok(n) = secs.parse::<u64>() {
                debug!(ttl_secs = n, "Overriding cache TTL from environment");
                self.cache.ttl_secs = n;
            }
        }

        if let Ok(path) = std::env::var("HAVEN_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("app", "haven", "haven")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Retry policy for the queue engine.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.queue.base_delay_ms),
            max_delay: Duration::from_secs(self.queue.max_delay_secs),
            jitter: self.queue.jitter,
            max_retries: self.queue.max_retries,
        }
    }

    /// Pause between drain batches.
    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.queue.drain_delay_ms)
    }

    /// Minimum spacing between sync cycles.
    pub fn min_sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.min_interval_secs)
    }

    /// Cache time-to-live.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    /// Per-request timeout for the HTTP executor.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.request_timeout_secs)
    }

    /// Returns the base URL if configured.
    pub fn base_url(&self) -> Option<&str> {
        self.http.base_url.as_deref()
    }

    /// SQLite database path: configured, or `haven.db` in the platform data dir.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.storage.database_path.clone().or_else(|| {
            directories::ProjectDirs::from("app", "haven", "haven")
                .map(|dirs| dirs.data_dir().join("haven.db"))
        })
    }
}
