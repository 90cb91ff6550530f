//! # Sync Error Types
//!
//! Error types for the orchestrator, the cache engine and the transport seam.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  SyncError      │  │  CacheError     │  │  TransportError         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Network...     │  │  Network        │  │  Timeout                │ │
//! │  │  SyncInProgress │  │  Storage        │  │  Connect                │ │
//! │  │  QueueEmpty     │  │  InvalidData    │  │  Other                  │ │
//! │  │  Cancelled      │  │  CacheExpired   │  │                         │ │
//! │  │  Config...      │  │  NotFound       │  │  (never surfaces past   │ │
//! │  │                 │  │                 │  │   the queue engine)     │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use haven_store::StoreError;

/// Result type alias for orchestrator and configuration operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// Sync Errors
// =============================================================================

/// Errors returned by [`SyncOrchestrator::sync`](crate::SyncOrchestrator::sync)
/// and by configuration loading.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Pre-flight Errors
    // =========================================================================
    /// The network monitor reports no connectivity.
    #[error("Network unavailable")]
    NetworkUnavailable,

    /// Another sync is already running.
    #[error("A sync is already in progress")]
    SyncInProgress,

    /// Nothing to deliver.
    #[error("Operation queue is empty")]
    QueueEmpty,

    /// The running sync was cancelled before it finished.
    #[error("Sync was cancelled")]
    Cancelled,

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid base URL.
    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Persistent store failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<haven_core::CoreError> for SyncError {
    fn from(err: haven_core::CoreError) -> Self {
        SyncError::InvalidConfig(err.to_string())
    }
}

impl SyncError {
    /// Returns true if calling `sync()` again later may succeed.
    ///
    /// ## Retryable Errors
    /// - Offline (connectivity may come back)
    /// - Another sync running
    /// - Cancelled
    ///
    /// ## Non-Retryable Errors
    /// - Empty queue (nothing will change until something is enqueued)
    /// - Configuration and storage errors
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NetworkUnavailable | SyncError::SyncInProgress | SyncError::Cancelled
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

// =============================================================================
// Cache Errors
// =============================================================================

/// Errors returned by the cache engine. None of them leave a partially
/// refreshed snapshot behind.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Offline, transport failure, or a non-2xx response.
    #[error("Network error: {0}")]
    Network(String),

    /// The snapshot could not be persisted or removed.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// A fetched or persisted payload could not be decoded.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The cache is stale and the caller required fresh data.
    #[error("Cache expired")]
    CacheExpired,

    /// No entity with this id, or nothing cached yet.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::InvalidData(err.to_string())
    }
}

impl CacheError {
    /// Returns true if a later refresh may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Network(_) | CacheError::Storage(_))
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Failure to obtain any HTTP response at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No response within the request timeout.
    #[error("Request timed out")]
    Timeout,

    /// Could not reach the server.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Anything else (TLS, malformed request, body read).
    #[error("Transport error: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::NetworkUnavailable.is_retryable());
        assert!(SyncError::SyncInProgress.is_retryable());
        assert!(!SyncError::QueueEmpty.is_retryable());
        assert!(!SyncError::InvalidConfig("batch_size".into()).is_retryable());

        assert!(CacheError::Network("offline".into()).is_retryable());
        assert!(!CacheError::InvalidData("bad json".into()).is_retryable());
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::InvalidUrl("nope".into()).is_config_error());
        assert!(!SyncError::Cancelled.is_config_error());
    }

    #[test]
    fn test_json_error_maps_to_invalid_data() {
        let err = serde_json::from_str::<Vec<u32>>("{").unwrap_err();
        assert!(matches!(CacheError::from(err), CacheError::InvalidData(_)));
    }
}
