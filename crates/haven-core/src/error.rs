//! # Error Types
//!
//! Domain-specific error types for haven-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  haven-core errors (this file)                                         │
//! │  └── CoreError        - Parsing and policy validation failures          │
//! │                                                                         │
//! │  haven-store errors (separate crate)                                   │
//! │  └── StoreError       - Persistence failures                           │
//! │                                                                         │
//! │  haven-sync errors (separate crate)                                    │
//! │  ├── SyncError        - Orchestrator / configuration failures          │
//! │  ├── CacheError       - Read-through cache failures                    │
//! │  └── TransportError   - Request executor failures                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised by the pure data model.
#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    /// A textual enum value (type, status, priority) was not recognised.
    ///
    /// ## When This Occurs
    /// - CLI filter arguments such as `--status retrying`
    /// - Environment overrides with a typo
    #[error("Unknown {kind}: '{value}'. Valid options: {allowed}")]
    UnknownVariant {
        kind: &'static str,
        value: String,
        allowed: &'static str,
    },

    /// A retry policy has values that would break the backoff arithmetic.
    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(String),
}

impl CoreError {
    pub(crate) fn unknown(kind: &'static str, value: &str, allowed: &'static str) -> Self {
        CoreError::UnknownVariant {
            kind,
            value: value.to_string(),
            allowed,
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
