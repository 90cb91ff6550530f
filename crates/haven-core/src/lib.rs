//! # haven-core: Pure Types for the Haven Sync Core
//!
//! This crate holds the data model and the rules of the offline-first sync
//! core as pure code with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Haven Sync Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Mobile clients (journals, check-ins, tools)          │   │
//! │  │      enqueue mutations ──► read cached catalogs ──► sync()      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        haven-sync (queue, orchestrator, read-through cache)     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ haven-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────┐  ┌────────────┐  ┌────────────┐               │   │
//! │  │   │ operation  │  │   retry    │  │   clock    │               │   │
//! │  │   │ Queued-    │  │ Retry-     │  │ Clock      │               │   │
//! │  │   │ Operation  │  │ Policy     │  │ ManualClock│               │   │
//! │  │   └────────────┘  └────────────┘  └────────────┘               │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`operation`] - `QueuedOperation` and its state machine
//! - [`retry`] - Exponential backoff with jitter and retry eligibility
//! - [`clock`] - Wall-clock abstraction (real and manual)
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::Utc;
//! use haven_core::{NewOperation, OperationType, Priority, QueuedOperation};
//!
//! let op = QueuedOperation::new(
//!     NewOperation::new(OperationType::Create, "/journals")
//!         .priority(Priority::High)
//!         .resource("journal-42", "journal"),
//!     Utc::now(),
//! );
//!
//! assert_eq!(op.retry_count, 0);
//! assert_eq!(op.http_method().as_str(), "POST");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod error;
pub mod operation;
pub mod retry;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use operation::{
    HttpMethod, NewOperation, OperationId, OperationStatus, OperationType, Priority,
    QueuedOperation,
};
pub use retry::RetryPolicy;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Attempts allowed before an operation is parked in `Failed` for good.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Jitter bound applied symmetrically to every backoff delay (±30%).
pub const DEFAULT_JITTER: f64 = 0.3;
