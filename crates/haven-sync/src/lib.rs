//! # haven-sync: Offline Sync Engines for Haven
//!
//! This crate provides the network-facing half of the offline-first core:
//! a persisted operation queue, the orchestrator that drains it, and a
//! read-through cache of remote collections.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Haven Sync Architecture                          │
//! │                                                                         │
//! │   UI / feature code                                                    │
//! │     │ enqueue(NewOperation)        │ sync()           │ read_through() │
//! │     ▼                              ▼                  ▼                 │
//! │  ┌────────────────┐   drain   ┌────────────────┐  ┌────────────────┐   │
//! │  │ OperationQueue │◄──────────│SyncOrchestrator│  │  CacheEngine   │   │
//! │  │                │           │                │  │                │   │
//! │  │ priority order │           │ single-flight  │  │ TTL snapshot   │   │
//! │  │ backoff+jitter │           │ throttle       │  │ all-or-nothing │   │
//! │  │ persisted list │           │ auto-sync      │  │ refresh        │   │
//! │  └───────┬────────┘           └───────┬────────┘  └───────┬────────┘   │
//! │          │                            │                   │             │
//! │          │        ┌───────────────────┘                   │             │
//! │          ▼        ▼                                       ▼             │
//! │  ┌────────────────────┐  ┌────────────────────┐  ┌─────────────────┐   │
//! │  │  NetworkMonitor    │  │  RequestExecutor   │  │ PersistentStore │   │
//! │  │  (watch channel)   │  │  (reqwest)         │  │ (haven-store)   │   │
//! │  └────────────────────┘  └────────────────────┘  └─────────────────┘   │
//! │                                                                         │
//! │  EVENT STREAMS                                                         │
//! │  • OperationQueue::subscribe_len      - queue length                   │
//! │  • SyncOrchestrator::subscribe_status - Idle/InProgress/...            │
//! │  • SyncOrchestrator::subscribe_results- SyncReport per run             │
//! │  • CacheEngine::subscribe             - CacheEvent                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`queue`] - Persisted, prioritised operation queue with backoff
//! - [`orchestrator`] - `SyncOrchestrator` guards, throttling, auto-sync
//! - [`cache`] - Read-through TTL cache of remote collections
//! - [`network`] - Connectivity monitor and TCP reachability probe
//! - [`executor`] - HTTP request seam and its reqwest implementation
//! - [`config`] - TOML configuration with `HAVEN_*` overrides
//! - [`error`] - Sync, cache and transport error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use haven_core::{NewOperation, OperationType};
//! use haven_store::{SqliteStore, StoreConfig};
//! use haven_sync::{
//!     ConnectivityMonitor, HttpExecutor, OperationQueue, SyncConfig, SyncOrchestrator,
//! };
//!
//! let config = SyncConfig::load_or_default(None);
//! let store = Arc::new(SqliteStore::new(StoreConfig::new("./haven.db")).await?);
//! let executor = Arc::new(HttpExecutor::from_config(&config)?);
//! let network = Arc::new(ConnectivityMonitor::online());
//!
//! let queue = Arc::new(
//!     OperationQueue::builder(store, executor, network)
//!         .with_config(&config)
//!         .open()
//!         .await?,
//! );
//! queue.enqueue(NewOperation::new(OperationType::Create, "/journals")).await;
//!
//! let orchestrator = Arc::new(SyncOrchestrator::new(queue, &config)?);
//! let report = orchestrator.sync().await?;
//! println!("synced {} / failed {}", report.succeeded, report.failed);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod network;
pub mod orchestrator;
pub mod queue;

// =============================================================================
// Re-exports
// =============================================================================

pub use cache::{
    CacheEngine, CacheEngineBuilder, CacheEntity, CacheEvent, CacheSnapshot, CollectionSpec,
    Membership,
};
pub use config::{
    CacheSettings, HttpSettings, QueueSettings, StorageSettings, SyncConfig, SyncSettings,
};
pub use error::{CacheError, CacheResult, SyncError, SyncResult, TransportError};
pub use executor::{HttpExecutor, HttpRequest, HttpResponse, RequestExecutor};
pub use network::{
    spawn_probe, ConnectivityMonitor, NetworkMonitor, NetworkStatus, ProbeConfig, ProbeHandle,
};
pub use orchestrator::{
    AutoSyncHandle, SyncOrchestrator, SyncOrchestratorBuilder, SyncReport, SyncStatus,
};
pub use queue::{
    BatchOutcome, CancelFlag, DrainReport, OperationQueue, OperationQueueBuilder,
    QUEUE_STORAGE_KEY,
};
