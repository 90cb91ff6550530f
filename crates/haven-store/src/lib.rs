//! # haven-store: Persistence Layer for the Haven Sync Core
//!
//! This crate provides the key-value persistence that both sync engines use
//! as their source of truth across process restarts.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Haven Persistence Flow                           │
//! │                                                                         │
//! │  OperationQueue::persist() / CacheEngine::persist()                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   haven-store (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────────┐   ┌───────────────┐   ┌──────────────┐   │   │
//! │  │   │ PersistentStore│   │  SqliteStore  │   │ MemoryStore  │   │   │
//! │  │   │ (store.rs)     │◄──│ (sqlite.rs)   │   │ (memory.rs)  │   │   │
//! │  │   │ put/get/delete │   │ kv_store table│   │ HashMap      │   │   │
//! │  │   └────────────────┘   └───────────────┘   └──────────────┘   │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <platform data dir>/haven/haven.db                            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - The `PersistentStore` trait and its key tags
//! - [`sqlite`] - SQLite-backed store (connection pool + configuration)
//! - [`memory`] - In-memory store for tests and ephemeral sessions
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Store error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use haven_store::{DataType, PersistentStore, Sensitivity, SqliteStore, StoreConfig};
//!
//! let store = SqliteStore::new(StoreConfig::new("./haven.db")).await?;
//! store.put("operation_queue", b"[]".to_vec(), DataType::Queue, Sensitivity::Sensitive).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod memory;
pub mod migrations;
pub mod sqlite;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, StoreConfig};
pub use store::{DataType, PersistentStore, Sensitivity};
