//! # In-Memory Store
//!
//! [`PersistentStore`] kept in a `HashMap`. Used by tests and by sessions
//! that must not touch disk. Can be told to fail writes so callers' error
//! paths are testable.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::store::{DataType, PersistentStore, Sensitivity};

type Key = (String, DataType, Sensitivity);

/// Volatile key-value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<Key, Vec<u8>>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put`/`delete` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `put` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored values.
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.read().await.is_empty()
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::QueryFailed("writes disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        data_type: DataType,
        sensitivity: Sensitivity,
    ) -> StoreResult<()> {
        self.check_writable()?;
        self.values
            .write()
            .await
            .insert((key.to_string(), data_type, sensitivity), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(
        &self,
        key: &str,
        data_type: DataType,
        sensitivity: Sensitivity,
    ) -> StoreResult<Vec<u8>> {
        self.values
            .read()
            .await
            .get(&(key.to_string(), data_type, sensitivity))
            .cloned()
            .ok_or_else(|| StoreError::not_found(key, data_type))
    }

    async fn delete(
        &self,
        key: &str,
        data_type: DataType,
        sensitivity: Sensitivity,
    ) -> StoreResult<()> {
        self.check_writable()?;
        self.values
            .write()
            .await
            .remove(&(key.to_string(), data_type, sensitivity));
        Ok(())
    }
}
