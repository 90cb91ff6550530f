//! # Persistent Store Contract
//!
//! Key-value byte storage consumed by the sync engines.
//!
//! Every key is qualified by a [`DataType`] (what it is) and a
//! [`Sensitivity`] (how carefully the platform must keep it). The same key
//! under two different tags names two different values. Platform layers are
//! free to route sensitive values to a keychain/keystore; the sync core never
//! looks past the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StoreResult;

/// Category of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Remote data mirrored locally (cache snapshots).
    Cache,
    /// User or device preferences.
    Preferences,
    /// The pending-mutation queue.
    Queue,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Cache => "cache",
            DataType::Preferences => "preferences",
            DataType::Queue => "queue",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How sensitive a stored value is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// Personal content (journal text, check-in answers).
    Sensitive,
    /// Catalog/reference data.
    NonSensitive,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Sensitive => "sensitive",
            Sensitivity::NonSensitive => "nonsensitive",
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key-value byte storage.
///
/// `get` on a missing key returns [`StoreError::NotFound`](crate::StoreError::NotFound);
/// `delete` on a missing key succeeds.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Stores `value`, replacing any previous value.
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        data_type: DataType,
        sensitivity: Sensitivity,
    ) -> StoreResult<()>;

    /// Loads the value stored under `key`.
    async fn get(
        &self,
        key: &str,
        data_type: DataType,
        sensitivity: Sensitivity,
    ) -> StoreResult<Vec<u8>>;

    /// Removes the value stored under `key`.
    async fn delete(
        &self,
        key: &str,
        data_type: DataType,
        sensitivity: Sensitivity,
    ) -> StoreResult<()>;

    /// Loads a value, mapping a missing key to `None`.
    async fn get_optional(
        &self,
        key: &str,
        data_type: DataType,
        sensitivity: Sensitivity,
    ) -> StoreResult<Option<Vec<u8>>> {
        match self.get(key, data_type, sensitivity).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
