//! Mapping store abstraction: durable persistence of environment records.
//!
//! The store holds one record per environment id. There is no secondary
//! index: branch lookups scan every record, which is only acceptable because
//! the pool is small (a few dozen slots).
//!
//! ## Consistency
//!
//! `save` is a last-writer-wins overwrite. Callers must tolerate eventual
//! consistency between the remote catalog and this cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::record::{EnvironmentId, EnvironmentRecord};

/// Persistence contract for environment records.
///
/// Implemented by the Redis backend for production and by
/// [`MemoryMappingStore`] for tests and local runs.
#[async_trait]
pub trait MappingStore: Send + Sync + 'static {
    /// Inserts or overwrites the record stored under `record.id`.
    async fn save(&self, record: &EnvironmentRecord) -> Result<()>;

    /// Reads a record. Returns `None` if absent.
    async fn get(&self, id: &EnvironmentId) -> Result<Option<EnvironmentRecord>>;

    /// Reads every record, in arbitrary order.
    async fn get_all(&self) -> Result<Vec<EnvironmentRecord>>;

    /// Deletes a record.
    ///
    /// Returns `Error::NotFound` if no record exists for `id`.
    async fn delete(&self, id: &EnvironmentId) -> Result<()>;

    /// Finds the environment owned by `branch`.
    ///
    /// Linear scan over [`MappingStore::get_all`]; the first match wins.
    /// Records are sorted by id first so the answer is stable across backends.
    async fn find_by_branch(&self, branch: &str) -> Result<Option<EnvironmentRecord>> {
        let mut records = self.get_all().await?;
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records.into_iter().find(|r| r.is_owned_by(branch)))
    }

    /// Cheap connectivity probe used by readiness checks.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory mapping store.
///
/// Thread-safe via `RwLock`. Contents are lost on restart, so this is only
/// used in tests and debug runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryMappingStore {
    records: Arc<RwLock<HashMap<EnvironmentId, EnvironmentRecord>>>,
}

impl MemoryMappingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `records`.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = EnvironmentRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            records: Arc::new(RwLock::new(map)),
        }
    }

    fn poisoned() -> Error {
        Error::Internal {
            message: "lock poisoned".into(),
        }
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn save(&self, record: &EnvironmentRecord) -> Result<()> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &EnvironmentId) -> Result<Option<EnvironmentRecord>> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<EnvironmentRecord>> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.values().cloned().collect())
    }

    async fn delete(&self, id: &EnvironmentId) -> Result<()> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        records
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("environment record {id}")))
    }
}
