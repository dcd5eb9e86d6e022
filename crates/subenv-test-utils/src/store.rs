//! Mapping store with operation tracing.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use subenv_core::{
    EnvironmentId, EnvironmentRecord, Error, MappingStore, MemoryMappingStore, Result,
};

/// Record of a store operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Record written.
    Save {
        /// Environment id.
        id: String,
    },
    /// Record read.
    Get {
        /// Environment id.
        id: String,
    },
    /// All records read.
    GetAll,
    /// Record deleted.
    Delete {
        /// Environment id.
        id: String,
    },
}

/// In-memory mapping store that records every operation.
#[derive(Debug, Clone, Default)]
pub struct TracingMappingStore {
    inner: MemoryMappingStore,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    fail_saves: Arc<Mutex<Vec<String>>>,
}

impl TracingMappingStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `records`. Seeding is not recorded.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = EnvironmentRecord>) -> Self {
        Self {
            inner: MemoryMappingStore::with_records(records),
            ..Self::default()
        }
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns true if the store was never touched.
    #[must_use]
    pub fn untouched(&self) -> bool {
        self.operations.lock().expect("lock").is_empty()
    }

    /// Makes saves of `id` fail.
    pub fn fail_saves_of(&self, id: &str) {
        self.fail_saves.lock().expect("lock").push(id.to_string());
    }

    /// Reads a record without recording the access.
    pub async fn peek(&self, id: &str) -> Option<EnvironmentRecord> {
        self.inner.get(&EnvironmentId::new(id)).await.ok().flatten()
    }

    /// Reads every record without recording the access, sorted by id.
    pub async fn snapshot(&self) -> Vec<EnvironmentRecord> {
        let mut records = self.inner.get_all().await.unwrap_or_default();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    fn record(&self, op: StoreOp) {
        self.operations.lock().expect("lock").push(op);
    }
}

#[async_trait]
impl MappingStore for TracingMappingStore {
    async fn save(&self, record: &EnvironmentRecord) -> Result<()> {
        self.record(StoreOp::Save {
            id: record.id.to_string(),
        });
        if self
            .fail_saves
            .lock()
            .expect("lock")
            .iter()
            .any(|id| id == record.id.as_str())
        {
            return Err(Error::storage(format!("injected save failure for {}", record.id)));
        }
        self.inner.save(record).await
    }

    async fn get(&self, id: &EnvironmentId) -> Result<Option<EnvironmentRecord>> {
        self.record(StoreOp::Get { id: id.to_string() });
        self.inner.get(id).await
    }

    async fn get_all(&self) -> Result<Vec<EnvironmentRecord>> {
        self.record(StoreOp::GetAll);
        self.inner.get_all().await
    }

    async fn delete(&self, id: &EnvironmentId) -> Result<()> {
        self.record(StoreOp::Delete { id: id.to_string() });
        self.inner.delete(id).await
    }
}
