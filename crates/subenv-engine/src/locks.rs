//! Per-branch single-flight locks.
//!
//! Two concurrent requests for the same new branch would otherwise both miss
//! the store and provision two environments. Requests for one branch are
//! serialized inside this process; requests for different branches run in
//! parallel. Nothing coordinates across replicas.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Registry of per-branch locks. Entries are dropped once nobody holds or
/// waits on them.
#[derive(Debug, Clone, Default)]
pub struct BranchLocks {
    inner: LockMap,
}

/// Held while a branch is being allocated.
#[derive(Debug)]
pub struct BranchGuard {
    branch: String,
    locks: LockMap,
    lock: Option<OwnedMutexGuard<()>>,
}

impl BranchLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive use of `branch`.
    pub async fn lock(&self, branch: &str) -> BranchGuard {
        let mutex = {
            let mut map = self
                .inner
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(map.entry(branch.to_string()).or_default())
        };
        let lock = mutex.lock_owned().await;
        BranchGuard {
            branch: branch.to_string(),
            locks: Arc::clone(&self.inner),
            lock: Some(lock),
        }
    }

    /// Number of branches with a live lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Returns true if no branch is locked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for BranchGuard {
    fn drop(&mut self) {
        let mut map = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.lock = None;
        // Only the map still references the mutex: nobody is waiting.
        if map
            .get(&self.branch)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            map.remove(&self.branch);
        }
    }
}
