//! The fixed pool of sub-environment slots.
//!
//! Slots are named `{prefix}{n}` for `n` in `1..=size`. Some slots are
//! reserved (shared bases, long-lived fixtures) and are never handed out.

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::EnvironmentId;

/// Slot pool definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPool {
    /// Slot name prefix.
    pub prefix: String,
    /// Number of slots, numbered from 1.
    pub size: usize,
    /// Slots that are never allocated.
    pub reserved: BTreeSet<String>,
}

impl Default for SlotPool {
    fn default() -> Self {
        Self {
            prefix: "test".to_string(),
            size: 50,
            reserved: ["test17", "test33"].into_iter().map(str::to_string).collect(),
        }
    }
}

impl SlotPool {
    /// Creates a pool with no reserved slots.
    #[must_use]
    pub fn new(prefix: impl Into<String>, size: usize) -> Self {
        Self {
            prefix: prefix.into(),
            size,
            reserved: BTreeSet::new(),
        }
    }

    /// Marks `ids` as reserved.
    #[must_use]
    pub fn with_reserved<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Returns true if `id` is reserved.
    #[must_use]
    pub fn is_reserved(&self, id: &str) -> bool {
        self.reserved.contains(id)
    }

    /// Every allocatable slot, in numeric order.
    #[must_use]
    pub fn slots(&self) -> Vec<EnvironmentId> {
        (1..=self.size)
            .map(|n| format!("{}{n}", self.prefix))
            .filter(|id| !self.is_reserved(id))
            .map(EnvironmentId::new)
            .collect()
    }

    /// Allocatable slots not present in `used`.
    #[must_use]
    pub fn available<'a, I>(&self, used: I) -> Vec<EnvironmentId>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let used: BTreeSet<&str> = used.into_iter().collect();
        self.slots()
            .into_iter()
            .filter(|id| !used.contains(id.as_str()))
            .collect()
    }

    /// Picks a free slot uniformly at random.
    ///
    /// # Errors
    ///
    /// Returns `Error::PoolExhausted` if every allocatable slot is in `used`.
    pub fn choose<'a, I>(&self, used: I) -> Result<EnvironmentId>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let free = self.available(used);
        free.choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(Error::PoolExhausted {
                pool_size: self.slots().len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_skips_reserved_slots() {
        let pool = SlotPool::default();
        let slots = pool.slots();
        assert_eq!(slots.len(), 48);
        assert!(!slots.iter().any(|s| s.as_str() == "test17" || s.as_str() == "test33"));
        assert_eq!(slots[0].as_str(), "test1");
    }

    #[test]
    fn pool_of_three_fills_then_exhausts() {
        let pool = SlotPool::new("env", 3);
        let mut used: Vec<String> = Vec::new();
        for _ in 0..3 {
            let id = pool
                .choose(used.iter().map(String::as_str))
                .map_err(|e| e.to_string());
            let Ok(id) = id else {
                panic!("pool exhausted early: {id:?}");
            };
            assert!(!used.contains(&id.to_string()));
            used.push(id.to_string());
        }
        let err = pool.choose(used.iter().map(String::as_str)).err();
        assert!(matches!(err, Some(Error::PoolExhausted { pool_size: 3 })));
    }

    #[test]
    fn available_ignores_ids_outside_the_pool() {
        let pool = SlotPool::new("test", 2);
        let free = pool.available(["test1", "test99", "test33"]);
        assert_eq!(free, vec![EnvironmentId::new("test2")]);
    }
}
