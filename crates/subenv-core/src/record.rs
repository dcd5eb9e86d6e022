//! Environment records: the unit of state kept in the mapping store.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Branch sentinel for environments not owned by any feature branch.
pub const IN_TREE: &str = "in-tree";

/// Slot name of a sub-environment (e.g. `test5`).
///
/// Doubles as the remote platform's environment key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentId(String);

impl EnvironmentId {
    /// Wraps a slot name.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the slot name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EnvironmentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EnvironmentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Cached state of one sub-environment slot.
///
/// `owning_branch` is advisory: the remote catalog is authoritative for which
/// environments exist and what runs in them, this record is authoritative for
/// which branch is using the slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    /// Slot name.
    pub id: EnvironmentId,
    /// Branch using the slot, or [`IN_TREE`].
    pub owning_branch: String,
    /// Identity of the last actor that mutated the environment.
    pub last_updated_by: String,
    /// Services deployed in the environment.
    pub deployed_services: BTreeSet<String>,
}

impl EnvironmentRecord {
    /// Creates a record owned by `branch` with the given services.
    #[must_use]
    pub fn new<I, S>(
        id: EnvironmentId,
        branch: impl Into<String>,
        updated_by: impl Into<String>,
        services: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id,
            owning_branch: branch.into(),
            last_updated_by: updated_by.into(),
            deployed_services: services.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a record for an environment no feature branch has claimed.
    #[must_use]
    pub fn in_tree<I, S>(id: EnvironmentId, updated_by: impl Into<String>, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(id, IN_TREE, updated_by, services)
    }

    /// Adds a service. Returns false if it was already present.
    pub fn add_service(&mut self, service: impl Into<String>) -> bool {
        self.deployed_services.insert(service.into())
    }

    /// Returns true if the service is deployed here.
    #[must_use]
    pub fn has_service(&self, service: &str) -> bool {
        self.deployed_services.contains(service)
    }

    /// Returns true if `branch` owns this environment.
    #[must_use]
    pub fn is_owned_by(&self, branch: &str) -> bool {
        self.owning_branch == branch
    }
}
