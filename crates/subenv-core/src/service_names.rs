//! Service name table: maps a requested service to its build target.
//!
//! The deployment platform names services, build modules, repositories and
//! build definitions inconsistently, so every deployable service carries an
//! explicit [`BuildTarget`]. A few services ship several build targets from
//! one repository; those are told apart by substrings of the branch name,
//! checked in table order (first match wins, so longer substrings such as
//! `beepapp` must precede `beep`).
//!
//! The table is configuration data. A built-in copy is compiled in and a
//! replacement can be loaded from a JSON file at startup.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static BUILTIN_TABLE: &str = include_str!("../data/service_names.json");

/// Identifiers the platform needs to build and deploy one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    /// Service name as registered on the platform.
    pub service_name: String,
    /// Build module within the service.
    pub service_module: String,
    /// Source repository name.
    pub repo_name: String,
    /// Build definition name.
    pub build_name: String,
}

impl BuildTarget {
    /// Target whose identifiers are all `service`.
    #[must_use]
    pub fn identity(service: &str) -> Self {
        Self {
            service_name: service.to_string(),
            service_module: service.to_string(),
            repo_name: service.to_string(),
            build_name: service.to_string(),
        }
    }
}

/// A branch-dependent override for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchVariant {
    /// Substring the branch name must contain.
    pub contains: String,
    /// Target used when the substring matches.
    pub target: BuildTarget,
}

/// Table entry for one requested service name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Service name as callers request it.
    pub name: String,
    /// Fallback target. Absent for services that are only deployable through
    /// a branch variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<BuildTarget>,
    /// Ordered branch overrides.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branch_variants: Vec<BranchVariant>,
}

impl ServiceEntry {
    fn resolve(&self, branch: &str) -> Option<&BuildTarget> {
        self.branch_variants
            .iter()
            .find(|v| branch.contains(v.contains.as_str()))
            .map(|v| &v.target)
            .or(self.target.as_ref())
    }
}

#[derive(Debug, Deserialize)]
struct TableFile {
    services: Vec<ServiceEntry>,
}

/// Lookup table from requested service name to [`BuildTarget`].
#[derive(Debug, Clone, Default)]
pub struct ServiceNameTable {
    entries: HashMap<String, ServiceEntry>,
}

impl ServiceNameTable {
    /// Builds a table from entries. Later duplicates replace earlier ones.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = ServiceEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.name.clone(), e)).collect(),
        }
    }

    /// Returns the compiled-in table.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the embedded JSON is malformed.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_TABLE)
    }

    /// Parses a table from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` on malformed input.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: TableFile = serde_json::from_str(raw)?;
        Ok(Self::new(file.services))
    }

    /// Reads a table from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the file cannot be read and
    /// `Error::Serialization` if it does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidInput(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Resolves the build target for `service` deployed from `branch`.
    ///
    /// Services without an entry use their own name for every identifier.
    ///
    /// # Errors
    ///
    /// Returns `Error::ServiceNotFound` if the service only builds through
    /// branch variants and none of them match.
    pub fn resolve(&self, service: &str, branch: &str) -> Result<BuildTarget> {
        let Some(entry) = self.entries.get(service) else {
            return Ok(BuildTarget::identity(service));
        };
        entry
            .resolve(branch)
            .cloned()
            .ok_or_else(|| Error::ServiceNotFound {
                service: service.to_string(),
            })
    }

    /// Returns true if the table knows `service`.
    #[must_use]
    pub fn contains(&self, service: &str) -> bool {
        self.entries.contains_key(service)
    }

    /// Number of services in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
