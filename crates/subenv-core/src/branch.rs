//! Branch classification.
//!
//! Stable branches (trunk, release, develop) never get a sub-environment.
//! Feature branches do. Anything else is rejected so typos surface early
//! instead of silently consuming a slot.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a branch is treated by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchKind {
    /// Trunk, release or develop branch: no allocation.
    Stable,
    /// Feature branch: gets its own sub-environment.
    Feature,
}

/// Branch naming rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchPolicy {
    /// Branch names that never allocate, matched exactly.
    pub stable: Vec<String>,
    /// Prefixes that mark a feature branch.
    pub feature_prefixes: Vec<String>,
}

impl Default for BranchPolicy {
    fn default() -> Self {
        Self {
            stable: ["main", "master", "release", "dev", "develop"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            feature_prefixes: vec!["feat/".to_string(), "feature/".to_string()],
        }
    }
}

impl BranchPolicy {
    /// Classifies `branch`.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnrecognizedBranch` when the name is neither stable nor
    /// carries a feature prefix with a non-empty remainder.
    pub fn classify(&self, branch: &str) -> Result<BranchKind> {
        if self.stable.iter().any(|s| s == branch) {
            return Ok(BranchKind::Stable);
        }
        let is_feature = self
            .feature_prefixes
            .iter()
            .any(|p| branch.len() > p.len() && branch.starts_with(p.as_str()));
        if is_feature {
            return Ok(BranchKind::Feature);
        }
        Err(Error::UnrecognizedBranch {
            branch: branch.to_string(),
        })
    }
}

/// Returns the segment after the last `/` in `branch`.
///
/// Used to derive ticket identifiers such as `ABC-1` from
/// `feature/payments/ABC-1`.
#[must_use]
pub fn last_segment(branch: &str) -> &str {
    branch.rsplit('/').next().unwrap_or(branch)
}
