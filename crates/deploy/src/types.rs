//! Identifier newtypes shared across the crate.

use std::collections::BTreeSet;

use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};

/// Identifier of a remote execution network (for example `mainnet` or `local`).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Deref, From, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id names a single file inside a directory, so it can key on-disk
    /// state.
    pub fn is_file_name(&self) -> bool {
        !matches!(self.0.as_str(), "" | "." | "..") && !self.0.contains(['/', '\\', '\0'])
    }
}

impl From<&str> for NetworkId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Globally unique identifier of a deployment unit, also used as the ledger key of
/// the artifacts it publishes.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Deref, From, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UnitId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Environment tags such as `local`, `test` or `prod`.
pub type TagSet = BTreeSet<String>;

/// Build a [`TagSet`] from anything iterable over string-like items.
pub fn tag_set<I, S>(tags: I) -> TagSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    tags.into_iter().map(Into::into).collect()
}
