//! Identifiers shared by every replica.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Globally unique identifier of a replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

impl ReplicaId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random replica id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a document, stable across replicas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random document id of the form `D-<uuid>`.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("D-{}", Uuid::new_v4().simple()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Monotonically increasing per-replica change counter.
///
/// Generation 0 means the replica has recorded no changes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation of an empty replica.
    pub const ZERO: Generation = Generation(0);

    /// Returns the next generation.
    #[must_use]
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }

    /// Returns the raw counter value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Random identifier minted for every generation increment.
///
/// Two replicas that share a replica id but disagree on the transaction id
/// at a given generation have diverged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh transaction id of the form `T-<uuid>`.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("T-{}", Uuid::new_v4().simple()))
    }

    /// The transaction id associated with generation 0.
    #[must_use]
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Returns true for the generation 0 transaction id.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
