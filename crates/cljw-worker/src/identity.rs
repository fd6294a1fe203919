//! Environment and unit identity.
//!
//! A unit defined through one environment is never the same unit as one
//! defined through another, even with the same name and the same bytes.
//! [`UnitId`] carries the owning [`EnvironmentId`] so that equality and
//! hashing respect that rule.

use std::fmt;

use serde::Serialize;

/// Instance identity of one execution environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EnvironmentId(u64);

impl EnvironmentId {
    /// Wrap a raw identifier.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env-{}", self.0)
    }
}

/// Allocator for environment identities.
///
/// Owned by a factory rather than shared globally, so independent factories
/// (and the tests that build them) count independently.
#[derive(Debug, Default)]
pub struct EnvironmentIds {
    issued: u64,
}

impl EnvironmentIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next identity. Identities start at 1 and never repeat.
    pub fn allocate(&mut self) -> EnvironmentId {
        self.issued += 1;
        EnvironmentId(self.issued)
    }

    /// Number of identities issued so far.
    pub fn issued(&self) -> u64 {
        self.issued
    }
}

/// A program unit as defined inside one environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UnitId {
    owner: EnvironmentId,
    name: String,
}

impl UnitId {
    pub fn new(owner: EnvironmentId, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
        }
    }

    /// Environment that defined this unit.
    pub fn owner(&self) -> EnvironmentId {
        self.owner
    }

    /// Unqualified unit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same name, regardless of owner. Says nothing about compatibility.
    pub fn same_name(&self, other: &UnitId) -> bool {
        self.name == other.name
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.owner)
    }
}
