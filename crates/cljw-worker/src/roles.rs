//! The two environment roles and their caches.
//!
//! The worker's own dependencies and the client's dependencies may pin
//! incompatible versions of shared libraries, so they never share an
//! environment: the *tooling* role plans and packages, the *compile* role
//! compiles the client's code.

use std::fmt;

use serde::Serialize;

use crate::cache::EnvironmentCache;

/// Which environment a cache slot serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Loads the worker's implementation classpath.
    Tooling,
    /// Loads the client's classpath.
    Compile,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Tooling, Role::Compile];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tooling => "tooling",
            Self::Compile => "compile",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One independent cache per role.
pub struct RoleCaches {
    tooling: EnvironmentCache,
    compile: EnvironmentCache,
}

impl RoleCaches {
    pub fn new() -> Self {
        Self {
            tooling: EnvironmentCache::new(Role::Tooling),
            compile: EnvironmentCache::new(Role::Compile),
        }
    }

    pub fn get(&self, role: Role) -> &EnvironmentCache {
        match role {
            Role::Tooling => &self.tooling,
            Role::Compile => &self.compile,
        }
    }

    pub fn get_mut(&mut self, role: Role) -> &mut EnvironmentCache {
        match role {
            Role::Tooling => &mut self.tooling,
            Role::Compile => &mut self.compile,
        }
    }

    /// Discard every live environment. Returns how many were discarded.
    pub fn discard_all(&mut self) -> usize {
        Role::ALL
            .iter()
            .filter(|role| self.get_mut(**role).discard())
            .count()
    }
}

impl Default for RoleCaches {
    fn default() -> Self {
        Self::new()
    }
}
