//! Environment cache.
//!
//! Holds at most one live environment for a role, paired with the digest
//! map that was true when it was last validated. For each request the cache
//! either reuses that environment (growing it with new locations), or
//! discards it and builds a fresh one:
//!
//! - no entry: build, load the whole classpath
//! - a shared location's digest changed: discard, then build
//! - otherwise: load the locations not yet loaded, reuse
//!
//! The old environment is always fully discarded before its replacement is
//! created, so two environments of one role are never alive together.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::digest::{compare, DigestComparison, DigestMap};
use crate::environment::{Environment, EnvironmentError, EnvironmentFactory};
use crate::roles::Role;

/// Cache result type
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors from cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to create {role} environment: {source}")]
    Create {
        role: Role,
        #[source]
        source: EnvironmentError,
    },

    #[error("failed to load '{location}' into {role} environment: {source}")]
    Load {
        role: Role,
        location: String,
        #[source]
        source: EnvironmentError,
    },
}

/// How [`EnvironmentCache::acquire`] satisfied a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// No environment existed; a fresh one was built.
    Built,
    /// The previous environment was discarded because of `location`.
    Rebuilt { location: String },
    /// The existing environment was reused after loading `added` locations.
    Reused { added: usize },
}

impl fmt::Display for Acquisition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Built => write!(f, "built"),
            Self::Rebuilt { location } => write!(f, "rebuilt ({} changed)", location),
            Self::Reused { added: 0 } => write!(f, "reused"),
            Self::Reused { added } => write!(f, "reused (+{} locations)", added),
        }
    }
}

/// An environment handed out by the cache.
pub struct Acquired<'a> {
    pub acquisition: Acquisition,
    pub environment: &'a mut dyn Environment,
}

/// Counters for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Environments built (fresh or after a discard).
    pub builds: u64,
    /// Requests served by an existing environment.
    pub reuses: u64,
    /// Environments discarded.
    pub discards: u64,
    /// Locations loaded into reused environments.
    pub locations_added: u64,
}

/// One cached environment and its validity key.
pub struct CacheEntry {
    env: Box<dyn Environment>,
    key: DigestMap,
    created_at: DateTime<Utc>,
    validated_at: DateTime<Utc>,
    /// Locations that failed to load into this environment.
    poisoned: BTreeSet<String>,
}

impl CacheEntry {
    fn new(env: Box<dyn Environment>, key: DigestMap) -> Self {
        let now = Utc::now();
        Self {
            env,
            key,
            created_at: now,
            validated_at: now,
            poisoned: BTreeSet::new(),
        }
    }

    pub fn environment(&self) -> &dyn Environment {
        self.env.as_ref()
    }

    pub fn key(&self) -> &DigestMap {
        &self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn validated_at(&self) -> DateTime<Utc> {
        self.validated_at
    }

    /// The location that makes this entry unusable for `requested`, if any.
    fn stale_location(&self, requested: &DigestMap) -> Option<String> {
        if let Some(location) = self.poisoned.iter().find(|l| requested.contains(l)) {
            return Some(location.clone());
        }
        match compare(&self.key, requested) {
            DigestComparison::Match => None,
            DigestComparison::Mismatch {
                location,
                recorded,
                requested,
            } => {
                debug!(%location, %recorded, %requested, "digest mismatch");
                Some(location)
            }
        }
    }
}

/// Load every location of `classpath` that is not loaded yet.
fn load_missing(
    env: &mut dyn Environment,
    classpath: &[String],
) -> Result<usize, (String, EnvironmentError)> {
    let mut added = 0;
    for location in classpath {
        match env.add_location(location) {
            Ok(true) => added += 1,
            Ok(false) => {}
            Err(e) => return Err((location.clone(), e)),
        }
    }
    Ok(added)
}

/// Single-slot environment cache for one role.
pub struct EnvironmentCache {
    role: Role,
    entry: Option<CacheEntry>,
    stats: CacheStats,
}

impl EnvironmentCache {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            entry: None,
            stats: CacheStats::default(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn is_vacant(&self) -> bool {
        self.entry.is_none()
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        self.entry.as_ref()
    }

    pub fn environment(&self) -> Option<&dyn Environment> {
        self.entry.as_ref().map(CacheEntry::environment)
    }

    /// Get an environment valid for `key`, loaded with `classpath`.
    ///
    /// On success the recorded key becomes the union of the old key and
    /// `key`, so a digest once recorded keeps guarding the environment even
    /// when a later request omits that location.
    ///
    /// When a location fails to load into a reused environment, the
    /// environment is kept but the location is remembered; the next request
    /// that still tracks it gets a fresh environment.
    pub fn acquire(
        &mut self,
        factory: &mut dyn EnvironmentFactory,
        key: DigestMap,
        classpath: &[String],
    ) -> CacheResult<Acquired<'_>> {
        let role = self.role;
        let acquisition = match self.entry.take() {
            None => Acquisition::Built,
            Some(mut entry) => match entry.stale_location(&key) {
                Some(location) => {
                    info!(%role, environment = %entry.env.id(), %location, "environment stale");
                    self.release(entry);
                    Acquisition::Rebuilt { location }
                }
                None => match load_missing(entry.env.as_mut(), classpath) {
                    Ok(added) => {
                        entry.key.merge(&key);
                        entry.validated_at = Utc::now();
                        self.stats.reuses += 1;
                        self.stats.locations_added += added as u64;
                        debug!(%role, environment = %entry.env.id(), added, "environment reused");
                        let entry = self.entry.insert(entry);
                        return Ok(Acquired {
                            acquisition: Acquisition::Reused { added },
                            environment: entry.env.as_mut(),
                        });
                    }
                    Err((location, source)) => {
                        warn!(%role, environment = %entry.env.id(), %location, "location failed to load");
                        entry.poisoned.insert(location.clone());
                        self.entry = Some(entry);
                        return Err(CacheError::Load {
                            role,
                            location,
                            source,
                        });
                    }
                },
            },
        };
        self.build(factory, key, classpath, acquisition)
    }

    /// Discard the live environment, if any. Returns whether one existed.
    pub fn discard(&mut self) -> bool {
        match self.entry.take() {
            Some(entry) => {
                self.release(entry);
                true
            }
            None => false,
        }
    }

    fn build(
        &mut self,
        factory: &mut dyn EnvironmentFactory,
        key: DigestMap,
        classpath: &[String],
        acquisition: Acquisition,
    ) -> CacheResult<Acquired<'_>> {
        let role = self.role;
        let mut env = factory
            .create(role)
            .map_err(|source| CacheError::Create { role, source })?;

        if let Err((location, source)) = load_missing(env.as_mut(), classpath) {
            warn!(%role, environment = %env.id(), %location, "fresh environment failed to load");
            self.dispose(env);
            return Err(CacheError::Load {
                role,
                location,
                source,
            });
        }

        info!(%role, environment = %env.id(), locations = env.locations().len(), "environment built");
        self.stats.builds += 1;
        let entry = self.entry.insert(CacheEntry::new(env, key));
        Ok(Acquired {
            acquisition,
            environment: entry.env.as_mut(),
        })
    }

    fn release(&mut self, entry: CacheEntry) {
        self.dispose(entry.env);
    }

    fn dispose(&mut self, env: Box<dyn Environment>) {
        let id = env.id();
        if let Err(e) = env.discard() {
            warn!(role = %self.role, environment = %id, error = %e, "discard reported an error");
        }
        self.stats.discards += 1;
    }
}

impl Drop for EnvironmentCache {
    fn drop(&mut self) {
        self.discard();
    }
}
