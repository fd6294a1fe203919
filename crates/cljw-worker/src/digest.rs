//! Digest maps: the cache validity key.
//!
//! A [`DigestMap`] records, for one request, which classpath locations the
//! build tool digested and what their content digest was. Directories are
//! usually absent because their contents are tracked file by file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

use cljw_protocol::Input;

/// Classpath location → content digest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestMap {
    entries: BTreeMap<String, String>,
}

/// Result of comparing a recorded digest map against a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestComparison {
    /// No shared location changed.
    Match,
    /// A shared location has a different digest.
    Mismatch {
        location: String,
        recorded: String,
        requested: String,
    },
}

impl DigestMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the key for a request: digested inputs that are on the classpath.
    pub fn for_request(classpath: &[String], inputs: &[Input]) -> Self {
        let mut map = Self::new();
        for input in inputs.iter().filter(|input| input.is_digested()) {
            if classpath.iter().any(|location| *location == input.path) {
                map.insert(input.path.clone(), input.digest.clone());
            }
        }
        map
    }

    pub fn insert(&mut self, location: impl Into<String>, digest: impl Into<String>) {
        self.entries.insert(location.into(), digest.into());
    }

    pub fn get(&self, location: &str) -> Option<&str> {
        self.entries.get(location).map(String::as_str)
    }

    pub fn contains(&self, location: &str) -> bool {
        self.entries.contains_key(location)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(l, d)| (l.as_str(), d.as_str()))
    }

    /// Fold `other` into this map; `other` wins on shared locations.
    pub fn merge(&mut self, other: &DigestMap) {
        for (location, digest) in other.iter() {
            self.insert(location, digest);
        }
    }
}

impl<L: Into<String>, D: Into<String>> FromIterator<(L, D)> for DigestMap {
    fn from_iter<I: IntoIterator<Item = (L, D)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (location, digest) in iter {
            map.insert(location, digest);
        }
        map
    }
}

/// Compare a recorded map against a newly requested one.
///
/// Only locations present in both maps can mismatch. Locations only in
/// `requested` mean the environment may grow; locations only in `recorded`
/// are tolerated.
pub fn compare(recorded: &DigestMap, requested: &DigestMap) -> DigestComparison {
    for (location, old) in recorded.iter() {
        if let Some(new) = requested.get(location) {
            if new != old {
                return DigestComparison::Mismatch {
                    location: location.to_string(),
                    recorded: old.to_string(),
                    requested: new.to_string(),
                };
            }
        }
    }
    DigestComparison::Match
}

/// SHA-256 every archive among `locations`. Directories are skipped.
pub fn fingerprint_locations(locations: &[String]) -> io::Result<DigestMap> {
    let mut map = DigestMap::new();
    for location in locations {
        let path = Path::new(location);
        if fs::metadata(path)?.is_dir() {
            continue;
        }
        let mut hasher = Sha256::new();
        io::copy(&mut File::open(path)?, &mut hasher)?;
        map.insert(location.clone(), hex::encode(hasher.finalize()));
    }
    Ok(map)
}
