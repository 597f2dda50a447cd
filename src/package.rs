//! Package identity and metadata types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::semver::Version;

/// Errors for user-supplied package specs
#[derive(Debug, Error)]
pub enum SpecError {
    /// Malformed `name[@range]` spec
    #[error("invalid package spec: {0}")]
    InvalidSpec(String),
}

/// A concrete package identity: `(name, version)`.
///
/// Serialized as `name@version`, the identity key used throughout the
/// resolver, cache and installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    pub name: String,
    pub version: Version,
}

impl PackageRef {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// The `name@version` identity key
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Directory name of the cache entry for this package
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A package plus its declared dependencies.
///
/// Dependency ranges are kept as their source text and ordered by name
/// (`BTreeMap`), which fixes the traversal order of everything downstream.
/// The same shape deserializes both the cache sidecar and an archive's
/// embedded `package.json` (unknown fields are ignored).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

impl PackageRecord {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            dependencies: BTreeMap::new(),
        }
    }

    pub fn package_ref(&self) -> PackageRef {
        PackageRef {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

/// Split a root spec `name[@range]` into name and range text.
///
/// The range defaults to `latest`. Scoped names (`@scope/pkg`) keep their
/// leading `@`.
pub fn parse_spec(spec: &str) -> Result<(String, String), SpecError> {
    let spec = spec.trim();
    if spec.is_empty() || spec == "@" {
        return Err(SpecError::InvalidSpec(spec.to_string()));
    }

    // Skip the first character so a scope marker is not mistaken for the
    // separator.
    let separator = spec
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '@')
        .map(|(i, _)| i);
    match separator {
        Some(at) => {
            let (name, range) = (&spec[..at], &spec[at + 1..]);
            if name.is_empty() || range.is_empty() {
                return Err(SpecError::InvalidSpec(spec.to_string()));
            }
            Ok((name.to_string(), range.to_string()))
        }
        None => Ok((spec.to_string(), "latest".to_string())),
    }
}
