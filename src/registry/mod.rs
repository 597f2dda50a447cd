//! Registry access.
//!
//! The core depends on exactly two registry operations; anything that can
//! answer them (the HTTP client here, an in-memory stub in tests) plugs in
//! through the [`Registry`] trait.

mod api;
mod client;

pub use api::{DistInfo, PackageDocument, VersionDocument};
pub use client::{HttpRegistry, DEFAULT_REGISTRY};

use std::io::Read;

use thiserror::Error;

use crate::package::PackageRecord;
use crate::semver::{Range, Version};

/// Errors that can occur during registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Transport-level failure
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response
    #[error("registry returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Response body was not the expected JSON document
    #[error("failed to decode registry document from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// Document decoded but its contents are unusable
    #[error("malformed registry document from {url}: {detail}")]
    Document { url: String, detail: String },

    /// No version satisfies the requested range
    #[error("no version of {package} satisfies {range}")]
    NoMatch { package: String, range: String },
}

/// The two operations the resolver and installer need from a registry.
pub trait Registry {
    /// Resolve a range to a concrete version against the registry's index.
    ///
    /// For a dist-tag range this consults the registry's tag table;
    /// otherwise it picks the greatest published version satisfying the
    /// range. Pure given a fixed registry state: two calls return the same
    /// version.
    fn resolve_version(&self, name: &str, range: &Range) -> Result<Version, RegistryError>;

    /// Open the tarball stream for a concrete version, together with the
    /// package metadata the registry declares for it.
    fn fetch_tarball(
        &self,
        name: &str,
        version: &Version,
    ) -> Result<(Box<dyn Read>, PackageRecord), RegistryError>;
}
