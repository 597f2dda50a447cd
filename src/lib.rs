//! Industrial Package Manager Library
//!
//! This crate provides the core of `ipm`, a package manager for
//! industrial deployments consuming registry artifacts:
//! - Semver parsing and range resolution against registry metadata
//! - Transitive dependency graphs with single-version conflict detection
//! - A gzip+tar codec with embedded-signature verification (RSA/SHA-256)
//! - A shared content cache projected into projects via symlinks
//! - The installer pipeline tying the pieces together
//!
//! Identical inputs produce an identical installed tree, or the same
//! conflict report when no single-version assignment exists.

pub mod cache;
pub mod installer;
pub mod logging;
pub mod package;
pub mod registry;
pub mod resolver;
pub mod semver;
pub mod signature;
pub mod tarball;

pub use cache::{Cache, CacheError};
pub use installer::{
    ConflictReport, InstallError, InstallOptions, InstallSummary, Installer, PACKAGE_DIR,
};
pub use package::{parse_spec, PackageRecord, PackageRef, SpecError};
pub use registry::{HttpRegistry, Registry, RegistryError, DEFAULT_REGISTRY};
pub use resolver::{Conflict, Resolution, ResolvedGraph, Resolver, ResolverError};
pub use semver::{Comparator, Range, SemverError, Version};
pub use signature::{SignatureError, Verification, SIGNATURE_MEMBER};
pub use tarball::TarballError;
