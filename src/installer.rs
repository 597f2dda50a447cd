//! Install pipeline: resolve, fetch, verify, cache, link.
//!
//! One installer instance drives one invocation. The `installed` map and
//! the resolver's state are local to that invocation; only the cache is
//! shared with other processes.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::cache::{Cache, CacheError};
use crate::package::{self, PackageRecord, PackageRef, SpecError};
use crate::registry::{Registry, RegistryError};
use crate::resolver::{Conflict, Resolution, Resolver, ResolverError};
use crate::semver::{Range, SemverError, Version};
use crate::signature::{self, SignatureError, Verification};
use crate::tarball::{self, TarballError};

/// Directory under the project root that receives the symlinks.
pub const PACKAGE_DIR: &str = "node_modules";

/// Errors that can occur during installation
#[derive(Debug, Error)]
pub enum InstallError {
    /// Malformed root spec
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// Bad range syntax
    #[error(transparent)]
    Semver(#[from] SemverError),

    /// Resolution failed (not a conflict; those are reported separately)
    #[error(transparent)]
    Resolver(#[from] ResolverError),

    /// Registry failure while materializing
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Archive failure
    #[error(transparent)]
    Tarball(#[from] TarballError),

    /// Signature failure (fatal; `Unsigned` is only a warning)
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Cache failure
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Filesystem failure outside the cache
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Local tarball with an unusable `package.json`
    #[error("invalid package.json in {path}: {detail}")]
    BadManifest { path: PathBuf, detail: String },

    /// Single-version conflicts; the report names every conflicting pin
    #[error("unresolvable dependency conflicts detected")]
    Conflicts(ConflictReport),
}

/// Structured conflict report, rendered as human text or JSON
#[derive(Debug, Clone, Serialize)]
pub struct ConflictReport {
    pub message: String,
    pub conflicts: Vec<Conflict>,
    pub error: String,
}

impl ConflictReport {
    pub fn new(conflicts: Vec<Conflict>) -> Self {
        Self {
            message: "Installation failed due to dependency conflicts".to_string(),
            conflicts,
            error: "unresolvable dependency conflicts detected".to_string(),
        }
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.message)?;
        for conflict in &self.conflicts {
            writeln!(f, "- Conflict at '{}':", conflict.package)?;
            let versions: Vec<String> =
                conflict.versions.iter().map(|v| v.to_string()).collect();
            writeln!(f, "  Versions requested: [{}]", versions.join(", "))?;
            writeln!(f, "  Dependents: [{}]", conflict.dependents.join(", "))?;
        }
        writeln!(f, "Error: {}", self.error)
    }
}

/// Installer configuration for one invocation
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Suppress progress lines; stdout carries only the structured report
    pub json_output: bool,

    /// Public key (SPKI PEM) enabling signature verification
    pub public_key: Option<PathBuf>,

    /// Project root; symlinks land in its `node_modules/`
    pub project_dir: PathBuf,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            json_output: false,
            public_key: None,
            project_dir: PathBuf::from("."),
        }
    }
}

/// What an invocation did
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct InstallSummary {
    /// Packages fetched and stored
    pub installed: usize,

    /// Packages served from the cache
    pub cached: usize,
}

/// Drives resolution and materialization for one install invocation.
pub struct Installer<'a, R: Registry + ?Sized> {
    registry: &'a R,
    cache: Cache,
    options: InstallOptions,
    installed: HashMap<String, Version>,
    public_key: Option<String>,
}

impl<'a, R: Registry + ?Sized> Installer<'a, R> {
    pub fn new(registry: &'a R, cache: Cache, options: InstallOptions) -> Self {
        Self {
            registry,
            cache,
            options,
            installed: HashMap::new(),
            public_key: None,
        }
    }

    /// Install `spec`: either `name[@range]` against the registry, or a
    /// path to a local tarball.
    pub fn install(&mut self, spec: &str) -> Result<InstallSummary, InstallError> {
        self.public_key = match &self.options.public_key {
            Some(path) => Some(fs::read_to_string(path)?),
            None => None,
        };

        let mut summary = InstallSummary::default();

        if Path::new(spec).is_file() {
            self.install_local(Path::new(spec), &mut summary)?;
            return Ok(summary);
        }

        let (name, range_text) = package::parse_spec(spec)?;
        tracing::info!(package = %name, range = %range_text, "starting installation");
        if !self.try_cached(&name, &range_text, &mut summary)? {
            self.install_root(&name, &range_text, &mut summary)?;
        }
        Ok(summary)
    }

    /// Resolve the graph for one root and materialize every node.
    fn install_root(
        &mut self,
        name: &str,
        range_text: &str,
        summary: &mut InstallSummary,
    ) -> Result<(), InstallError> {
        let resolution = Resolver::new(self.registry).resolve(name, range_text)?;
        let graph = match resolution {
            Resolution::Graph(graph) => graph,
            Resolution::Conflicts(conflicts) => {
                return Err(InstallError::Conflicts(ConflictReport::new(conflicts)));
            }
        };
        for (_, record) in graph.iter() {
            self.materialize(record, summary)?;
        }
        Ok(())
    }

    /// Serve `name@range` from the cache when a cached version satisfies
    /// the range, recursing the same way into its dependencies. Returns
    /// false when the registry has to be consulted. Dist-tag ranges always
    /// go to the registry; the tag table is mutable.
    fn try_cached(
        &mut self,
        name: &str,
        range_text: &str,
        summary: &mut InstallSummary,
    ) -> Result<bool, InstallError> {
        let range = Range::parse(range_text)?;
        if matches!(range, Range::DistTag(_)) {
            return Ok(false);
        }

        let mut versions = self.cache.list_versions(name)?;
        versions.reverse(); // prefer the newest cached version
        for version in versions {
            if !range.matches(&version) {
                continue;
            }
            let package = PackageRef::new(name, version);
            let record = match self.cache.load_metadata(&package) {
                Ok(record) => record,
                Err(_) => continue,
            };
            tracing::debug!(
                package = %package,
                range = range_text,
                "using cached version"
            );
            self.install_cached(record, summary)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Link an already-cached package and walk its dependencies,
    /// cache-first with registry fallback.
    fn install_cached(
        &mut self,
        record: PackageRecord,
        summary: &mut InstallSummary,
    ) -> Result<(), InstallError> {
        if self.check_installed(&record)? {
            return Ok(());
        }
        let package = record.package_ref();
        self.cache.link(&package, &self.package_dir())?;
        self.installed
            .insert(record.name.clone(), record.version.clone());
        summary.cached += 1;
        tracing::info!(package = %package, "cached package installed");

        for (dep_name, dep_range) in &record.dependencies {
            if !self.try_cached(dep_name, dep_range, summary)? {
                self.install_root(dep_name, dep_range, summary)?;
            }
        }
        Ok(())
    }

    /// Ensure one resolved node is cached and linked.
    fn materialize(
        &mut self,
        record: &PackageRecord,
        summary: &mut InstallSummary,
    ) -> Result<(), InstallError> {
        if self.check_installed(record)? {
            return Ok(());
        }
        let package = record.package_ref();

        if self.cache.exists(&package) {
            summary.cached += 1;
        } else {
            self.progress(format_args!("Installing {package}..."));
            let (stream, fetched) = self
                .registry
                .fetch_tarball(&record.name, &record.version)?;
            self.store_stream(&fetched, stream)?;
            summary.installed += 1;
        }

        self.cache.link(&package, &self.package_dir())?;
        self.installed
            .insert(record.name.clone(), record.version.clone());
        tracing::info!(
            package = %package,
            path = %self.cache.entry_dir(&package).display(),
            "package installed"
        );
        self.progress(format_args!(
            "Installed {} to {}",
            package,
            self.cache.entry_dir(&package).display()
        ));
        Ok(())
    }

    /// Install a tarball from the local filesystem, then pull its
    /// dependencies through the registry as usual.
    fn install_local(
        &mut self,
        path: &Path,
        summary: &mut InstallSummary,
    ) -> Result<(), InstallError> {
        tracing::debug!(file = %path.display(), "detected local package file");
        let bytes = fs::read(path)?;

        let manifest = tarball::extract_manifest(&bytes)?;
        let record: PackageRecord =
            serde_json::from_slice(&manifest).map_err(|e| InstallError::BadManifest {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        let package = record.package_ref();

        if let Some(pem) = self.public_key.clone() {
            self.verify_archive(&bytes, &pem, &package)?;
        }

        if self.check_installed(&record)? {
            return Ok(());
        }
        if self.cache.exists(&package) {
            summary.cached += 1;
        } else {
            self.cache.store(&record, bytes.as_slice())?;
            summary.installed += 1;
        }
        self.cache.link(&package, &self.package_dir())?;
        self.installed
            .insert(record.name.clone(), record.version.clone());
        tracing::info!(package = %package, "local package installed");
        self.progress(format_args!(
            "Installed {} to {}",
            package,
            self.cache.entry_dir(&package).display()
        ));

        for (dep_name, dep_range) in &record.dependencies {
            if !self.try_cached(dep_name, dep_range, summary)? {
                self.install_root(dep_name, dep_range, summary)?;
            }
        }
        Ok(())
    }

    /// Store a tarball stream, verifying it first when a key is configured.
    fn store_stream(
        &mut self,
        record: &PackageRecord,
        mut stream: Box<dyn Read>,
    ) -> Result<(), InstallError> {
        match self.public_key.clone() {
            Some(pem) => {
                let mut bytes = Vec::new();
                stream.read_to_end(&mut bytes)?;
                self.verify_archive(&bytes, &pem, &record.package_ref())?;
                self.check_manifest_agreement(&bytes, record);
                self.cache.store(record, bytes.as_slice())?;
            }
            None => {
                self.cache.store(record, stream)?;
            }
        }
        Ok(())
    }

    fn verify_archive(
        &self,
        bytes: &[u8],
        pem: &str,
        package: &PackageRef,
    ) -> Result<(), InstallError> {
        match signature::verify(bytes, pem)? {
            Verification::Verified => {
                tracing::info!(package = %package, "package signature verified");
            }
            Verification::Unsigned => {
                tracing::warn!(package = %package, "package is not signed");
            }
        }
        Ok(())
    }

    /// The registry metadata and the archive's own manifest must agree;
    /// divergence is logged, not fatal.
    fn check_manifest_agreement(&self, bytes: &[u8], record: &PackageRecord) {
        let manifest = match tarball::extract_manifest(bytes) {
            Ok(manifest) => manifest,
            Err(_) => return,
        };
        if let Ok(embedded) = serde_json::from_slice::<PackageRecord>(&manifest) {
            if embedded != *record {
                tracing::warn!(
                    package = %record.name,
                    version = %record.version,
                    "archive package.json diverges from registry metadata"
                );
            }
        }
    }

    /// Check `record` against the names already handled this invocation.
    /// The same version means the work is done. A different version is a
    /// single-version conflict between install roots and fails the run
    /// with the same structured report a conflict found during resolution
    /// produces; the flat namespace holds one version per name.
    fn check_installed(&self, record: &PackageRecord) -> Result<bool, InstallError> {
        match self.installed.get(&record.name) {
            Some(existing) if *existing == record.version => Ok(true),
            Some(existing) => {
                let held = PackageRef::new(record.name.clone(), existing.clone());
                let wanted = record.package_ref();
                Err(InstallError::Conflicts(ConflictReport::new(vec![
                    Conflict {
                        package: record.name.clone(),
                        versions: vec![held.version.clone(), wanted.version.clone()],
                        dependents: vec![held.key(), wanted.key()],
                    },
                ])))
            }
            None => Ok(false),
        }
    }

    fn package_dir(&self) -> PathBuf {
        self.options.project_dir.join(PACKAGE_DIR)
    }

    fn progress(&self, message: fmt::Arguments<'_>) {
        if !self.options.json_output {
            println!("{message}");
        }
    }
}
