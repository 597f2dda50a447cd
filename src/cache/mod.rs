//! Shared package cache.
//!
//! Extracted packages live under `<root>/<name>-<version>/` with a JSON
//! sidecar `<root>/<name>-<version>.json` holding the package metadata.
//! The cache root is shared between processes: writers unpack into a
//! staging directory and atomically rename it to the final name, so a
//! reader that observes a final directory may assume it is complete.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;

use crate::package::{PackageRecord, PackageRef};
use crate::semver::Version;
use crate::tarball::{self, TarballError};

#[cfg(unix)]
use std::os::unix::fs::symlink;
#[cfg(windows)]
use std::os::windows::fs::symlink_dir as symlink;

/// Staging directories older than this are leftovers from cancelled runs
/// and are swept when the cache is opened.
const STALE_STAGING_AGE: Duration = Duration::from_secs(24 * 60 * 60);

const STAGING_PREFIX: &str = ".staging-";

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache root could not be determined or created
    #[error("failed to initialize cache: {0}")]
    Init(String),

    /// Requested entry is not in the cache
    #[error("package not in cache: {0}")]
    NotCached(String),

    /// Sidecar metadata missing, unreadable, or inconsistent with the
    /// entry it sits next to
    #[error("corrupt cache metadata at {path}: {detail}")]
    Metadata { path: PathBuf, detail: String },

    /// Archive failed to unpack
    #[error(transparent)]
    Tarball(#[from] TarballError),
}

/// Shared content cache rooted at `~/.ipm/cache`
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    /// Open the cache at its default location, creating it if needed.
    pub fn open() -> Result<Self, CacheError> {
        let home = dirs::home_dir()
            .ok_or_else(|| CacheError::Init("could not determine home directory".to_string()))?;
        Self::with_root(home.join(".ipm").join("cache"))
    }

    /// Open a cache at an explicit root. Creates the directory (mode 0755)
    /// and sweeps stale staging directories.
    pub fn with_root(root: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(&root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&root, fs::Permissions::from_mode(0o755))?;
        }
        let cache = Self { root };
        cache.sweep_stale_staging();
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the unpacked tree for `package`
    pub fn entry_dir(&self, package: &PackageRef) -> PathBuf {
        self.root.join(package.dir_name())
    }

    fn sidecar_path(&self, package: &PackageRef) -> PathBuf {
        self.root.join(format!("{}.json", package.dir_name()))
    }

    pub fn exists(&self, package: &PackageRef) -> bool {
        self.entry_dir(package).is_dir()
    }

    /// Unpack a tarball stream into the cache. Idempotent: an existing
    /// entry is returned untouched.
    pub fn store<R: Read>(
        &self,
        record: &PackageRecord,
        tarball_stream: R,
    ) -> Result<PathBuf, CacheError> {
        let package = record.package_ref();
        let final_dir = self.entry_dir(&package);
        if final_dir.is_dir() {
            tracing::debug!(package = %package, path = %final_dir.display(), "cache hit");
            return Ok(final_dir);
        }

        tracing::debug!(package = %package, path = %final_dir.display(), "cache miss, storing");
        let staging = self.root.join(format!(
            "{}{}-{}",
            STAGING_PREFIX,
            package.dir_name(),
            std::process::id()
        ));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        if let Err(err) = tarball::unpack_into(tarball_stream, &staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(err.into());
        }

        // Sidecar first: once the final directory is visible, readers may
        // rely on the metadata being there.
        let sidecar = self.sidecar_path(&package);
        let body = serde_json::to_vec_pretty(record).map_err(|e| CacheError::Metadata {
            path: sidecar.clone(),
            detail: e.to_string(),
        })?;
        fs::write(&sidecar, body)?;

        if let Err(err) = fs::rename(&staging, &final_dir) {
            // Lost the race against a concurrent writer producing the same
            // bytes; keep the winner's entry.
            let _ = fs::remove_dir_all(&staging);
            if !final_dir.is_dir() {
                return Err(err.into());
            }
            tracing::debug!(package = %package, "concurrent store won the rename");
        }
        Ok(final_dir)
    }

    /// Load the sidecar metadata for a cached entry.
    pub fn load_metadata(&self, package: &PackageRef) -> Result<PackageRecord, CacheError> {
        let path = self.sidecar_path(package);
        if !path.is_file() {
            return Err(CacheError::NotCached(package.key()));
        }
        let data = fs::read(&path)?;
        let record: PackageRecord =
            serde_json::from_slice(&data).map_err(|e| CacheError::Metadata {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        if record.name != package.name || record.version != package.version {
            return Err(CacheError::Metadata {
                path,
                detail: format!("sidecar describes {}@{}", record.name, record.version),
            });
        }
        Ok(record)
    }

    /// All cached versions of `name`, ascending.
    pub fn list_versions(&self, name: &str) -> Result<Vec<Version>, CacheError> {
        let prefix = format!("{name}-");
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with(STAGING_PREFIX) {
                continue;
            }
            if let Some(rest) = file_name.strip_prefix(&prefix) {
                if let Ok(version) = Version::parse(rest) {
                    versions.push(version);
                }
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Project `package` into `project_pkg_dir` as a symlink named after
    /// the package. An up-to-date symlink is left alone; anything else at
    /// that path is replaced.
    pub fn link(&self, package: &PackageRef, project_pkg_dir: &Path) -> Result<PathBuf, CacheError> {
        let link_path = project_pkg_dir.join(&package.name);
        if let Some(parent) = link_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let target = self.entry_dir(package);

        if let Ok(meta) = fs::symlink_metadata(&link_path) {
            if meta.file_type().is_symlink() {
                if let Ok(existing) = fs::read_link(&link_path) {
                    if existing == target {
                        tracing::debug!(package = %package, link = %link_path.display(), "symlink already up to date");
                        return Ok(link_path);
                    }
                }
                tracing::debug!(package = %package, link = %link_path.display(), "replacing outdated symlink");
                fs::remove_file(&link_path)?;
            } else if meta.is_dir() {
                fs::remove_dir_all(&link_path)?;
            } else {
                fs::remove_file(&link_path)?;
            }
        }

        tracing::debug!(
            package = %package,
            link = %link_path.display(),
            target = %target.display(),
            "creating symlink"
        );
        symlink(&target, &link_path)?;
        Ok(link_path)
    }

    /// Remove staging directories abandoned by cancelled invocations.
    fn sweep_stale_staging(&self) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(STAGING_PREFIX) {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| SystemTime::now().duration_since(t).ok())
                .map(|age| age > STALE_STAGING_AGE)
                .unwrap_or(false);
            if stale {
                tracing::debug!(path = %entry.path().display(), "removing stale staging directory");
                let _ = fs::remove_dir_all(entry.path());
            }
        }
    }
}
