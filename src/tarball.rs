//! Gzip+tar codec and safe package extraction.
//!
//! Reading and writing go through the same header handling, so an archive
//! re-serialized from its parsed entries is byte-stable. The signature
//! layer depends on that: it hashes the re-serialized form, not the
//! original bytes.

use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, Header};
use thiserror::Error;

/// Leading path component conventionally used inside package archives,
/// stripped on extraction.
pub const PACKAGE_PREFIX: &str = "package";

/// Errors that can occur while reading or unpacking archives
#[derive(Debug, Error)]
pub enum TarballError {
    /// Bad gzip stream, bad tar framing, or plain filesystem failure
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Entry that must not be extracted: traversal, absolute path, or a
    /// special file type
    #[error("unsafe archive entry: {0}")]
    UnsafeEntry(String),

    /// No `package.json` member in the archive
    #[error("package.json not found in archive")]
    MissingManifest,
}

/// Decode an archive into its raw entries, headers preserved.
pub fn read_entries(bytes: &[u8]) -> Result<Vec<(Header, Vec<u8>)>, TarballError> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let header = entry.header().clone();
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        entries.push((header, data));
    }
    Ok(entries)
}

/// Re-serialize entries into a gzip-compressed tar stream. Headers are
/// emitted verbatim; gzip uses the default level with a zeroed timestamp,
/// so identical entries always produce identical bytes.
pub fn write_entries(entries: &[(Header, Vec<u8>)]) -> Result<Vec<u8>, TarballError> {
    let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (header, data) in entries {
        builder.append(header, data.as_slice())?;
    }
    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Extract the body of the member whose path is exactly `name`.
pub fn extract_member(bytes: &[u8], name: &str) -> Result<Option<Vec<u8>>, TarballError> {
    for (header, data) in read_entries(bytes)? {
        if header.path()?.as_ref() == Path::new(name) {
            return Ok(Some(data));
        }
    }
    Ok(None)
}

/// Extract the first member ending in `package.json`. Archives place the
/// root manifest first, before any nested files.
pub fn extract_manifest(bytes: &[u8]) -> Result<Vec<u8>, TarballError> {
    for (header, data) in read_entries(bytes)? {
        if !header.entry_type().is_file() {
            continue;
        }
        if header.path()?.file_name() == Some("package.json".as_ref()) {
            return Ok(data);
        }
    }
    Err(TarballError::MissingManifest)
}

/// Unpack a gzip-tar stream into `dest`.
///
/// The leading `package/` component is stripped. Directories and regular
/// files are materialized with their header modes masked to permission
/// bits; every other entry type is rejected, as is any path that would
/// escape `dest`.
pub fn unpack_into<R: Read>(reader: R, dest: &Path) -> Result<(), TarballError> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        let mode = entry.header().mode().ok();
        let raw_path = entry.path()?.into_owned();

        let stripped = strip_package_prefix(&raw_path);
        let target = sanitize_join(dest, &stripped)
            .ok_or_else(|| TarballError::UnsafeEntry(raw_path.display().to_string()))?;

        if entry_type.is_dir() {
            fs::create_dir_all(&target)?;
            set_permissions(&target, mode, 0o755)?;
        } else if entry_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&target)?;
            io::copy(&mut entry, &mut file)?;
            set_permissions(&target, mode, 0o644)?;
        } else {
            return Err(TarballError::UnsafeEntry(format!(
                "{}: entry type {:?} not allowed",
                raw_path.display(),
                entry_type
            )));
        }
    }
    Ok(())
}

fn strip_package_prefix(path: &Path) -> PathBuf {
    match path.strip_prefix(PACKAGE_PREFIX) {
        Ok(rest) => rest.to_path_buf(),
        Err(_) => path.to_path_buf(),
    }
}

/// Join `rel` onto `dest`, refusing anything that could leave `dest`.
fn sanitize_join(dest: &Path, rel: &Path) -> Option<PathBuf> {
    let mut out = dest.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: Option<u32>, fallback: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let bits = match mode {
        Some(m) if m != 0 => m & 0o777,
        _ => fallback,
    };
    fs::set_permissions(path, fs::Permissions::from_mode(bits))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: Option<u32>, _fallback: u32) -> io::Result<()> {
    Ok(())
}
