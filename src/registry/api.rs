//! Wire document types for the registry protocol.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

/// Package document: `GET {base}/{name}`.
///
/// Only the pieces version resolution needs; the values under `versions`
/// are full version documents but the resolver only looks at the keys.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageDocument {
    /// Published versions, keyed by version string
    #[serde(default)]
    pub versions: HashMap<String, serde_json::Value>,

    /// Symbolic tags (e.g. `latest`) mapping to version strings
    #[serde(default, rename = "dist-tags")]
    pub dist_tags: HashMap<String, String>,
}

/// Version document: `GET {base}/{name}/{version}`.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionDocument {
    pub name: String,

    pub version: String,

    pub dist: DistInfo,

    /// Declared dependencies (name to range text)
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

/// Distribution block of a version document
#[derive(Debug, Clone, Deserialize)]
pub struct DistInfo {
    /// Download URL for the package archive
    pub tarball: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_package_document() {
        let json = r#"{
            "name": "lodash",
            "dist-tags": {"latest": "4.17.21"},
            "versions": {"4.17.0": {}, "4.17.21": {}, "5.0.0": {}}
        }"#;

        let doc: PackageDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.versions.len(), 3);
        assert_eq!(doc.dist_tags.get("latest"), Some(&"4.17.21".to_string()));
    }

    #[test]
    fn test_deserialize_version_document() {
        let json = r#"{
            "name": "express",
            "version": "4.16.2",
            "dist": {"tarball": "https://registry.npmjs.org/express/-/express-4.16.2.tgz"},
            "dependencies": {"accepts": "~1.3.4", "statuses": "~1.3.1"}
        }"#;

        let doc: VersionDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.name, "express");
        assert_eq!(doc.dependencies.get("statuses"), Some(&"~1.3.1".to_string()));
        assert!(doc.dist.tarball.ends_with("express-4.16.2.tgz"));
    }

    #[test]
    fn test_missing_dependencies_default_empty() {
        let json = r#"{
            "name": "left-pad",
            "version": "1.3.0",
            "dist": {"tarball": "https://example.test/left-pad-1.3.0.tgz"}
        }"#;

        let doc: VersionDocument = serde_json::from_str(json).unwrap();
        assert!(doc.dependencies.is_empty());
    }
}
