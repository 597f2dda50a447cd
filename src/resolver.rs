//! Dependency resolution.
//!
//! Builds the transitive dependency graph for a root request, holding the
//! installed namespace to one version per package. When two paths pin a
//! package to different versions the resolver records a conflict instead
//! of guessing; the caller reports it and fails. Dependencies are visited
//! in lexicographic name order, so for identical inputs both the graph and
//! the conflict list come out identical.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use thiserror::Error;

use crate::package::{PackageRecord, PackageRef};
use crate::registry::{Registry, RegistryError};
use crate::semver::{Range, SemverError, Version};

/// Errors that abort resolution outright (conflicts do not; they are
/// collected and reported)
#[derive(Debug, Error)]
pub enum ResolverError {
    /// A declared dependency range failed to parse
    #[error(transparent)]
    Semver(#[from] SemverError),

    /// Version resolution against the registry failed
    #[error("failed to resolve {package}@{range}: {source}")]
    Resolve {
        package: String,
        range: String,
        #[source]
        source: RegistryError,
    },

    /// Metadata fetch for a concrete version failed
    #[error("failed to fetch {package}@{version}: {source}")]
    Fetch {
        package: String,
        version: Version,
        #[source]
        source: RegistryError,
    },
}

/// Two paths through the graph pinned `package` to different versions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub package: String,
    pub versions: Vec<Version>,
    pub dependents: Vec<String>,
}

/// The resolved graph: one record per package name. Iteration order is
/// lexicographic by name.
#[derive(Debug, Clone, Default)]
pub struct ResolvedGraph {
    nodes: BTreeMap<String, PackageRecord>,
}

impl ResolvedGraph {
    pub fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.nodes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PackageRecord)> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Outcome of a resolution run
#[derive(Debug)]
pub enum Resolution {
    /// Conflict-free graph, ready to materialize
    Graph(ResolvedGraph),
    /// One or more single-version conflicts, in traversal order
    Conflicts(Vec<Conflict>),
}

/// Recursive dependency solver. State lives for one resolution run.
pub struct Resolver<'a, R: Registry + ?Sized> {
    registry: &'a R,
    graph: BTreeMap<String, PackageRecord>,
    /// Functional memo: once `(name, range text)` maps to a version, every
    /// later occurrence of the same pair resolves to that version.
    resolve_cache: HashMap<(String, String), Version>,
    conflicts: Vec<Conflict>,
}

impl<'a, R: Registry + ?Sized> Resolver<'a, R> {
    pub fn new(registry: &'a R) -> Self {
        Self {
            registry,
            graph: BTreeMap::new(),
            resolve_cache: HashMap::new(),
            conflicts: Vec::new(),
        }
    }

    /// Resolve the transitive graph rooted at `name@range_text`.
    pub fn resolve(mut self, name: &str, range_text: &str) -> Result<Resolution, ResolverError> {
        self.add_package(name, range_text)?;
        if self.conflicts.is_empty() {
            Ok(Resolution::Graph(ResolvedGraph { nodes: self.graph }))
        } else {
            Ok(Resolution::Conflicts(self.conflicts))
        }
    }

    fn add_package(&mut self, name: &str, range_text: &str) -> Result<(), ResolverError> {
        let cache_key = (name.to_string(), range_text.to_string());
        if let Some(version) = self.resolve_cache.get(&cache_key) {
            tracing::debug!(
                package = name,
                range = range_text,
                version = %version,
                "using cached resolved version"
            );
            let version = version.clone();
            return self.add_node(name, version);
        }

        let range = Range::parse(range_text)?;
        let version = self
            .registry
            .resolve_version(name, &range)
            .map_err(|source| ResolverError::Resolve {
                package: name.to_string(),
                range: range_text.to_string(),
                source,
            })?;
        self.resolve_cache.insert(cache_key, version.clone());
        self.add_node(name, version)
    }

    fn add_node(&mut self, name: &str, version: Version) -> Result<(), ResolverError> {
        if let Some(existing) = self.graph.get(name) {
            if existing.version == version {
                // Already visited; also terminates cycles.
                return Ok(());
            }
            let held = PackageRef::new(name, existing.version.clone());
            let wanted = PackageRef::new(name, version);
            self.conflicts.push(Conflict {
                package: name.to_string(),
                versions: vec![held.version.clone(), wanted.version.clone()],
                dependents: vec![held.key(), wanted.key()],
            });
            return Ok(());
        }

        // The stream is dropped unread; resolution only needs the metadata.
        let (_stream, record) = self
            .registry
            .fetch_tarball(name, &version)
            .map_err(|source| ResolverError::Fetch {
                package: name.to_string(),
                version: version.clone(),
                source,
            })?;
        tracing::debug!(
            package = name,
            version = %version,
            dependencies = record.dependencies.len(),
            "node resolved"
        );

        let dependencies: Vec<(String, String)> = record
            .dependencies
            .iter()
            .map(|(dep, range)| (dep.clone(), range.clone()))
            .collect();
        self.graph.insert(name.to_string(), record);

        for (dep_name, dep_range) in dependencies {
            self.add_package(&dep_name, &dep_range)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{Cursor, Read};

    /// In-memory registry: version documents only, empty tarball streams.
    #[derive(Default)]
    struct StubRegistry {
        records: HashMap<String, Vec<PackageRecord>>,
        dist_tags: HashMap<String, Vec<(String, Version)>>,
    }

    impl StubRegistry {
        fn publish(&mut self, record: PackageRecord) {
            self.records.entry(record.name.clone()).or_default().push(record);
        }

        fn tag(&mut self, name: &str, tag: &str, version: Version) {
            self.dist_tags
                .entry(name.to_string())
                .or_default()
                .push((tag.to_string(), version));
        }
    }

    impl Registry for StubRegistry {
        fn resolve_version(&self, name: &str, range: &Range) -> Result<Version, RegistryError> {
            let no_match = || RegistryError::NoMatch {
                package: name.to_string(),
                range: range.to_string(),
            };
            match range {
                Range::DistTag(tag) => self
                    .dist_tags
                    .get(name)
                    .and_then(|tags| tags.iter().find(|(t, _)| t == tag))
                    .map(|(_, v)| v.clone())
                    .ok_or_else(no_match),
                _ => self
                    .records
                    .get(name)
                    .ok_or_else(no_match)?
                    .iter()
                    .map(|r| r.version.clone())
                    .filter(|v| range.matches(v))
                    .max()
                    .ok_or_else(no_match),
            }
        }

        fn fetch_tarball(
            &self,
            name: &str,
            version: &Version,
        ) -> Result<(Box<dyn Read>, PackageRecord), RegistryError> {
            let record = self
                .records
                .get(name)
                .and_then(|records| records.iter().find(|r| r.version == *version))
                .cloned()
                .ok_or_else(|| RegistryError::Status {
                    status: 404,
                    url: format!("stub:/{name}/{version}"),
                })?;
            Ok((Box::new(Cursor::new(Vec::new())), record))
        }
    }

    fn record(name: &str, version: &str, deps: &[(&str, &str)]) -> PackageRecord {
        let mut record = PackageRecord::new(name, Version::parse(version).unwrap());
        for (dep, range) in deps {
            record
                .dependencies
                .insert(dep.to_string(), range.to_string());
        }
        record
    }

    #[test]
    fn test_resolves_greatest_matching_version() {
        let mut registry = StubRegistry::default();
        registry.publish(record("lodash", "4.17.0", &[]));
        registry.publish(record("lodash", "4.17.21", &[]));
        registry.publish(record("lodash", "5.0.0", &[]));

        let resolution = Resolver::new(&registry)
            .resolve("lodash", "^4.17.0")
            .unwrap();
        match resolution {
            Resolution::Graph(graph) => {
                assert_eq!(graph.len(), 1);
                assert_eq!(
                    graph.get("lodash").unwrap().version,
                    Version::new(4, 17, 21)
                );
            }
            Resolution::Conflicts(conflicts) => panic!("unexpected conflicts: {conflicts:?}"),
        }
    }

    #[test]
    fn test_resolves_dist_tag() {
        let mut registry = StubRegistry::default();
        registry.publish(record("foo", "2.3.4", &[]));
        registry.tag("foo", "latest", Version::new(2, 3, 4));

        let resolution = Resolver::new(&registry).resolve("foo", "latest").unwrap();
        match resolution {
            Resolution::Graph(graph) => {
                assert_eq!(graph.get("foo").unwrap().version, Version::new(2, 3, 4));
            }
            Resolution::Conflicts(_) => panic!("unexpected conflicts"),
        }
    }

    #[test]
    fn test_transitive_graph_is_closed() {
        let mut registry = StubRegistry::default();
        registry.publish(record("app", "1.0.0", &[("lib", "^1.0.0")]));
        registry.publish(record("lib", "1.2.0", &[("base", "~2.1.0")]));
        registry.publish(record("base", "2.1.5", &[]));

        let resolution = Resolver::new(&registry).resolve("app", "1.0.0").unwrap();
        let graph = match resolution {
            Resolution::Graph(graph) => graph,
            Resolution::Conflicts(_) => panic!("unexpected conflicts"),
        };
        assert_eq!(graph.len(), 3);
        for (_, node) in graph.iter() {
            for dep in node.dependencies.keys() {
                assert!(graph.get(dep).is_some(), "{dep} missing from graph");
            }
        }
    }

    #[test]
    fn test_conflict_detected() {
        let mut registry = StubRegistry::default();
        registry.publish(record(
            "app",
            "1.0.0",
            &[("left", "1.0.0"), ("right", "1.0.0")],
        ));
        registry.publish(record("left", "1.0.0", &[("shared", "1.3.1")]));
        registry.publish(record("right", "1.0.0", &[("shared", "1.4.0")]));
        registry.publish(record("shared", "1.3.1", &[]));
        registry.publish(record("shared", "1.4.0", &[]));

        let resolution = Resolver::new(&registry).resolve("app", "1.0.0").unwrap();
        let conflicts = match resolution {
            Resolution::Conflicts(conflicts) => conflicts,
            Resolution::Graph(_) => panic!("expected conflicts"),
        };
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.package, "shared");
        assert_eq!(
            conflict.versions,
            vec![Version::new(1, 3, 1), Version::new(1, 4, 0)]
        );
        assert_eq!(
            conflict.dependents,
            vec!["shared@1.3.1".to_string(), "shared@1.4.0".to_string()]
        );
    }

    #[test]
    fn test_conflict_order_is_deterministic() {
        let mut registry = StubRegistry::default();
        registry.publish(record(
            "app",
            "1.0.0",
            &[("a", "1.0.0"), ("b", "1.0.0"), ("c", "1.0.0")],
        ));
        registry.publish(record("a", "1.0.0", &[("x", "1.0.0"), ("y", "1.0.0")]));
        registry.publish(record("b", "1.0.0", &[("x", "2.0.0")]));
        registry.publish(record("c", "1.0.0", &[("y", "2.0.0")]));
        for v in ["1.0.0", "2.0.0"] {
            registry.publish(record("x", v, &[]));
            registry.publish(record("y", v, &[]));
        }

        let run = || {
            match Resolver::new(&registry).resolve("app", "1.0.0").unwrap() {
                Resolution::Conflicts(conflicts) => conflicts,
                Resolution::Graph(_) => panic!("expected conflicts"),
            }
        };
        let first = run();
        let second = run();
        assert_eq!(first, second);
        // `a` is visited before `b` and `c`, so x then y conflict, in order.
        assert_eq!(first[0].package, "x");
        assert_eq!(first[1].package, "y");
    }

    #[test]
    fn test_cycle_terminates() {
        let mut registry = StubRegistry::default();
        registry.publish(record("ping", "1.0.0", &[("pong", "1.0.0")]));
        registry.publish(record("pong", "1.0.0", &[("ping", "1.0.0")]));

        let resolution = Resolver::new(&registry).resolve("ping", "1.0.0").unwrap();
        match resolution {
            Resolution::Graph(graph) => assert_eq!(graph.len(), 2),
            Resolution::Conflicts(_) => panic!("cycle must not conflict"),
        }
    }

    #[test]
    fn test_no_match_fails() {
        let mut registry = StubRegistry::default();
        registry.publish(record("only-v1", "1.0.0", &[]));

        let result = Resolver::new(&registry).resolve("only-v1", "^2.0.0");
        assert!(matches!(result, Err(ResolverError::Resolve { .. })));
    }

    #[test]
    fn test_bad_range_fails() {
        let registry = StubRegistry::default();
        let result = Resolver::new(&registry).resolve("anything", "not a range");
        assert!(matches!(result, Err(ResolverError::Semver(_))));
    }
}
