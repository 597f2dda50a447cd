//! Semantic version parsing and range matching.
//!
//! Versions are ordered by SemVer 2.0 precedence. Ranges cover the syntax
//! registries declare dependencies in: exact pins, caret and tilde ranges,
//! comparators, whitespace conjunctions and `||` disjunctions, plus the
//! symbolic `latest` tag that only a registry can resolve.

use std::cmp::Ordering;
use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors that can occur during version or range parsing
#[derive(Debug, Error)]
pub enum SemverError {
    /// Invalid version format
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// Invalid range syntax, carrying the offending text
    #[error("invalid version range: {0}")]
    InvalidRange(String),
}

/// Semantic version (MAJOR.MINOR.PATCH with optional pre-release and build)
#[derive(Debug, Clone)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl Version {
    /// Parse a version string. A leading `v` is tolerated.
    pub fn parse(s: &str) -> Result<Self, SemverError> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);

        // Split off build metadata, then the pre-release tag.
        let (version_part, build) = match s.find('+') {
            Some(pos) => (&s[..pos], Some(s[pos + 1..].to_string())),
            None => (s, None),
        };
        let (core_version, prerelease) = match version_part.find('-') {
            Some(pos) => (
                &version_part[..pos],
                Some(version_part[pos + 1..].to_string()),
            ),
            None => (version_part, None),
        };

        if matches!(&prerelease, Some(p) if p.is_empty())
            || matches!(&build, Some(b) if b.is_empty())
        {
            return Err(SemverError::InvalidVersion(s.to_string()));
        }

        let parts: Vec<&str> = core_version.split('.').collect();
        if parts.len() != 3 {
            return Err(SemverError::InvalidVersion(format!(
                "expected MAJOR.MINOR.PATCH, got '{}'",
                s
            )));
        }

        let number = |part: &str| {
            part.parse::<u64>()
                .map_err(|_| SemverError::InvalidVersion(s.to_string()))
        };

        Ok(Version {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            patch: number(parts[2])?,
            prerelease,
            build,
        })
    }

    /// Create a new release version
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Check if this is a pre-release version
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

// Build metadata carries no precedence, so equality ignores it too; the
// derived PartialEq would disagree with Ord.
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.major.cmp(&other.major) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match self.minor.cmp(&other.minor) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match self.patch.cmp(&other.patch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        // A pre-release sorts below the plain release.
        match (&self.prerelease, &other.prerelease) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => compare_prerelease(a, b),
        }
    }
}

/// Compare pre-release tags identifier by identifier: numeric identifiers
/// compare numerically and rank below alphanumeric ones; a shorter tag
/// ranks below a longer one when all shared identifiers are equal.
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let xs: Vec<&str> = a.split('.').collect();
    let ys: Vec<&str> = b.split('.').collect();
    for (x, y) in xs.iter().zip(ys.iter()) {
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(m), Ok(n)) => m.cmp(&n),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    xs.len().cmp(&ys.len())
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Version::parse(&text).map_err(de::Error::custom)
    }
}

/// A single comparator inside a range
#[derive(Debug, Clone, PartialEq)]
pub enum Comparator {
    /// Exact version (=1.2.3 or 1.2.3)
    Exact(Version),

    /// Caret range (^1.2.3 → >=1.2.3 <2.0.0)
    Caret(Version),

    /// Tilde range (~1.2.3 → >=1.2.3 <1.3.0)
    Tilde(Version),

    /// Greater than (>1.2.3)
    Greater(Version),

    /// Greater than or equal (>=1.2.3)
    GreaterEq(Version),

    /// Less than (<1.2.3)
    Less(Version),

    /// Less than or equal (<=1.2.3)
    LessEq(Version),

    /// Wildcard (1.2.*, 1.*)
    Wildcard(u64, Option<u64>),

    /// Any version (*)
    Any,
}

impl Comparator {
    fn parse(s: &str) -> Result<Self, SemverError> {
        let bad = || SemverError::InvalidRange(s.to_string());

        if s == "*" {
            return Ok(Comparator::Any);
        }

        if let Some(rest) = s.strip_prefix(">=") {
            return Ok(Comparator::GreaterEq(
                Version::parse(rest).map_err(|_| bad())?,
            ));
        }
        if let Some(rest) = s.strip_prefix("<=") {
            return Ok(Comparator::LessEq(Version::parse(rest).map_err(|_| bad())?));
        }
        if let Some(rest) = s.strip_prefix('>') {
            return Ok(Comparator::Greater(Version::parse(rest).map_err(|_| bad())?));
        }
        if let Some(rest) = s.strip_prefix('<') {
            return Ok(Comparator::Less(Version::parse(rest).map_err(|_| bad())?));
        }
        if let Some(rest) = s.strip_prefix('^') {
            return Ok(Comparator::Caret(Version::parse(rest).map_err(|_| bad())?));
        }
        if let Some(rest) = s.strip_prefix('~') {
            return Ok(Comparator::Tilde(Version::parse(rest).map_err(|_| bad())?));
        }
        if let Some(rest) = s.strip_prefix('=') {
            return Ok(Comparator::Exact(Version::parse(rest).map_err(|_| bad())?));
        }

        if s.contains('*') {
            return Self::parse_wildcard(s);
        }

        Ok(Comparator::Exact(Version::parse(s).map_err(|_| bad())?))
    }

    fn parse_wildcard(s: &str) -> Result<Self, SemverError> {
        let bad = || SemverError::InvalidRange(s.to_string());
        let parts: Vec<&str> = s.split('.').collect();

        if parts.len() == 2 && parts[1] == "*" {
            let major = parts[0].parse().map_err(|_| bad())?;
            return Ok(Comparator::Wildcard(major, None));
        }
        if parts.len() == 3 && parts[2] == "*" {
            let major = parts[0].parse().map_err(|_| bad())?;
            let minor = parts[1].parse().map_err(|_| bad())?;
            return Ok(Comparator::Wildcard(major, Some(minor)));
        }

        Err(bad())
    }

    /// Check if a version satisfies this comparator
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Comparator::Any => true,

            Comparator::Exact(v) => {
                version.major == v.major
                    && version.minor == v.minor
                    && version.patch == v.patch
                    && version.prerelease == v.prerelease
            }

            Comparator::Caret(v) => {
                // ^1.2.3 := >=1.2.3 <2.0.0
                // ^0.2.3 := >=0.2.3 <0.3.0
                // ^0.0.3 := >=0.0.3 <0.0.4
                if v.major > 0 {
                    version >= v && version.major == v.major
                } else if v.minor > 0 {
                    version >= v && version.major == 0 && version.minor == v.minor
                } else {
                    version >= v
                        && version.major == 0
                        && version.minor == 0
                        && version.patch == v.patch
                }
            }

            Comparator::Tilde(v) => {
                // ~1.2.3 := >=1.2.3 <1.3.0
                version >= v && version.major == v.major && version.minor == v.minor
            }

            Comparator::Greater(v) => version > v,
            Comparator::GreaterEq(v) => version >= v,
            Comparator::Less(v) => version < v,
            Comparator::LessEq(v) => version <= v,

            Comparator::Wildcard(major, minor) => match minor {
                Some(m) => version.major == *major && version.minor == *m,
                None => version.major == *major,
            },
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparator::Any => write!(f, "*"),
            Comparator::Exact(v) => write!(f, "{}", v),
            Comparator::Caret(v) => write!(f, "^{}", v),
            Comparator::Tilde(v) => write!(f, "~{}", v),
            Comparator::Greater(v) => write!(f, ">{}", v),
            Comparator::GreaterEq(v) => write!(f, ">={}", v),
            Comparator::Less(v) => write!(f, "<{}", v),
            Comparator::LessEq(v) => write!(f, "<={}", v),
            Comparator::Wildcard(major, Some(minor)) => write!(f, "{}.{}.*", major, minor),
            Comparator::Wildcard(major, None) => write!(f, "{}.*", major),
        }
    }
}

/// Version range: a set predicate over versions
#[derive(Debug, Clone, PartialEq)]
pub enum Range {
    /// Symbolic tag resolved by the registry (`latest`)
    DistTag(String),

    /// Disjunction of comparator conjunctions
    Semver(Vec<Vec<Comparator>>),
}

/// The one dist-tag the range grammar accepts.
pub const LATEST_TAG: &str = "latest";

impl Range {
    /// Parse a range string
    pub fn parse(text: &str) -> Result<Self, SemverError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SemverError::InvalidRange(text.to_string()));
        }
        if text == LATEST_TAG {
            return Ok(Range::DistTag(text.to_string()));
        }

        let mut alternatives = Vec::new();
        for alternative in text.split("||") {
            let comparators = alternative
                .split_whitespace()
                .map(Comparator::parse)
                .collect::<Result<Vec<_>, _>>()?;
            if comparators.is_empty() {
                return Err(SemverError::InvalidRange(text.to_string()));
            }
            alternatives.push(comparators);
        }
        Ok(Range::Semver(alternatives))
    }

    /// Check if a version satisfies this range. A dist-tag matches nothing;
    /// only the registry can resolve it.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Range::DistTag(_) => false,
            Range::Semver(alternatives) => alternatives
                .iter()
                .any(|conjunction| conjunction.iter().all(|c| c.matches(version))),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Range::DistTag(tag) => write!(f, "{}", tag),
            Range::Semver(alternatives) => {
                for (i, conjunction) in alternatives.iter().enumerate() {
                    if i > 0 {
                        write!(f, " || ")?;
                    }
                    for (j, comparator) in conjunction.iter().enumerate() {
                        if j > 0 {
                            write!(f, " ")?;
                        }
                        write!(f, "{}", comparator)?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!(v.major, 1);
        assert_eq!(v.minor, 2);
        assert_eq!(v.patch, 3);
        assert!(v.prerelease.is_none());
        assert!(v.build.is_none());
    }

    #[test]
    fn test_parse_version_with_v_prefix() {
        let v = Version::parse("v1.2.3").unwrap();
        assert_eq!(v.major, 1);
    }

    #[test]
    fn test_parse_version_with_prerelease_and_build() {
        let v = Version::parse("1.2.3-alpha.1+build.7").unwrap();
        assert_eq!(v.prerelease, Some("alpha.1".to_string()));
        assert_eq!(v.build, Some("build.7".to_string()));
    }

    #[test]
    fn test_parse_version_rejects_garbage() {
        assert!(Version::parse("1.2").is_err());
        assert!(Version::parse("1.2.x").is_err());
        assert!(Version::parse("1.2.3-").is_err());
        assert!(Version::parse("").is_err());
    }

    #[test]
    fn test_version_ordering() {
        assert!(Version::new(1, 0, 0) < Version::new(2, 0, 0));
        assert!(Version::new(1, 2, 0) < Version::new(1, 3, 0));
        assert!(Version::new(1, 2, 3) < Version::new(1, 2, 4));
        assert!(Version::new(1, 2, 3) == Version::new(1, 2, 3));
    }

    #[test]
    fn test_prerelease_precedence() {
        let release = Version::parse("1.0.0").unwrap();
        let alpha = Version::parse("1.0.0-alpha").unwrap();
        let alpha1 = Version::parse("1.0.0-alpha.1").unwrap();
        let alpha_beta = Version::parse("1.0.0-alpha.beta").unwrap();
        let beta = Version::parse("1.0.0-beta").unwrap();
        let beta2 = Version::parse("1.0.0-beta.2").unwrap();
        let beta11 = Version::parse("1.0.0-beta.11").unwrap();
        let rc1 = Version::parse("1.0.0-rc.1").unwrap();

        assert!(alpha < alpha1);
        assert!(alpha1 < alpha_beta);
        assert!(alpha_beta < beta);
        assert!(beta < beta2);
        assert!(beta2 < beta11); // numeric identifiers compare numerically
        assert!(beta11 < rc1);
        assert!(rc1 < release);
    }

    #[test]
    fn test_build_metadata_ignored() {
        let plain = Version::parse("1.2.3").unwrap();
        let built = Version::parse("1.2.3+exp.sha.5114f85").unwrap();
        assert_eq!(plain, built);
        assert_eq!(plain.cmp(&built), Ordering::Equal);
    }

    #[test]
    fn test_display_roundtrip() {
        for text in ["1.2.3", "0.1.0-rc.2", "4.17.21", "2.0.0-beta.1+sha.abc"] {
            let v = Version::parse(text).unwrap();
            assert_eq!(v.to_string(), text);
        }
    }

    #[test]
    fn test_serde_as_string() {
        let v: Version = serde_json::from_str("\"1.2.3-rc.1\"").unwrap();
        assert_eq!(v, Version::parse("1.2.3-rc.1").unwrap());
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"1.2.3-rc.1\"");
    }

    #[test]
    fn test_parse_exact_range() {
        let r = Range::parse("1.2.3").unwrap();
        assert!(r.matches(&Version::new(1, 2, 3)));
        assert!(!r.matches(&Version::new(1, 2, 4)));
    }

    #[test]
    fn test_caret_match() {
        let r = Range::parse("^1.2.3").unwrap();
        assert!(r.matches(&Version::new(1, 2, 3)));
        assert!(r.matches(&Version::new(1, 9, 9)));
        assert!(!r.matches(&Version::new(1, 2, 2)));
        assert!(!r.matches(&Version::new(2, 0, 0)));
    }

    #[test]
    fn test_caret_match_zero_major() {
        let r = Range::parse("^0.2.3").unwrap();
        assert!(r.matches(&Version::new(0, 2, 3)));
        assert!(r.matches(&Version::new(0, 2, 4)));
        assert!(!r.matches(&Version::new(0, 3, 0)));
        assert!(!r.matches(&Version::new(1, 0, 0)));

        let r = Range::parse("^0.0.3").unwrap();
        assert!(r.matches(&Version::new(0, 0, 3)));
        assert!(!r.matches(&Version::new(0, 0, 4)));
    }

    #[test]
    fn test_tilde_match() {
        let r = Range::parse("~1.2.3").unwrap();
        assert!(r.matches(&Version::new(1, 2, 9)));
        assert!(!r.matches(&Version::new(1, 3, 0)));
        assert!(!r.matches(&Version::new(1, 2, 2)));
    }

    #[test]
    fn test_comparators() {
        let r = Range::parse(">1.2.3").unwrap();
        assert!(r.matches(&Version::new(1, 2, 4)));
        assert!(!r.matches(&Version::new(1, 2, 3)));

        let r = Range::parse("<=2.0.0").unwrap();
        assert!(r.matches(&Version::new(2, 0, 0)));
        assert!(!r.matches(&Version::new(2, 0, 1)));
    }

    #[test]
    fn test_conjunction() {
        let r = Range::parse(">=1.2.0 <1.4.0").unwrap();
        assert!(r.matches(&Version::new(1, 2, 0)));
        assert!(r.matches(&Version::new(1, 3, 9)));
        assert!(!r.matches(&Version::new(1, 4, 0)));
        assert!(!r.matches(&Version::new(1, 1, 9)));
    }

    #[test]
    fn test_disjunction() {
        let r = Range::parse("^1.0.0 || ^2.0.0").unwrap();
        assert!(r.matches(&Version::new(1, 5, 0)));
        assert!(r.matches(&Version::new(2, 3, 1)));
        assert!(!r.matches(&Version::new(3, 0, 0)));
    }

    #[test]
    fn test_wildcard() {
        let r = Range::parse("1.2.*").unwrap();
        assert!(r.matches(&Version::new(1, 2, 999)));
        assert!(!r.matches(&Version::new(1, 3, 0)));

        let r = Range::parse("1.*").unwrap();
        assert!(r.matches(&Version::new(1, 9, 0)));
        assert!(!r.matches(&Version::new(2, 0, 0)));
    }

    #[test]
    fn test_latest_is_a_dist_tag() {
        let r = Range::parse("latest").unwrap();
        assert_eq!(r, Range::DistTag("latest".to_string()));
        // Dist-tags never match by algebra alone.
        assert!(!r.matches(&Version::new(1, 0, 0)));
    }

    #[test]
    fn test_bad_ranges_carry_text() {
        for text in ["", "not a range", "^1.2", ">=", "1.2.3 ||"] {
            match Range::parse(text) {
                Err(SemverError::InvalidRange(_)) => {}
                other => panic!("expected InvalidRange for {:?}, got {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_range_display() {
        let r = Range::parse(">=1.2.0 <2.0.0 || ^3.0.0").unwrap();
        assert_eq!(r.to_string(), ">=1.2.0 <2.0.0 || ^3.0.0");
    }
}
