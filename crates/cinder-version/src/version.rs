//! Parsed semantic versions with a total order.

use std::cmp::Ordering;
use std::fmt;

use crate::{Result, VersionError};

/// A parsed semantic version.
///
/// Missing minor/patch components default to zero, so `1.0` and `1.0.0`
/// compare equal even though the textual forms differ. Build metadata
/// (after `+`) is kept for display but ignored when comparing.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    major: u64,
    minor: u64,
    patch: u64,
    pre: Vec<PreSegment>,
    build: Option<String>,
    original: String,
}

/// One dot-separated segment of a pre-release tag.
///
/// Numeric segments compare numerically and sort before alphanumeric
/// ones, per semver precedence rules.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PreSegment {
    Numeric(u64),
    Text(String),
}

impl PreSegment {
    fn parse(s: &str) -> Self {
        match s.parse::<u64>() {
            Ok(n) => PreSegment::Numeric(n),
            Err(_) => PreSegment::Text(s.to_string()),
        }
    }
}

impl Ord for PreSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PreSegment::Numeric(a), PreSegment::Numeric(b)) => a.cmp(b),
            (PreSegment::Text(a), PreSegment::Text(b)) => a.cmp(b),
            (PreSegment::Numeric(_), PreSegment::Text(_)) => Ordering::Less,
            (PreSegment::Text(_), PreSegment::Numeric(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for PreSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Version {
    /// Parse a version string.
    ///
    /// Accepts an optional leading `v`, partial versions (`1`, `1.2`),
    /// a pre-release tag after `-` and build metadata after `+`.
    pub fn parse(input: &str) -> Result<Self> {
        let original = input.to_string();
        let s = input.trim();
        let s = s.strip_prefix('v').unwrap_or(s);

        if s.is_empty() {
            return Err(VersionError::InvalidVersion(original));
        }

        let (s, build) = match s.split_once('+') {
            Some((head, meta)) => (head, Some(meta.to_string())),
            None => (s, None),
        };

        let (core, pre_str) = match s.split_once('-') {
            Some((head, pre)) => (head, Some(pre)),
            None => (s, None),
        };

        let mut parts = core.split('.');
        let major = parse_component(parts.next(), &original)?;
        let minor = match parts.next() {
            Some(p) => parse_component(Some(p), &original)?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => parse_component(Some(p), &original)?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(VersionError::InvalidVersion(original));
        }

        let pre = match pre_str {
            Some(pre) if !pre.is_empty() => pre.split('.').map(PreSegment::parse).collect(),
            Some(_) => return Err(VersionError::InvalidVersion(original)),
            None => Vec::new(),
        };

        Ok(Version {
            major,
            minor,
            patch,
            pre,
            build,
            original,
        })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    /// Whether this version carries a pre-release tag.
    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// The string this version was parsed from.
    pub fn as_str(&self) -> &str {
        &self.original
    }
}

fn parse_component(part: Option<&str>, original: &str) -> Result<u64> {
    let part = part.ok_or_else(|| VersionError::InvalidVersion(original.to_string()))?;
    part.parse::<u64>()
        .map_err(|_| VersionError::InvalidVersion(original.to_string()))
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let core = (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch));
        if core != Ordering::Equal {
            return core;
        }

        // A release sorts above any of its pre-releases.
        match (self.pre.is_empty(), other.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.pre.cmp(&other.pre),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!(v.major(), 1);
        assert_eq!(v.minor(), 2);
        assert_eq!(v.patch(), 3);
        assert!(!v.is_prerelease());
    }

    #[test]
    fn test_parse_partial() {
        let v = Version::parse("1.2").unwrap();
        assert_eq!(v.patch(), 0);

        let v = Version::parse("2").unwrap();
        assert_eq!(v.minor(), 0);
    }

    #[test]
    fn test_parse_v_prefix() {
        assert_eq!(
            Version::parse("v1.2.3").unwrap(),
            Version::parse("1.2.3").unwrap()
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("abc").is_err());
        assert!(Version::parse("1.2.3.4").is_err());
        assert!(Version::parse("1.x").is_err());
    }

    #[test]
    fn test_equal_regardless_of_textual_form() {
        assert_eq!(
            Version::parse("1.0").unwrap(),
            Version::parse("1.0.0").unwrap()
        );
    }

    #[test]
    fn test_ordering() {
        let parse = |s| Version::parse(s).unwrap();
        assert!(parse("1.25.0") > parse("1.24.0"));
        assert!(parse("1.9999.9999") < parse("2.0.0"));
        assert!(parse("0.2.9") < parse("1.0.0"));
        assert!(parse("1.10.0") > parse("1.9.0"));
    }

    #[test]
    fn test_prerelease_ordering() {
        let parse = |s| Version::parse(s).unwrap();
        // A pre-release sorts below its release.
        assert!(parse("1.0.0-alpha") < parse("1.0.0"));
        // Segment-wise precedence.
        assert!(parse("1.0.0-alpha") < parse("1.0.0-alpha.1"));
        assert!(parse("1.0.0-alpha.1") < parse("1.0.0-beta"));
        assert!(parse("1.0.0-beta.2") < parse("1.0.0-beta.11"));
        assert!(parse("1.0.0-rc.1") < parse("1.0.0"));
        // Numeric segments sort before alphanumeric ones.
        assert!(parse("1.0.0-1") < parse("1.0.0-alpha"));
    }

    #[test]
    fn test_build_metadata_ignored() {
        assert_eq!(
            Version::parse("1.2.3+build.5").unwrap(),
            Version::parse("1.2.3").unwrap()
        );
    }

    #[test]
    fn test_display_keeps_original() {
        assert_eq!(Version::parse("v1.2").unwrap().to_string(), "v1.2");
    }
}
