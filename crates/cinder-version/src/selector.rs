//! Version selectors and matching.

use std::fmt;

use crate::version::Version;
use crate::{Result, VersionError};

/// Comparison operators accepted in a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A version selector.
///
/// Ranges are expressed by the caller combining two comparison
/// selectors with logical AND; a single selector is always one of the
/// three forms below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// The empty selector, matches any version.
    All,
    /// A bare version, matches versions comparing equal to it.
    Exact(Version),
    /// An operator applied to a version.
    Cmp(Operator, Version),
}

impl Selector {
    /// Parse a selector string.
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Ok(Selector::All);
        }

        // Longest operators first so ">=" is not read as ">" + "=1.0".
        for (op_str, op) in [
            (">=", Operator::GreaterThanOrEqual),
            ("<=", Operator::LessThanOrEqual),
            (">", Operator::GreaterThan),
            ("<", Operator::LessThan),
            ("=", Operator::Equal),
        ] {
            if let Some(rest) = s.strip_prefix(op_str) {
                let version = Version::parse(rest.trim())
                    .map_err(|_| VersionError::InvalidSelector(input.to_string()))?;
                return Ok(Selector::Cmp(op, version));
            }
        }

        if s.starts_with(|c: char| "!~^*".contains(c)) {
            return Err(VersionError::InvalidSelector(input.to_string()));
        }

        let version =
            Version::parse(s).map_err(|_| VersionError::InvalidSelector(input.to_string()))?;
        Ok(Selector::Exact(version))
    }

    /// Test a concrete version against this selector.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Selector::All => true,
            Selector::Exact(v) => version == v,
            Selector::Cmp(Operator::Equal, v) => version == v,
            Selector::Cmp(Operator::GreaterThan, v) => version > v,
            Selector::Cmp(Operator::GreaterThanOrEqual, v) => version >= v,
            Selector::Cmp(Operator::LessThan, v) => version < v,
            Selector::Cmp(Operator::LessThanOrEqual, v) => version <= v,
        }
    }
}

/// Whether a version field holds a selector rather than a concrete
/// version (an operator prefix or the match-anything empty string).
pub fn is_selector(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || s.starts_with(['>', '<', '=', '!'])
}

/// Test a concrete version string against a selector string.
///
/// Malformed input surfaces as the underlying error rather than a
/// silent non-match.
pub fn selector_match_version(selector: &str, version: &str) -> Result<bool> {
    let sel = Selector::parse(selector)?;
    let ver = Version::parse(version)?;
    Ok(sel.matches(&ver))
}
