//! Module versions and version constraints.
//!
//! Versions follow the usual major.minor.patch shape with an optional
//! pre-release tag. Constraints are comma-separated conjunctions of terms
//! (`>=1.2, <2.0`), with the bare-version form defaulting to a caret
//! requirement.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A module version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub pre: Option<String>,
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
        }
    }

    /// Parse a version string such as `1.2.3` or `2.0.0-beta`.
    ///
    /// Omitted minor or patch components default to zero.
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        let (version_part, pre) = match s.split_once('-') {
            Some((v, p)) => (v, Some(p.to_string())),
            None => (s, None),
        };

        let nums: Vec<&str> = version_part.split('.').collect();
        if nums.is_empty() || nums.len() > 3 || nums[0].is_empty() {
            return Err(VersionParseError::InvalidFormat(s.to_string()));
        }

        let parse_num = |n: &str| {
            n.parse::<u32>()
                .map_err(|_| VersionParseError::InvalidNumber(s.to_string()))
        };

        let major = parse_num(nums[0])?;
        let minor = nums.get(1).map(|n| parse_num(n)).transpose()?.unwrap_or(0);
        let patch = nums.get(2).map(|n| parse_num(n)).transpose()?.unwrap_or(0);

        Ok(Self {
            major,
            minor,
            patch,
            pre,
        })
    }

    /// Check if this version is compatible with another (same major version
    /// for 1.x+, same minor version for 0.x).
    pub fn is_compatible(&self, other: &Version) -> bool {
        if self.major == 0 && other.major == 0 {
            self.minor == other.minor
        } else {
            self.major == other.major
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

/// Errors from parsing versions or constraints.
#[derive(Debug, Clone, Error)]
pub enum VersionParseError {
    #[error("invalid version format: '{0}'")]
    InvalidFormat(String),
    #[error("invalid number in version: '{0}'")]
    InvalidNumber(String),
    #[error("empty version constraint")]
    EmptyConstraint,
}

/// One term of a version constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Term {
    /// Exact version: `=1.2.3`
    Exact(Version),
    /// Greater than or equal: `>=1.2.3`
    AtLeast(Version),
    /// Less than or equal: `<=1.2.3`
    AtMost(Version),
    /// Strictly less than: `<2.0.0`
    Before(Version),
    /// Compatible (caret): `^1.2.3`
    Caret(Version),
    /// Patch-level changes only (tilde): `~1.2.3`
    Tilde(Version),
    /// Any version: `*`
    Any,
}

impl Term {
    fn matches(&self, version: &Version) -> bool {
        match self {
            Term::Exact(v) => version == v,
            Term::AtLeast(v) => version >= v,
            Term::AtMost(v) => version <= v,
            Term::Before(v) => version < v,
            Term::Caret(v) => version >= v && version.is_compatible(v),
            Term::Tilde(v) => {
                version >= v && version.major == v.major && version.minor == v.minor
            }
            Term::Any => true,
        }
    }

    fn parse(s: &str) -> Result<Self, VersionParseError> {
        let s = s.trim();
        if s == "*" {
            return Ok(Term::Any);
        }
        if let Some(rest) = s.strip_prefix(">=") {
            return Ok(Term::AtLeast(Version::parse(rest.trim())?));
        }
        if let Some(rest) = s.strip_prefix("<=") {
            return Ok(Term::AtMost(Version::parse(rest.trim())?));
        }
        if let Some(rest) = s.strip_prefix('<') {
            return Ok(Term::Before(Version::parse(rest.trim())?));
        }
        if let Some(rest) = s.strip_prefix('^') {
            return Ok(Term::Caret(Version::parse(rest.trim())?));
        }
        if let Some(rest) = s.strip_prefix('~') {
            return Ok(Term::Tilde(Version::parse(rest.trim())?));
        }
        if let Some(rest) = s.strip_prefix('=') {
            return Ok(Term::Exact(Version::parse(rest.trim())?));
        }
        // Default to caret semantics for a bare version
        Ok(Term::Caret(Version::parse(s)?))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Exact(v) => write!(f, "={}", v),
            Term::AtLeast(v) => write!(f, ">={}", v),
            Term::AtMost(v) => write!(f, "<={}", v),
            Term::Before(v) => write!(f, "<{}", v),
            Term::Caret(v) => write!(f, "^{}", v),
            Term::Tilde(v) => write!(f, "~{}", v),
            Term::Any => write!(f, "*"),
        }
    }
}

/// A version constraint: a conjunction of terms, all of which must match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConstraint {
    terms: Vec<Term>,
}

impl VersionConstraint {
    /// The constraint matching any version.
    pub fn any() -> Self {
        Self {
            terms: vec![Term::Any],
        }
    }

    /// A constraint requiring exactly the given version.
    pub fn exact(version: Version) -> Self {
        Self {
            terms: vec![Term::Exact(version)],
        }
    }

    /// A caret constraint on the given version.
    pub fn caret(version: Version) -> Self {
        Self {
            terms: vec![Term::Caret(version)],
        }
    }

    /// Parse a constraint string: comma-separated terms, e.g. `>=1.2, <2.0`.
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        let terms = s
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(Term::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if terms.is_empty() {
            return Err(VersionParseError::EmptyConstraint);
        }
        Ok(Self { terms })
    }

    /// Check if a version satisfies every term of this constraint.
    pub fn matches(&self, version: &Version) -> bool {
        self.terms.iter().all(|t| t.matches(version))
    }

    /// Whether this constraint pins a single exact version, and which.
    pub fn exact_version(&self) -> Option<&Version> {
        self.terms.iter().find_map(|t| match t {
            Term::Exact(v) => Some(v),
            _ => None,
        })
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", term)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));

        let v = Version::parse("1.0").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 0, 0));

        let v = Version::parse("2.0.0-beta").unwrap();
        assert_eq!(v.pre, Some("beta".to_string()));

        assert!(Version::parse("").is_err());
        assert!(Version::parse("1.2.x").is_err());
    }

    #[test]
    fn test_version_ordering() {
        assert!(Version::parse("1.2.3").unwrap() < Version::parse("1.10.0").unwrap());
        assert!(Version::parse("2.0.0").unwrap() > Version::parse("1.9.9").unwrap());
    }

    #[test]
    fn test_constraint_matching() {
        let v1 = Version::parse("1.2.3").unwrap();
        let v2 = Version::parse("1.3.0").unwrap();
        let v3 = Version::parse("2.0.0").unwrap();

        let c = VersionConstraint::parse("^1.2.0").unwrap();
        assert!(c.matches(&v1));
        assert!(c.matches(&v2));
        assert!(!c.matches(&v3));

        let c = VersionConstraint::parse(">=1.2.3, <2.0.0").unwrap();
        assert!(c.matches(&v1));
        assert!(c.matches(&v2));
        assert!(!c.matches(&v3));

        let c = VersionConstraint::parse("=1.2.3").unwrap();
        assert!(c.matches(&v1));
        assert!(!c.matches(&v2));
        assert_eq!(c.exact_version(), Some(&v1));

        let c = VersionConstraint::parse("*").unwrap();
        assert!(c.matches(&v3));
        assert_eq!(c.exact_version(), None);
    }

    #[test]
    fn test_constraint_display() {
        let c = VersionConstraint::parse(">=1.2, <2.0").unwrap();
        assert_eq!(c.to_string(), ">=1.2.0, <2.0.0");
    }
}
