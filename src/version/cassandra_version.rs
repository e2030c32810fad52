//! Cassandra release version parsing
//!
//! Accepts `major.minor.patch`, `major.minor`, an optional `-qualifier`
//! (`4.0-beta4`, `4.1.0-SNAPSHOT`) and ignores `+build` metadata.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed, totally ordered release version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CassandraVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub qualifier: Option<String>,
}

impl CassandraVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            qualifier: None,
        }
    }

    /// Parse a release version string as reported by `system.local`
    pub fn parse(version: &str) -> Result<Self> {
        let malformed = || Error::MalformedVersion {
            version: version.to_string(),
        };

        let trimmed = version.trim();
        let without_build = match trimmed.split_once('+') {
            Some((head, build)) if !build.is_empty() => head,
            Some(_) => return Err(malformed()),
            None => trimmed,
        };

        let (core, qualifier) = match without_build.split_once('-') {
            Some((core, qualifier)) => {
                let valid = !qualifier.is_empty()
                    && qualifier
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
                if !valid {
                    return Err(malformed());
                }
                (core, Some(qualifier.to_string()))
            }
            None => (without_build, None),
        };

        let mut parts = core.split('.');
        let mut component = |required: bool| -> Result<u32> {
            match parts.next() {
                Some(part) if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) => {
                    part.parse::<u32>().map_err(|_| malformed())
                }
                None if !required => Ok(0),
                _ => Err(malformed()),
            }
        };

        let major = component(true)?;
        let minor = component(true)?;
        let patch = component(false)?;
        if parts.next().is_some() {
            return Err(malformed());
        }

        Ok(Self {
            major,
            minor,
            patch,
            qualifier,
        })
    }

    /// Compare on major.minor.patch only
    pub fn cmp_release(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }

    pub fn is_pre_release(&self) -> bool {
        self.qualifier.is_some()
    }
}

impl Ord for CassandraVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_release(other).then_with(|| match (&self.qualifier, &other.qualifier) {
            (None, None) => Ordering::Equal,
            // A qualified build precedes the final release
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => cmp_qualifier(a, b),
        })
    }
}

/// Split a qualifier into alternating runs of digits and non-digits
fn qualifier_segments(qualifier: &str) -> Vec<&str> {
    let bytes = qualifier.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    for i in 1..bytes.len() {
        if bytes[i].is_ascii_digit() != bytes[i - 1].is_ascii_digit() {
            segments.push(&qualifier[start..i]);
            start = i;
        }
    }
    if start < bytes.len() {
        segments.push(&qualifier[start..]);
    }
    segments
}

fn cmp_segment(a: &str, b: &str) -> Ordering {
    let numeric = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    match (numeric(a), numeric(b)) {
        (true, true) => {
            let (a, b) = (a.trim_start_matches('0'), b.trim_start_matches('0'));
            a.len().cmp(&b.len()).then_with(|| a.cmp(b))
        }
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

/// `rc9 < rc10`: digit runs compare numerically, text runs lexically
fn cmp_qualifier(a: &str, b: &str) -> Ordering {
    let (left, right) = (qualifier_segments(a), qualifier_segments(b));
    left.iter()
        .zip(&right)
        .map(|(x, y)| cmp_segment(x, y))
        .find(|ordering| ordering.is_ne())
        .unwrap_or_else(|| left.len().cmp(&right.len()))
        .then_with(|| a.cmp(b))
}

impl PartialOrd for CassandraVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for CassandraVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CassandraVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(qualifier) = &self.qualifier {
            write!(f, "-{}", qualifier)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_release() {
        let v = CassandraVersion::parse("4.0.1").unwrap();
        assert_eq!(v, CassandraVersion::new(4, 0, 1));
        assert_eq!(v.to_string(), "4.0.1");
    }

    #[test]
    fn test_parse_two_components() {
        assert_eq!(
            CassandraVersion::parse("4.0").unwrap(),
            CassandraVersion::new(4, 0, 0)
        );
    }

    #[test]
    fn test_parse_qualifier_and_build() {
        let v = CassandraVersion::parse("4.0-beta4").unwrap();
        assert_eq!(v.qualifier.as_deref(), Some("beta4"));
        assert!(v.is_pre_release());
        assert_eq!(v.to_string(), "4.0.0-beta4");

        let v = CassandraVersion::parse("4.1.2-SNAPSHOT+abc123").unwrap();
        assert_eq!(v.qualifier.as_deref(), Some("SNAPSHOT"));
        assert_eq!(v.patch, 2);
    }

    #[test]
    fn test_parse_malformed() {
        for input in ["", "4", "four.0.0", "4.0.0.1", "4..0", "4.0-", "4.0.0+", "4.0.0-be ta"] {
            assert_matches!(
                CassandraVersion::parse(input),
                Err(Error::MalformedVersion { .. }),
                "input {:?}",
                input
            );
        }
    }

    #[test]
    fn test_ordering() {
        let beta: CassandraVersion = "4.0-beta4".parse().unwrap();
        let rc: CassandraVersion = "4.0-rc1".parse().unwrap();
        let ga: CassandraVersion = "4.0.0".parse().unwrap();
        let patch: CassandraVersion = "4.0.1".parse().unwrap();
        let old: CassandraVersion = "3.11.14".parse().unwrap();

        assert!(old < beta);
        assert!(beta < rc);
        assert!(rc < ga);
        assert!(ga < patch);
        assert_eq!(beta.cmp_release(&ga), Ordering::Equal);
    }

    #[test]
    fn test_qualifier_numbers_compare_numerically() {
        let v = |raw: &str| CassandraVersion::parse(raw).unwrap();

        assert!(v("4.0-rc9") < v("4.0-rc10"));
        assert!(v("4.0-beta9") < v("4.0-beta10"));
        assert!(v("4.0-beta10") < v("4.0-rc1"));
        assert!(v("4.0-alpha5") < v("4.0-beta1"));
        assert!(v("4.0-rc10") < v("4.0.0"));
        assert_eq!(v("4.0-rc10").cmp(&v("4.0-rc10")), Ordering::Equal);
        assert_ne!(v("4.0-rc01").cmp(&v("4.0-rc1")), Ordering::Equal);
    }

    #[test]
    fn test_equality_drives_swaps() {
        assert_eq!(
            CassandraVersion::parse("4.0").unwrap(),
            CassandraVersion::parse("4.0.0").unwrap()
        );
        assert_ne!(
            CassandraVersion::parse("4.0.0").unwrap(),
            CassandraVersion::parse("4.0.1").unwrap()
        );
    }
}
