//! Compiler version parsing and range matching.
//!
//! Versions are dot-separated numeric components; missing components compare
//! as zero, so `5.1` equals `5.1.0`. Version specs use a colon/comma grammar:
//! `"A:B"` (inclusive range), `"A:"` (open upper), `":B"` (open lower),
//! `"X"` (exact), with `,` forming a disjunction of alternatives.

use std::cmp::Ordering;
use std::fmt;

/// A spec string that does not conform to the colon/comma grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InvalidSpec(String);

/// A parsed compiler version: the numeric components of e.g. `"10.3.0"`.
///
/// Distribution suffixes (`"10.3.0-2ubuntu1"`) are split off and ignored for
/// comparison purposes.
#[derive(Debug, Clone)]
pub struct Version(Vec<u64>);

/// Splits a version string into its numeric part and its suffix.
///
/// `"10.3.0-2ubuntu1"` yields `("10.3.0", "2ubuntu1")`; either part may be
/// empty.
pub fn version_components(version: &str) -> (&str, &str) {
    let numeric_len = version
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(version.len());
    let (number, rest) = version.split_at(numeric_len);
    (number, rest.strip_prefix('-').unwrap_or(rest))
}

impl Version {
    /// Parse the numeric part of a version string.
    ///
    /// Returns `None` when there is no numeric part, or when the numeric part
    /// is malformed (empty components, as in `"4..8"` or `"4.8."`).
    pub fn parse(version: &str) -> Option<Self> {
        let (number, _suffix) = version_components(version);
        if number.is_empty() {
            return None;
        }
        let components = number
            .split('.')
            .map(|c| c.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Version(components))
    }

    /// The numeric components.
    pub fn components(&self) -> &[u64] {
        &self.0
    }
}

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
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let lhs = self.0.get(i).copied().unwrap_or(0);
            let rhs = other.0.get(i).copied().unwrap_or(0);
            match lhs.cmp(&rhs) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut components = self.0.iter();
        if let Some(first) = components.next() {
            write!(f, "{first}")?;
        }
        for c in components {
            write!(f, ".{c}")?;
        }
        Ok(())
    }
}

/// One alternative of a version spec.
#[derive(Debug, Clone)]
enum Range {
    /// `"X"` — matches exactly X (modulo trailing zeros).
    Exact(Version),
    /// `"A:B"`, `"A:"`, `":B"` or `":"` — inclusive on both ends.
    Bounded {
        lo: Option<Version>,
        hi: Option<Version>,
    },
}

impl Range {
    fn matches(&self, version: &Version) -> bool {
        match self {
            Range::Exact(exact) => exact == version,
            Range::Bounded { lo, hi } => {
                if let Some(lo) = lo {
                    if version < lo {
                        return false;
                    }
                }
                if let Some(hi) = hi {
                    if version > hi {
                        return false;
                    }
                }
                true
            }
        }
    }
}

/// A parsed version spec: a disjunction of ranges and exact versions.
///
/// Specs are parsed once, when the catalog is built; matching at query time
/// cannot fail.
#[derive(Debug, Clone)]
pub struct VersionSpec {
    source: String,
    alternatives: Vec<Range>,
}

impl VersionSpec {
    /// Parse a spec string like `"4.9:"`, `"4.6:4.8.5"` or `"5.1,7.0:"`.
    pub fn parse(spec: &str) -> Result<Self, InvalidSpec> {
        let mut alternatives = Vec::new();
        for alternative in spec.split(',') {
            let alternative = alternative.trim();
            match alternative.split_once(':') {
                None => {
                    let exact = Version::parse(alternative).ok_or_else(|| {
                        InvalidSpec(format!("'{alternative}' is not a dot-separated version"))
                    })?;
                    alternatives.push(Range::Exact(exact));
                }
                Some((lo, hi)) => {
                    if hi.contains(':') {
                        return Err(InvalidSpec(format!(
                            "'{alternative}' has more than one ':'"
                        )));
                    }
                    let lo = parse_bound(lo)?;
                    let hi = parse_bound(hi)?;
                    alternatives.push(Range::Bounded { lo, hi });
                }
            }
        }
        Ok(VersionSpec {
            source: spec.to_string(),
            alternatives,
        })
    }

    /// True if any alternative accepts the version.
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|r| r.matches(version))
    }

    /// The spec exactly as written in the knowledge base.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_bound(bound: &str) -> Result<Option<Version>, InvalidSpec> {
    if bound.is_empty() {
        return Ok(None);
    }
    Version::parse(bound)
        .map(Some)
        .ok_or_else(|| InvalidSpec(format!("'{bound}' is not a dot-separated version")))
}
