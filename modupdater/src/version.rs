//! Version ordering.
//!
//! Versions published in the manifest come in two shapes: dotted releases
//! (`3.7.0`) and date stamps (`20250314`). Both are ordered with one rule:
//!
//! - the string is split on `.`, `-` and `_`
//! - numeric components compare as unsigned integers of any width
//! - text components compare lexically and sort after numeric ones
//! - missing trailing components count as `0`
//!
//! The sentinel `unknown` (and the empty string) is not a version at all, so
//! nothing is ever newer or older than it.

use std::cmp::Ordering;
use std::fmt;

/// Sentinel used wherever a version could not be determined.
pub const UNKNOWN_VERSION: &str = "unknown";

/// One component of a version string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    /// Digits with leading zeros removed (`"0"` stays `"0"`).
    Numeric(String),
    Text(String),
}

impl Component {
    fn parse(raw: &str) -> Self {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            let trimmed = raw.trim_start_matches('0');
            let digits = if trimmed.is_empty() { "0" } else { trimmed };
            Self::Numeric(digits.to_string())
        } else {
            Self::Text(raw.to_ascii_lowercase())
        }
    }

    fn zero() -> Self {
        Self::Numeric("0".to_string())
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Numeric(a), Self::Numeric(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Self::Numeric(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Numeric(_)) => Ordering::Greater,
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed, comparable version string.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    components: Vec<Component>,
}

impl Version {
    /// Parse a version string.
    ///
    /// Returns `None` for the empty string and the `unknown` sentinel.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case(UNKNOWN_VERSION) {
            return None;
        }

        let body = raw
            .strip_prefix('v')
            .or_else(|| raw.strip_prefix('V'))
            .unwrap_or(raw);

        let components = body
            .split(['.', '-', '_'])
            .filter(|part| !part.is_empty())
            .map(Component::parse)
            .collect::<Vec<_>>();

        if components.is_empty() {
            return None;
        }

        Some(Self {
            raw: raw.to_string(),
            components,
        })
    }

    /// The string this version was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        let zero = Component::zero();
        for i in 0..len {
            let a = self.components.get(i).unwrap_or(&zero);
            let b = other.components.get(i).unwrap_or(&zero);
            match a.cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
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

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Whether `candidate` is strictly newer than `current`.
///
/// False whenever either side is not a version.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    match (Version::parse(candidate), Version::parse(current)) {
        (Some(candidate), Some(current)) => candidate > current,
        _ => false,
    }
}
