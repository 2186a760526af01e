//! The manifest document.
//!
//! The manifest is plain UTF-8 text with one `key=value` pair per line.
//! Surrounding whitespace is trimmed, blank lines and `#` comments are
//! skipped, and lines without `=` (or with an empty key) are ignored. When a
//! key repeats, the last occurrence wins.

use std::collections::BTreeMap;

use tracing::debug;

use crate::track::Track;
use crate::version::UNKNOWN_VERSION;

/// Reserved key holding the release-notes document.
pub const RELEASE_NOTES_KEY: &str = "update_info";

/// Parsed remote manifest.
///
/// Lookups of absent keys return the `unknown` sentinel rather than nothing,
/// so version comparisons never have to special-case a missing value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateManifest {
    entries: BTreeMap<String, String>,
}

impl UpdateManifest {
    /// A manifest with no information ("no update available").
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a manifest document.
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    entries.insert(key.trim().to_string(), value.trim().to_string());
                }
                _ => debug!(line = number + 1, "Ignoring malformed manifest line"),
            }
        }

        Self { entries }
    }

    /// Whether the manifest carries no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries, release notes included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Value for `key`, or the `unknown` sentinel.
    pub fn get(&self, key: &str) -> &str {
        self.entries
            .get(key)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_VERSION)
    }

    /// Value for `key` if it is present and usable as a URL.
    pub fn url(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(UNKNOWN_VERSION))
    }

    /// Published version for a track.
    pub fn version(&self, track: Track) -> &str {
        let value = self.get(track.version_key());
        if value.is_empty() {
            UNKNOWN_VERSION
        } else {
            value
        }
    }

    /// Archive URL for a track.
    pub fn download_url(&self, track: Track) -> Option<&str> {
        self.url(track.url_key())
    }

    /// Companion digest URL for a track.
    pub fn digest_url(&self, track: Track) -> Option<&str> {
        self.url(track.digest_url_key())
    }

    /// Store the raw release-notes document.
    pub fn set_release_notes(&mut self, notes: impl Into<String>) {
        self.entries
            .insert(RELEASE_NOTES_KEY.to_string(), notes.into());
    }

    /// Release notes, if they were fetched.
    pub fn release_notes(&self) -> Option<&str> {
        self.entries.get(RELEASE_NOTES_KEY).map(String::as_str)
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render the single-line entries back into document form.
    ///
    /// Release notes are multi-line and are not part of the document.
    pub fn to_document(&self) -> String {
        self.iter()
            .filter(|(k, _)| *k != RELEASE_NOTES_KEY)
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect()
    }
}
