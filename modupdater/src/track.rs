//! Update tracks.
//!
//! A track is an independently versioned payload. Each one owns its manifest
//! keys, its local version source and its eligibility rule.

use std::fmt;

/// An independently versioned update payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Track {
    /// The updater application itself.
    Application,
    /// The base system image.
    System,
    /// Data overlay (themes, assets) layered over the system.
    DataOverlay,
}

impl Track {
    /// All tracks in evaluation priority order.
    pub const ALL: [Track; 3] = [Track::Application, Track::System, Track::DataOverlay];

    /// Tracks that are applied on the next boot, in priority order.
    pub const DEFERRED: [Track; 2] = [Track::System, Track::DataOverlay];

    /// Manifest key holding the published version.
    pub fn version_key(&self) -> &'static str {
        match self {
            Self::Application => "app_ver",
            Self::System => "update_ver",
            Self::DataOverlay => "data_ver",
        }
    }

    /// Manifest key holding the archive download URL.
    pub fn url_key(&self) -> &'static str {
        match self {
            Self::Application => "app_update_url",
            Self::System => "update_url",
            Self::DataOverlay => "data_update_url",
        }
    }

    /// Manifest key holding the companion digest URL.
    pub fn digest_url_key(&self) -> &'static str {
        match self {
            Self::Application => "app_md5_url",
            Self::System => "md5_url",
            Self::DataOverlay => "data_md5_url",
        }
    }

    /// Whether the payload is applied by the boot process instead of in place.
    pub fn is_deferred(&self) -> bool {
        !matches!(self, Self::Application)
    }

    /// Short identifier used for work file names and log fields.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Application => "app",
            Self::System => "system",
            Self::DataOverlay => "data",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application => write!(f, "application"),
            Self::System => write!(f, "system"),
            Self::DataOverlay => write!(f, "data overlay"),
        }
    }
}
