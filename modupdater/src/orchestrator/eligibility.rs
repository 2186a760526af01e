//! Which tracks are offered an update.
//!
//! Decisions are pure functions of the manifest and the local version
//! sources, so re-checking with unchanged inputs gives the same answer.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use tracing::debug;

use crate::config::UpdaterConfig;
use crate::manifest::UpdateManifest;
use crate::track::Track;
use crate::version::{is_newer, Version, UNKNOWN_VERSION};

/// Installed versions, as read from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVersions {
    pub application: String,
    pub system: String,
    pub data: String,
    /// Build date of the installed OS image, if the marker exists.
    pub os_build_date: Option<NaiveDate>,
}

impl LocalVersions {
    /// Read the version markers named in `config`.
    ///
    /// Missing or empty markers read as `unknown`.
    pub fn read(config: &UpdaterConfig) -> Self {
        Self {
            application: config.policy.app_version.clone(),
            system: read_marker(&config.paths.version_file),
            data: read_marker(&config.paths.data_version_file),
            os_build_date: read_build_date(&config.paths.os_build_file),
        }
    }

    /// Installed version of `track`.
    pub fn version(&self, track: Track) -> &str {
        match track {
            Track::Application => &self.application,
            Track::System => &self.system,
            Track::DataOverlay => &self.data,
        }
    }
}

fn read_marker(path: &Path) -> String {
    fs::read_to_string(path)
        .ok()
        .and_then(|text| text.lines().next().map(|l| l.trim().to_string()))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
}

fn read_build_date(path: &Path) -> Option<NaiveDate> {
    let text = fs::read_to_string(path).ok()?;
    parse_build_date(text.lines().next()?.trim())
}

/// Parse `YYYYMMDD` or `YYYY-MM-DD`.
pub fn parse_build_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
}

/// Why a track is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferReason {
    /// The published version is newer than the installed one.
    NewerVersion,
    /// No local version, but the OS image is recent enough to take it.
    BuildDate,
}

/// An update the device is eligible for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub track: Track,
    pub current: String,
    pub available: String,
    pub download_url: String,
    pub digest_url: Option<String>,
    pub reason: OfferReason,
}

/// Offers for one manifest check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackDecision {
    /// The application update, applied in place first.
    pub application: Option<Offer>,
    /// The single deferred track (system before data overlay) offered.
    pub deferred: Option<Offer>,
}

impl TrackDecision {
    /// Whether nothing is offered.
    pub fn is_empty(&self) -> bool {
        self.application.is_none() && self.deferred.is_none()
    }

    /// Offers in the order they are attempted.
    pub fn offers(&self) -> impl Iterator<Item = &Offer> {
        self.application.iter().chain(self.deferred.iter())
    }
}

/// Whether `track` is offered an update.
pub fn evaluate(
    track: Track,
    manifest: &UpdateManifest,
    local: &LocalVersions,
    cutoff: Option<NaiveDate>,
) -> Option<Offer> {
    let download_url = manifest.download_url(track)?;
    let available = manifest.version(track);
    let current = local.version(track);

    let reason = if is_newer(available, current) {
        OfferReason::NewerVersion
    } else if track == Track::System
        && Version::parse(current).is_none()
        && Version::parse(available).is_some()
        && matches!((local.os_build_date, cutoff), (Some(built), Some(cutoff)) if built >= cutoff)
    {
        OfferReason::BuildDate
    } else {
        debug!(track = %track, current, available, "No update for track");
        return None;
    };

    Some(Offer {
        track,
        current: current.to_string(),
        available: available.to_string(),
        download_url: download_url.to_string(),
        digest_url: manifest.digest_url(track).map(str::to_string),
        reason,
    })
}

/// Evaluate every track.
pub fn decide(
    manifest: &UpdateManifest,
    local: &LocalVersions,
    cutoff: Option<NaiveDate>,
) -> TrackDecision {
    TrackDecision {
        application: evaluate(Track::Application, manifest, local, cutoff),
        deferred: Track::DEFERRED
            .iter()
            .find_map(|track| evaluate(*track, manifest, local, cutoff)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(app: &str, system: &str, data: &str) -> LocalVersions {
        LocalVersions {
            application: app.to_string(),
            system: system.to_string(),
            data: data.to_string(),
            os_build_date: None,
        }
    }

    fn cutoff() -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2025, 1, 1)
    }

    const MANIFEST: &str = "\
app_ver=1.1.0
app_update_url=https://m/app.tar.gz
app_md5_url=https://m/app.tar.gz.md5
update_ver=1.2.0
update_url=https://m/update.dep
md5_url=https://m/update.dep.MD5
data_ver=3.0
data_update_url=https://m/data.zip
data_md5_url=https://m/data.zip.md5
";

    #[test]
    fn test_newer_versions_offered() {
        let manifest = UpdateManifest::parse(MANIFEST);
        let decision = decide(&manifest, &local("1.0.0", "1.0.6", "2.0"), cutoff());

        let app = decision.application.unwrap();
        assert_eq!(app.available, "1.1.0");
        assert_eq!(app.reason, OfferReason::NewerVersion);

        // System has priority over the data overlay
        let deferred = decision.deferred.unwrap();
        assert_eq!(deferred.track, Track::System);
        assert_eq!(deferred.digest_url.as_deref(), Some("https://m/update.dep.MD5"));
    }

    #[test]
    fn test_data_offered_when_system_current() {
        let manifest = UpdateManifest::parse(MANIFEST);
        let decision = decide(&manifest, &local("1.1.0", "1.2.0", "2.0"), cutoff());
        assert!(decision.application.is_none());
        assert_eq!(decision.deferred.unwrap().track, Track::DataOverlay);
    }

    #[test]
    fn test_up_to_date() {
        let manifest = UpdateManifest::parse(MANIFEST);
        let decision = decide(&manifest, &local("1.1.0", "1.2.0", "3.0"), cutoff());
        assert!(decision.is_empty());
    }

    #[test]
    fn test_missing_url_not_offered() {
        let manifest = UpdateManifest::parse("update_ver=9.9.9\n");
        assert!(evaluate(Track::System, &manifest, &local("1", "1.0", "1"), cutoff()).is_none());
    }

    #[test]
    fn test_unknown_remote_never_offered() {
        let manifest = UpdateManifest::parse("update_url=https://m/update.dep\n");
        assert!(evaluate(Track::System, &manifest, &local("1", "1.0", "1"), cutoff()).is_none());
    }

    #[test]
    fn test_build_date_fallback() {
        let manifest = UpdateManifest::parse(MANIFEST);
        let mut versions = local("1.1.0", "unknown", "3.0");

        versions.os_build_date = NaiveDate::from_ymd_opt(2025, 3, 14);
        let offer = evaluate(Track::System, &manifest, &versions, cutoff()).unwrap();
        assert_eq!(offer.reason, OfferReason::BuildDate);

        versions.os_build_date = NaiveDate::from_ymd_opt(2024, 12, 31);
        assert!(evaluate(Track::System, &manifest, &versions, cutoff()).is_none());

        versions.os_build_date = NaiveDate::from_ymd_opt(2025, 3, 14);
        assert!(evaluate(Track::System, &manifest, &versions, None).is_none());
    }

    #[test]
    fn test_build_date_fallback_is_system_only() {
        let manifest = UpdateManifest::parse(MANIFEST);
        let mut versions = local("1.1.0", "1.2.0", "unknown");
        versions.os_build_date = NaiveDate::from_ymd_opt(2025, 3, 14);
        assert!(evaluate(Track::DataOverlay, &manifest, &versions, cutoff()).is_none());
    }

    #[test]
    fn test_decide_is_idempotent() {
        let manifest = UpdateManifest::parse(MANIFEST);
        let versions = local("1.0.0", "1.0.6", "2.0");
        assert_eq!(
            decide(&manifest, &versions, cutoff()),
            decide(&manifest, &versions, cutoff())
        );
    }

    #[test]
    fn test_parse_build_date() {
        assert_eq!(parse_build_date("20250314"), NaiveDate::from_ymd_opt(2025, 3, 14));
        assert_eq!(parse_build_date("2025-03-14"), NaiveDate::from_ymd_opt(2025, 3, 14));
        assert_eq!(parse_build_date("March"), None);
    }

    #[test]
    fn test_read_local_versions() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = UpdaterConfig::rooted_at(temp.path()).with_app_version("1.0.0");
        fs::write(&config.paths.version_file, "1.0.6\n").unwrap();
        fs::write(&config.paths.data_version_file, "\n").unwrap();
        fs::write(&config.paths.os_build_file, "20250314\n").unwrap();

        let versions = LocalVersions::read(&config);
        assert_eq!(versions.application, "1.0.0");
        assert_eq!(versions.system, "1.0.6");
        assert_eq!(versions.data, "unknown");
        assert_eq!(versions.os_build_date, NaiveDate::from_ymd_opt(2025, 3, 14));
    }
}
