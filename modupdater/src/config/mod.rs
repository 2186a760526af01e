//! Updater configuration.
//!
//! `UpdaterConfig` is built once when the process starts (usually from the
//! INI file, see [`UpdaterConfig::load`]) and handed by reference to every
//! component constructor. Nothing in the crate reads configuration from
//! global state.

mod file;
mod keys;

pub use file::{config_file_path, ConfigError};
pub use keys::ConfigKey;

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;

use crate::checksum::DigestAlgorithm;
use crate::download::RetryPolicy;
use crate::track::Track;

/// Default mirror serving the manifest and release notes.
pub const DEFAULT_MIRROR: &str = "https://github.com/cbepx-me/upgrade/releases/download/source";

/// Timeout for mirror latency probes.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 3;

/// Timeout for fetching the manifest body.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

/// Connect timeout for archive downloads.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;

/// Read timeout for archive downloads.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 300;

/// Attempts per download (including the first one).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Linear backoff step between download attempts.
pub const DEFAULT_BACKOFF_STEP_SECS: u64 = 2;

/// Complete updater configuration.
#[derive(Debug, Clone, Default)]
pub struct UpdaterConfig {
    /// Mirrors, timeouts and retry settings.
    pub network: NetworkConfig,
    /// Local files and directories.
    pub paths: PathsConfig,
    /// Version sources and apply behaviour.
    pub policy: PolicyConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Candidate mirror base URLs, probed for latency.
    pub mirrors: Vec<String>,
    /// Mirror used when every probe fails.
    pub default_mirror: String,
    /// Manifest document name relative to a mirror.
    pub manifest_name: String,
    /// Release-notes document name; `{lang}` is replaced by the language code.
    pub notes_name: String,
    pub probe_timeout: Duration,
    pub fetch_timeout: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Attempts per download or manifest fetch (including the first).
    pub max_attempts: u32,
    /// Backoff before retry `n` is `n * backoff_step`.
    pub backoff_step: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mirrors: Vec::new(),
            default_mirror: DEFAULT_MIRROR.to_string(),
            manifest_name: "update.txt".to_string(),
            notes_name: "update_info_{lang}.txt".to_string(),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_step: Duration::from_secs(DEFAULT_BACKOFF_STEP_SECS),
        }
    }
}

impl NetworkConfig {
    /// Retry policy for downloads and manifest fetches.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.max_attempts, self.backoff_step)
    }

    /// Release-notes document name for a language code.
    pub fn notes_name_for(&self, language: &str) -> String {
        self.notes_name.replace("{lang}", language)
    }
}

/// File-system locations.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    /// Partial downloads and companion digest files.
    pub work_dir: PathBuf,
    /// System version marker.
    pub version_file: PathBuf,
    /// Data overlay version marker.
    pub data_version_file: PathBuf,
    /// OS build-date marker used for first-run devices.
    pub os_build_file: PathBuf,
    /// Live application directory (updated in place).
    pub app_dir: PathBuf,
    /// Live system root the boot script copies into.
    pub system_root: PathBuf,
    /// Live data overlay root the boot script copies into.
    pub data_root: PathBuf,
    /// Verified payload waiting for the next boot.
    pub pending_dir: PathBuf,
    /// Boot-time trigger script.
    pub boot_script: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("modupdater"),
            version_file: PathBuf::from("/mnt/mod/ctrl/configs/ver.cfg"),
            data_version_file: PathBuf::from("/mnt/mod/ctrl/configs/data_ver.cfg"),
            os_build_file: PathBuf::from("/mnt/vendor/oem/build_date"),
            app_dir: PathBuf::from("/mnt/mod/apps/modupdater"),
            system_root: PathBuf::from("/mnt/mmc"),
            data_root: PathBuf::from("/mnt/mod"),
            pending_dir: PathBuf::from("/mnt/mmc/.modupdater-pending"),
            boot_script: PathBuf::from("/mnt/mod/ctrl/apply_update.sh"),
        }
    }
}

impl PathsConfig {
    /// Where a track's archive is downloaded to.
    pub fn archive_path(&self, track: Track) -> PathBuf {
        self.work_dir.join(format!("{}.archive", track.slug()))
    }

    /// Where a track's companion digest is downloaded to.
    pub fn digest_path(&self, track: Track) -> PathBuf {
        self.work_dir.join(format!("{}.digest", track.slug()))
    }

    /// Records the URL and version the partial archive was started for.
    pub fn source_path(&self, track: Track) -> PathBuf {
        self.work_dir.join(format!("{}.source", track.slug()))
    }

    /// Live root a track's payload ends up in.
    pub fn live_root(&self, track: Track) -> &PathBuf {
        match track {
            Track::Application => &self.app_dir,
            Track::System => &self.system_root,
            Track::DataOverlay => &self.data_root,
        }
    }

    /// Version marker for a deferred track.
    pub fn version_marker(&self, track: Track) -> Option<&PathBuf> {
        match track {
            Track::Application => None,
            Track::System => Some(&self.version_file),
            Track::DataOverlay => Some(&self.data_version_file),
        }
    }
}

/// Version sources and apply behaviour.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Two-part language code for release notes (e.g. `en_US`).
    pub language: String,
    /// Devices with no version marker are offered the system update when
    /// their OS build date is on or after this date.
    pub build_date_cutoff: Option<NaiveDate>,
    /// Apply a ready update without waiting for confirmation.
    pub auto_apply: bool,
    /// Digest algorithm of the companion files.
    pub digest: DigestAlgorithm,
    /// Version of the running application.
    pub app_version: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            language: "en_US".to_string(),
            build_date_cutoff: NaiveDate::from_ymd_opt(2025, 1, 1),
            auto_apply: false,
            digest: DigestAlgorithm::Md5,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory holding `update.log`.
    pub directory: PathBuf,
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("modupdater"),
            level: "info".to_string(),
        }
    }
}

impl UpdaterConfig {
    /// Configuration rooted at a single directory.
    ///
    /// Every path lives under `root`; used by tests and sandboxed runs.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            paths: PathsConfig {
                work_dir: root.join("work"),
                version_file: root.join("ver.cfg"),
                data_version_file: root.join("data_ver.cfg"),
                os_build_file: root.join("build_date"),
                app_dir: root.join("app"),
                system_root: root.join("system"),
                data_root: root.join("data"),
                pending_dir: root.join("pending"),
                boot_script: root.join("apply_update.sh"),
            },
            logging: LoggingConfig {
                directory: root.join("logs"),
                ..LoggingConfig::default()
            },
            ..Self::default()
        }
    }

    /// Add a candidate mirror.
    pub fn with_mirror(mut self, url: impl Into<String>) -> Self {
        self.network.mirrors.push(url.into());
        self
    }

    /// Set the fallback mirror.
    pub fn with_default_mirror(mut self, url: impl Into<String>) -> Self {
        self.network.default_mirror = url.into();
        self
    }

    /// Set the running application version.
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.policy.app_version = version.into();
        self
    }

    /// Enable or disable automatic apply.
    pub fn with_auto_apply(mut self, auto_apply: bool) -> Self {
        self.policy.auto_apply = auto_apply;
        self
    }

    /// Set the companion digest algorithm.
    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.policy.digest = digest;
        self
    }
}
