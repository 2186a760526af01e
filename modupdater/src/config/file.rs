//! INI persistence for [`UpdaterConfig`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use ini::Ini;
use thiserror::Error;

use super::UpdaterConfig;
use crate::checksum::DigestAlgorithm;

/// Errors loading, saving or editing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read or parsed.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    /// The config file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A key holds a value of the wrong shape.
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    /// A `section.key` name that does not exist.
    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),

    /// The logging subscriber could not be installed.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

/// Path of the user's config file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("modupdater")
        .join("config.ini")
}

impl UpdaterConfig {
    /// Load the user's config file, or defaults if it does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load a config file, or defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or holds an
    /// invalid value.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Save to the user's config file.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Save to a config file, creating its directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        self.to_ini().write_to_file(path).map_err(write_err)
    }

    /// Build a configuration from parsed INI, defaulting missing keys.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a value that does not parse.
    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let get = |section: &str, key: &str| {
            ini.get_from(Some(section), key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let network = &mut config.network;
        if let Some(v) = get("network", "mirrors") {
            network.mirrors = v
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("network", "default_mirror") {
            network.default_mirror = v.to_string();
        }
        if let Some(v) = get("network", "manifest_name") {
            network.manifest_name = v.to_string();
        }
        if let Some(v) = get("network", "notes_name") {
            network.notes_name = v.to_string();
        }
        if let Some(v) = get("network", "probe_timeout_secs") {
            network.probe_timeout = parse_secs("network.probe_timeout_secs", v)?;
        }
        if let Some(v) = get("network", "fetch_timeout_secs") {
            network.fetch_timeout = parse_secs("network.fetch_timeout_secs", v)?;
        }
        if let Some(v) = get("network", "connect_timeout_secs") {
            network.connect_timeout = parse_secs("network.connect_timeout_secs", v)?;
        }
        if let Some(v) = get("network", "read_timeout_secs") {
            network.read_timeout = parse_secs("network.read_timeout_secs", v)?;
        }
        if let Some(v) = get("network", "max_attempts") {
            network.max_attempts = parse_num("network.max_attempts", v)?;
            if network.max_attempts == 0 {
                return Err(invalid("network.max_attempts", v));
            }
        }
        if let Some(v) = get("network", "backoff_step_secs") {
            network.backoff_step = parse_secs("network.backoff_step_secs", v)?;
        }

        let paths = &mut config.paths;
        let path_keys: [(&str, &mut PathBuf); 9] = [
            ("work_dir", &mut paths.work_dir),
            ("version_file", &mut paths.version_file),
            ("data_version_file", &mut paths.data_version_file),
            ("os_build_file", &mut paths.os_build_file),
            ("app_dir", &mut paths.app_dir),
            ("system_root", &mut paths.system_root),
            ("data_root", &mut paths.data_root),
            ("pending_dir", &mut paths.pending_dir),
            ("boot_script", &mut paths.boot_script),
        ];
        for (key, slot) in path_keys {
            if let Some(v) = get("paths", key) {
                *slot = PathBuf::from(v);
            }
        }

        let policy = &mut config.policy;
        if let Some(v) = get("update", "language") {
            policy.language = v.to_string();
        }
        if let Some(v) = get("update", "build_date_cutoff") {
            policy.build_date_cutoff = if v.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(
                    NaiveDate::parse_from_str(v, "%Y-%m-%d")
                        .map_err(|_| invalid("update.build_date_cutoff", v))?,
                )
            };
        }
        if let Some(v) = get("update", "auto_apply") {
            policy.auto_apply = parse_bool("update.auto_apply", v)?;
        }
        if let Some(v) = get("update", "digest") {
            policy.digest = v
                .parse::<DigestAlgorithm>()
                .map_err(|_| invalid("update.digest", v))?;
        }

        if let Some(v) = get("logging", "directory") {
            config.logging.directory = PathBuf::from(v);
        }
        if let Some(v) = get("logging", "level") {
            config.logging.level = v.to_string();
        }

        Ok(config)
    }

    /// Render the configuration as INI.
    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        let n = &self.network;
        ini.with_section(Some("network"))
            .set("mirrors", n.mirrors.join(","))
            .set("default_mirror", n.default_mirror.as_str())
            .set("manifest_name", n.manifest_name.as_str())
            .set("notes_name", n.notes_name.as_str())
            .set("probe_timeout_secs", n.probe_timeout.as_secs().to_string())
            .set("fetch_timeout_secs", n.fetch_timeout.as_secs().to_string())
            .set("connect_timeout_secs", n.connect_timeout.as_secs().to_string())
            .set("read_timeout_secs", n.read_timeout.as_secs().to_string())
            .set("max_attempts", n.max_attempts.to_string())
            .set("backoff_step_secs", n.backoff_step.as_secs().to_string());

        let p = &self.paths;
        ini.with_section(Some("paths"))
            .set("work_dir", p.work_dir.display().to_string())
            .set("version_file", p.version_file.display().to_string())
            .set("data_version_file", p.data_version_file.display().to_string())
            .set("os_build_file", p.os_build_file.display().to_string())
            .set("app_dir", p.app_dir.display().to_string())
            .set("system_root", p.system_root.display().to_string())
            .set("data_root", p.data_root.display().to_string())
            .set("pending_dir", p.pending_dir.display().to_string())
            .set("boot_script", p.boot_script.display().to_string());

        let u = &self.policy;
        ini.with_section(Some("update"))
            .set("language", u.language.as_str())
            .set(
                "build_date_cutoff",
                u.build_date_cutoff
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "none".to_string()),
            )
            .set("auto_apply", u.auto_apply.to_string())
            .set("digest", u.digest.to_string());

        ini.with_section(Some("logging"))
            .set("directory", self.logging.directory.display().to_string())
            .set("level", self.logging.level.as_str());

        ini
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_num::<u64>(key, value).map(Duration::from_secs)
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}
