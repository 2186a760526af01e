//! `section.key` addressing for configuration values.
//!
//! Values are read and written through the INI rendering so that the same
//! validation applies to `config set` as to loading the file.

use std::str::FromStr;

use super::{ConfigError, UpdaterConfig};

/// A single configuration setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigKey {
    section: &'static str,
    key: &'static str,
}

const KEYS: &[ConfigKey] = &[
    ConfigKey::new("network", "mirrors"),
    ConfigKey::new("network", "default_mirror"),
    ConfigKey::new("network", "manifest_name"),
    ConfigKey::new("network", "notes_name"),
    ConfigKey::new("network", "probe_timeout_secs"),
    ConfigKey::new("network", "fetch_timeout_secs"),
    ConfigKey::new("network", "connect_timeout_secs"),
    ConfigKey::new("network", "read_timeout_secs"),
    ConfigKey::new("network", "max_attempts"),
    ConfigKey::new("network", "backoff_step_secs"),
    ConfigKey::new("paths", "work_dir"),
    ConfigKey::new("paths", "version_file"),
    ConfigKey::new("paths", "data_version_file"),
    ConfigKey::new("paths", "os_build_file"),
    ConfigKey::new("paths", "app_dir"),
    ConfigKey::new("paths", "system_root"),
    ConfigKey::new("paths", "data_root"),
    ConfigKey::new("paths", "pending_dir"),
    ConfigKey::new("paths", "boot_script"),
    ConfigKey::new("update", "language"),
    ConfigKey::new("update", "build_date_cutoff"),
    ConfigKey::new("update", "auto_apply"),
    ConfigKey::new("update", "digest"),
    ConfigKey::new("logging", "directory"),
    ConfigKey::new("logging", "level"),
];

impl ConfigKey {
    const fn new(section: &'static str, key: &'static str) -> Self {
        Self { section, key }
    }

    /// Every known key, grouped by section.
    pub fn all() -> &'static [ConfigKey] {
        KEYS
    }

    /// Section name.
    pub fn section(&self) -> &'static str {
        self.section
    }

    /// Key name within the section.
    pub fn key_name(&self) -> &'static str {
        self.key
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section, self.key)
    }

    /// Current value as it would be written to the file.
    pub fn get(&self, config: &UpdaterConfig) -> String {
        config
            .to_ini()
            .get_from(Some(self.section), self.key)
            .unwrap_or_default()
            .to_string()
    }

    /// Set a value, validating it.
    ///
    /// # Errors
    ///
    /// Returns an error and leaves `config` unchanged if `value` is invalid
    /// for this key.
    pub fn set(&self, config: &mut UpdaterConfig, value: &str) -> Result<(), ConfigError> {
        let mut ini = config.to_ini();
        ini.with_section(Some(self.section)).set(self.key, value);
        let updated = UpdaterConfig::from_ini(&ini)?;
        // Values not persisted in the file survive the round trip.
        let app_version = std::mem::take(&mut config.policy.app_version);
        *config = updated;
        config.policy.app_version = app_version;
        Ok(())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (section, key) = s
            .split_once('.')
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))?;
        KEYS.iter()
            .copied()
            .find(|k| k.section == section && k.key == key)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}
