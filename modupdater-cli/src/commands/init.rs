//! Init command - write a default configuration file.

use std::path::Path;

use modupdater::UpdaterConfig;

use crate::error::CliError;

/// Run the init command.
pub fn run(config_path: &Path) -> Result<(), CliError> {
    if config_path.exists() {
        println!("Configuration file already exists: {}", config_path.display());
        println!("Use 'modupdater config list' to review it.");
        return Ok(());
    }

    let config = UpdaterConfig::default();
    config.save_to(config_path)?;

    println!("Configuration file: {}", config_path.display());
    println!();
    println!("Edit this file to add mirrors or change device paths.");
    Ok(())
}
