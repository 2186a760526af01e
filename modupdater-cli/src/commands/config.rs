//! `config` subcommands: read and edit the INI file by `section.key`.

use std::fmt::Write as _;
use std::path::Path;

use clap::Subcommand;
use modupdater::{ConfigKey, UpdaterConfig};

use crate::error::CliError;

const NOT_SET: &str = "(not set)";

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print one value
    Get {
        /// Setting as section.key, e.g. update.auto_apply
        key: String,
    },

    /// Validate and store one value
    Set {
        /// Setting as section.key, e.g. network.max_attempts
        key: String,

        /// New value
        value: String,
    },

    /// Print every setting, grouped by section
    List,

    /// Print where the configuration file lives
    Path,
}

impl ConfigCommands {
    /// The key a get or set addresses.
    fn key(&self) -> Option<Result<ConfigKey, CliError>> {
        let name = match self {
            Self::Get { key } | Self::Set { key, .. } => key,
            Self::List | Self::Path => return None,
        };
        Some(name.parse().map_err(|_| {
            CliError::Config(format!(
                "no setting named '{}' (see 'modupdater config list')",
                name
            ))
        }))
    }
}

/// Run a config subcommand against `config_path`.
pub fn run(command: ConfigCommands, config_path: &Path) -> Result<(), CliError> {
    if let ConfigCommands::Path = command {
        println!("{}", config_path.display());
        return Ok(());
    }

    let key = command.key().transpose()?;
    let mut config = UpdaterConfig::load_from(config_path)?;
    match (command, key) {
        (ConfigCommands::Set { value, .. }, Some(key)) => {
            key.set(&mut config, &value)?;
            config.save_to(config_path)?;
            println!("{} = {}", key.name(), value);
        }
        (ConfigCommands::Get { .. }, Some(key)) => println!("{}", shown(&key.get(&config))),
        _ => print!("{}", render_table(&config)),
    }
    Ok(())
}

fn shown(value: &str) -> &str {
    if value.is_empty() {
        NOT_SET
    } else {
        value
    }
}

/// One `[section]` block per section, values aligned within the block.
fn render_table(config: &UpdaterConfig) -> String {
    let mut out = String::new();
    for (index, section) in ConfigKey::all()
        .chunk_by(|a, b| a.section() == b.section())
        .enumerate()
    {
        if index > 0 {
            out.push('\n');
        }
        let width = section.iter().map(|k| k.key_name().len()).max().unwrap_or(0);
        let _ = writeln!(out, "[{}]", section[0].section());
        for key in section {
            let _ = writeln!(
                out,
                "  {:<width$}  {}",
                key.key_name(),
                shown(&key.get(config)),
                width = width
            );
        }
    }
    out
}
