//! ModUpdater CLI - Command-line interface
//!
//! Checks for, downloads and stages updates for the application, the system
//! image and the data overlay.

mod commands;
mod error;
mod progress;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use console::style;

use commands::config::ConfigCommands;
use commands::update::UpdateArgs;
use commands::verify::VerifyArgs;
use commands::Context;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "modupdater", version, about = "Over-the-air updater for system mods")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Mirror log output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the configuration file with default settings
    Init,

    /// Check the manifest and show available updates
    Check,

    /// Download, verify and stage available updates
    Update(UpdateArgs),

    /// Verify downloaded archives against their checksums
    Verify(VerifyArgs),

    /// Remove downloaded work files
    Clean {
        /// Also drop a staged update waiting for reboot
        #[arg(long)]
        pending: bool,
    },

    /// View or change configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.unwrap_or_else(modupdater::config::config_file_path);

    match cli.command {
        Commands::Init => commands::init::run(&config_path),
        Commands::Config(command) => commands::config::run(command, &config_path),
        Commands::Check => commands::check::run(&Context::load(&config_path, cli.verbose)?),
        Commands::Update(args) => {
            commands::update::run(&Context::load(&config_path, cli.verbose)?, args)
        }
        Commands::Verify(args) => {
            commands::verify::run(&Context::load(&config_path, cli.verbose)?, args)
        }
        Commands::Clean { pending } => {
            commands::clean::run(&Context::load(&config_path, cli.verbose)?, pending)
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", style("error:").red().bold(), e);
        process::exit(e.exit_code());
    }
}
