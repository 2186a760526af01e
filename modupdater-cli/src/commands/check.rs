//! Check command - show installed and available versions.

use std::sync::Arc;

use console::style;
use modupdater::{Track, UserSignals};

use super::Context;
use crate::error::CliError;

/// Run the check command.
pub fn run(ctx: &Context) -> Result<(), CliError> {
    let orchestrator = ctx.orchestrator(ctx.config.clone(), Arc::new(UserSignals::new()))?;

    println!("Checking for updates...");
    let report = orchestrator.check();

    if report.manifest.is_empty() {
        println!("{}", style("Update server unreachable; no update information.").yellow());
        return Ok(());
    }

    println!();
    println!("{:<14} {:<16} {:<16}", "TRACK", "INSTALLED", "AVAILABLE");
    for track in Track::ALL {
        let offered = report.decision.offers().any(|o| o.track == track);
        let marker = if offered {
            style("update available").green().to_string()
        } else {
            String::new()
        };
        println!(
            "{:<14} {:<16} {:<16} {}",
            track.to_string(),
            report.local.version(track),
            report.manifest.version(track),
            marker
        );
    }
    println!();

    if report.decision.is_empty() {
        println!("Everything is up to date.");
        return Ok(());
    }

    if let Some(notes) = report.manifest.release_notes() {
        println!("{}", style("Release notes").bold());
        println!("{}", notes.trim_end());
        println!();
    }
    println!("Run 'modupdater update' to install.");
    Ok(())
}
