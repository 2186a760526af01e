//! Update command - download, verify and stage updates.

use std::sync::Arc;

use clap::Args;
use console::{style, Term};
use modupdater::{ManualReboot, Track, UpdateOutcome, UserSignals};

use super::Context;
use crate::error::CliError;
use crate::progress::ConsoleProgress;

/// Arguments for the update command.
#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Apply without asking for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Stage the update but leave the reboot to the user
    #[arg(long)]
    pub no_reboot: bool,
}

/// Run the update command.
pub fn run(ctx: &Context, args: UpdateArgs) -> Result<(), CliError> {
    let mut config = ctx.config.clone();
    if args.yes {
        config.policy.auto_apply = true;
    }
    let prompt = !config.policy.auto_apply;

    let signals = Arc::new(UserSignals::new());
    let handler_signals = Arc::clone(&signals);
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Cancel requested; stopping before the next download.");
        handler_signals.request_cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let mut orchestrator = ctx.orchestrator(config, Arc::clone(&signals))?;
    if args.no_reboot {
        orchestrator = orchestrator.with_reboot(Box::new(ManualReboot));
    }

    let sink = ConsoleProgress::new(Arc::clone(&signals), prompt);
    let report = orchestrator.run(&sink)?;
    sink.finish();

    for (track, outcome) in &report.attempts {
        match outcome {
            UpdateOutcome::AppliedPendingReboot if *track == Track::Application => {
                println!(
                    "{} Application updated to {}. Restart modupdater to use it.",
                    style("✓").green(),
                    report.check.manifest.version(*track)
                );
            }
            UpdateOutcome::AppliedPendingReboot => {
                println!(
                    "{} {} update {} staged; it is applied on the next boot.",
                    style("✓").green(),
                    track,
                    report.check.manifest.version(*track)
                );
            }
            UpdateOutcome::Failed { reason } => {
                println!("{} {} update: {}", style("✗").red(), track, reason);
            }
            UpdateOutcome::UpToDate => {}
        }
    }

    match report.outcome() {
        UpdateOutcome::UpToDate => {
            println!("Everything is up to date.");
            Ok(())
        }
        UpdateOutcome::AppliedPendingReboot => {
            if report.reboot_requested && !args.no_reboot {
                println!("Rebooting...");
            } else if report.attempts.iter().any(|(t, _)| t.is_deferred()) {
                println!("Reboot the device to finish the update.");
            }
            Ok(())
        }
        UpdateOutcome::Failed { reason } => {
            if !args.yes {
                acknowledge(&reason);
            }
            Err(CliError::Failed(reason))
        }
    }
}

/// Hold the failure on screen until the user presses Enter.
fn acknowledge(reason: &str) {
    let term = Term::stderr();
    if !term.is_term() {
        return;
    }
    let _ = term.write_line(&format!(
        "{} {}. Press Enter to continue.",
        style("Update failed:").red().bold(),
        reason
    ));
    if let Err(e) = term.read_line() {
        tracing::debug!(error = %e, "Could not read acknowledgment");
    }
}
