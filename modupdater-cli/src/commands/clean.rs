//! Clean command - remove downloaded work files.

use std::sync::Arc;

use modupdater::{Track, UserSignals};

use super::Context;
use crate::error::CliError;

/// Run the clean command.
pub fn run(ctx: &Context, pending: bool) -> Result<(), CliError> {
    let orchestrator = ctx.orchestrator(ctx.config.clone(), Arc::new(UserSignals::new()))?;

    for track in Track::ALL {
        orchestrator.cleanup(track)?;
    }
    println!("Removed downloaded files from {}", ctx.config.paths.work_dir.display());

    if pending {
        if orchestrator.discard_pending()? {
            println!("Discarded the staged update; nothing is applied on next boot.");
        } else {
            println!("No staged update to discard.");
        }
    }
    Ok(())
}
