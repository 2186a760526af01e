//! Verify command - check archives against their companion digests.

use std::path::PathBuf;

use clap::Args;
use console::style;
use modupdater::checksum::digests_match;
use modupdater::{ChecksumVerifier, DigestAlgorithm, Track};

use super::Context;
use crate::error::CliError;

/// Arguments for the verify command.
#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Archive to check (defaults to every downloaded track archive)
    #[arg(requires = "digest_file")]
    pub file: Option<PathBuf>,

    /// Companion file holding the expected digest
    pub digest_file: Option<PathBuf>,
}

/// Run the verify command.
pub fn run(ctx: &Context, args: VerifyArgs) -> Result<(), CliError> {
    let verifier = ChecksumVerifier::new(ctx.config.policy.digest);

    if let (Some(file), Some(digest_file)) = (&args.file, &args.digest_file) {
        let computed = verifier.digest(file);
        let expected = ChecksumVerifier::expected_digest(digest_file);
        let matched = digests_match(&computed, &expected);
        print_result(
            &file.display().to_string(),
            verifier.algorithm(),
            &computed,
            &expected,
            matched,
        );
        return if matched {
            Ok(())
        } else {
            Err(CliError::Failed(format!("{} failed verification", file.display())))
        };
    }

    let paths = &ctx.config.paths;
    let mut checked = 0;
    let mut mismatched = 0;
    for track in Track::ALL {
        let archive = paths.archive_path(track);
        if !archive.exists() {
            continue;
        }
        checked += 1;
        let record = verifier.verify_record(track, &archive, &paths.digest_path(track));
        print_result(
            &track.to_string(),
            record.algorithm,
            &record.computed,
            &record.expected,
            record.is_match(),
        );
        if !record.is_match() {
            mismatched += 1;
        }
    }

    if checked == 0 {
        println!("No downloaded archives to verify.");
        return Ok(());
    }
    if mismatched == 0 {
        Ok(())
    } else {
        Err(CliError::Failed(format!(
            "{} archive(s) failed verification",
            mismatched
        )))
    }
}

fn print_result(
    name: &str,
    algorithm: DigestAlgorithm,
    computed: &str,
    expected: &str,
    matched: bool,
) {
    if matched {
        println!("{} {:<14} {} {}", style("✓").green(), name, algorithm, computed);
    } else {
        println!(
            "{} {:<14} computed {} expected {}",
            style("✗").red(),
            name,
            or_none(computed),
            or_none(expected)
        );
    }
}

fn or_none(digest: &str) -> &str {
    if digest.is_empty() {
        "(none)"
    } else {
        digest
    }
}
