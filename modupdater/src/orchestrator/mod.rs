//! Update orchestration.
//!
//! [`UpdateOrchestrator`] drives one update run:
//!
//! 1. Fetch the manifest and read the local version markers
//! 2. Decide which tracks are offered (see [`decide`])
//! 3. Apply the application update in place, if offered
//! 4. Download, verify and stage the first eligible deferred track (system,
//!    then data overlay), arm the boot trigger and hand off to reboot
//!
//! Each track moves through the [`UpdateState`] machine. Expected failures
//! (network, digest, archive) end in [`UpdateOutcome::Failed`]; local errors
//! that cannot be retried are returned as [`UpdateError`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use modupdater::{UpdateOrchestrator, UpdaterConfig, ReqwestTransport, UserSignals, NullProgress};
//!
//! let config = UpdaterConfig::load()?;
//! let transport = Arc::new(ReqwestTransport::new(&config.network)?);
//! let mut orchestrator = UpdateOrchestrator::new(config, transport, Arc::new(UserSignals::new()));
//! let report = orchestrator.run(&NullProgress)?;
//! println!("{}", report.outcome());
//! ```

mod eligibility;
mod signals;
mod state;

pub use eligibility::{
    decide, evaluate, parse_build_date, LocalVersions, Offer, OfferReason, TrackDecision,
};
pub use signals::UserSignals;
pub use state::{InvalidTransition, TrackStates, UpdateEvent, UpdateState};

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::boot::{BootTrigger, RebootHandoff, SystemReboot};
use crate::checksum::ChecksumVerifier;
use crate::config::UpdaterConfig;
use crate::download::{ResumableDownloader, Sleeper, ThreadSleeper};
use crate::error::{UpdateError, UpdateResult};
use crate::extractor::{ArchiveExtractor, StagedExtractor};
use crate::manifest::{ManifestClient, UpdateManifest};
use crate::net::HttpTransport;
use crate::progress::{format_rate, ProgressSink, ProgressUpdate, ThroughputMeter};
use crate::track::Track;

/// How often a staged update checks for the user's decision.
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of one update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nothing to do.
    UpToDate,
    /// Installed; takes effect after a restart or reboot.
    AppliedPendingReboot,
    /// The attempt stopped. The reason is meant for the user.
    Failed { reason: String },
}

impl UpdateOutcome {
    /// Failure with a user-facing reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Whether the attempt stopped.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => write!(f, "up to date"),
            Self::AppliedPendingReboot => write!(f, "applied, pending reboot"),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// What a manifest check found.
#[derive(Debug, Clone)]
pub struct CheckReport {
    /// Manifest as fetched; empty when no mirror answered.
    pub manifest: UpdateManifest,
    /// Versions read from the device.
    pub local: LocalVersions,
    /// Tracks offered for this run.
    pub decision: TrackDecision,
}

/// Everything one run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub check: CheckReport,
    /// Outcome of every attempted track, in attempt order.
    pub attempts: Vec<(Track, UpdateOutcome)>,
    /// The reboot hand-off was invoked.
    pub reboot_requested: bool,
}

impl RunReport {
    /// Overall outcome: the first failure, else any applied update.
    pub fn outcome(&self) -> UpdateOutcome {
        let outcomes = || self.attempts.iter().map(|(_, o)| o);
        if let Some(failed) = outcomes().find(|o| o.is_failed()) {
            return failed.clone();
        }
        if outcomes().any(|o| *o == UpdateOutcome::AppliedPendingReboot) {
            return UpdateOutcome::AppliedPendingReboot;
        }
        UpdateOutcome::UpToDate
    }

    /// Outcome of `track`, if it was attempted.
    pub fn outcome_for(&self, track: Track) -> Option<&UpdateOutcome> {
        self.attempts
            .iter()
            .find(|(t, _)| *t == track)
            .map(|(_, o)| o)
    }
}

/// Drives manifest check, download, verification, extraction and apply.
pub struct UpdateOrchestrator<T: HttpTransport> {
    config: UpdaterConfig,
    manifest_client: ManifestClient<T>,
    downloader: ResumableDownloader<T>,
    verifier: ChecksumVerifier,
    extractor: Box<dyn ArchiveExtractor>,
    boot: BootTrigger,
    reboot: Box<dyn RebootHandoff>,
    signals: Arc<UserSignals>,
    sleeper: Arc<dyn Sleeper>,
    states: TrackStates,
}

impl<T: HttpTransport> UpdateOrchestrator<T> {
    /// Create an orchestrator that reboots the device after staging a
    /// deferred update.
    pub fn new(config: UpdaterConfig, transport: Arc<T>, signals: Arc<UserSignals>) -> Self {
        Self {
            manifest_client: ManifestClient::new(Arc::clone(&transport), &config.network),
            downloader: ResumableDownloader::new(transport, config.network.retry_policy()),
            verifier: ChecksumVerifier::new(config.policy.digest),
            extractor: Box::new(StagedExtractor::new()),
            boot: BootTrigger::new(&config.paths.boot_script),
            reboot: Box::new(SystemReboot),
            signals,
            sleeper: Arc::new(ThreadSleeper),
            states: TrackStates::default(),
            config,
        }
    }

    /// Replace the reboot hand-off.
    pub fn with_reboot(mut self, reboot: Box<dyn RebootHandoff>) -> Self {
        self.reboot = reboot;
        self
    }

    /// Replace the archive extractor.
    pub fn with_extractor(mut self, extractor: Box<dyn ArchiveExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replace the sleeper used for retries and confirmation polling.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.manifest_client = self.manifest_client.with_sleeper(Arc::clone(&sleeper));
        self.downloader = self.downloader.with_sleeper(Arc::clone(&sleeper));
        self.sleeper = sleeper;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Flags shared with the UI.
    pub fn signals(&self) -> &Arc<UserSignals> {
        &self.signals
    }

    /// Trigger for staged deferred updates.
    pub fn boot_trigger(&self) -> &BootTrigger {
        &self.boot
    }

    /// Current state of a track.
    pub fn state(&self, track: Track) -> UpdateState {
        self.states.get(track)
    }

    /// Fetch the manifest and decide what would be offered.
    ///
    /// Does not touch the state machine or the file system, so it can be
    /// repeated freely.
    pub fn check(&self) -> CheckReport {
        let manifest = self
            .manifest_client
            .fetch(Some(&self.config.policy.language));
        let local = LocalVersions::read(&self.config);
        let decision = decide(&manifest, &local, self.config.policy.build_date_cutoff);
        CheckReport {
            manifest,
            local,
            decision,
        }
    }

    /// Run one full update cycle.
    ///
    /// Tracks that failed in an earlier run on this orchestrator restart from
    /// the manifest check. Tracks already applied are left alone.
    ///
    /// # Arguments
    ///
    /// * `sink` - receives every state change and download progress
    ///
    /// # Errors
    ///
    /// Returns an error when a local failure stops the run: the disk is full,
    /// a directory is not writable, or the reboot hand-off fails. The track
    /// is left `Failed` and its downloaded archive is kept. Network and
    /// checksum failures are reported in the [`RunReport`] instead.
    pub fn run(&mut self, sink: &dyn ProgressSink) -> UpdateResult<RunReport> {
        for track in Track::ALL {
            let event = match self.states.get(track) {
                UpdateState::Idle => UpdateEvent::FetchManifest,
                UpdateState::Failed => UpdateEvent::Retry,
                _ => continue,
            };
            self.step(track, event, sink, UpdateState::CheckingManifest.label())?;
        }

        let result = self.run_checked(sink);
        self.settle_pending(sink);
        result
    }

    fn run_checked(&mut self, sink: &dyn ProgressSink) -> UpdateResult<RunReport> {
        let mut check = self.check();
        // An applied track keeps its old marker until the reboot.
        for offer in [&mut check.decision.application, &mut check.decision.deferred] {
            if offer
                .as_ref()
                .is_some_and(|o| self.states.get(o.track) == UpdateState::Applied)
            {
                *offer = None;
            }
        }

        if check.manifest.is_empty() {
            warn!("No manifest available, assuming no update");
        }
        for track in Track::ALL {
            let offered = check.decision.offers().any(|o| o.track == track);
            if !offered && self.states.get(track) == UpdateState::CheckingManifest {
                self.step(track, UpdateEvent::UpToDate, sink, "Up to date")?;
            }
        }

        let mut report = RunReport {
            check,
            attempts: Vec::new(),
            reboot_requested: false,
        };

        if let Some(offer) = report.check.decision.application.clone() {
            let outcome = self.attempt(&offer, sink)?;
            let failed = outcome.is_failed();
            report.attempts.push((offer.track, outcome));
            if failed {
                return Ok(report);
            }
        }

        if let Some(offer) = report.check.decision.deferred.clone() {
            let outcome = self.attempt(&offer, sink)?;
            let applied = outcome == UpdateOutcome::AppliedPendingReboot;
            report.attempts.push((offer.track, outcome));
            if applied {
                self.reboot.request_reboot()?;
                report.reboot_requested = true;
            }
        }

        info!(outcome = %report.outcome(), "Update run finished");
        Ok(report)
    }

    /// Return tracks still waiting on the manifest check to idle.
    fn settle_pending(&mut self, sink: &dyn ProgressSink) {
        for track in Track::ALL {
            if self.states.get(track) == UpdateState::CheckingManifest {
                if let Err(e) = self.step(track, UpdateEvent::Cancelled, sink, "Not attempted") {
                    warn!(error = %e, "Failed to settle track state");
                }
            }
        }
    }

    fn attempt(&mut self, offer: &Offer, sink: &dyn ProgressSink) -> UpdateResult<UpdateOutcome> {
        let track = offer.track;
        match self.attempt_stages(offer, sink) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(track = %track, error = %e, "Update aborted");
                if self.states.get(track).next(UpdateEvent::Abort).is_some() {
                    let _ = self.step(track, UpdateEvent::Abort, sink, e.to_string());
                }
                Err(e)
            }
        }
    }

    fn attempt_stages(
        &mut self,
        offer: &Offer,
        sink: &dyn ProgressSink,
    ) -> UpdateResult<UpdateOutcome> {
        let track = offer.track;

        if self.signals.cancel_requested() {
            info!(track = %track, "Update cancelled before download");
            self.step(track, UpdateEvent::Cancelled, sink, "Cancelled")?;
            return Ok(UpdateOutcome::failed("update cancelled"));
        }

        info!(
            track = %track,
            current = %offer.current,
            available = %offer.available,
            reason = ?offer.reason,
            "Update available"
        );
        self.step(
            track,
            UpdateEvent::UpdateAvailable,
            sink,
            format!("Downloading {} {}", track, offer.available),
        )?;

        let archive = self.config.paths.archive_path(track);
        let digest = self.config.paths.digest_path(track);
        self.prepare_work_files(offer)?;

        if !self.download(offer, &archive, &digest, sink)? {
            return self.fail(track, UpdateEvent::DownloadFailed, sink, "download failed");
        }
        self.step(track, UpdateEvent::DownloadSucceeded, sink, "Verifying")?;

        let record = self.verifier.verify_record(track, &archive, &digest);
        if !record.is_match() {
            warn!(
                track = %track,
                computed = %record.computed,
                expected = %record.expected,
                "Checksum mismatch"
            );
            return self.fail(track, UpdateEvent::DigestMismatch, sink, "checksum mismatch");
        }
        self.step(track, UpdateEvent::DigestMatched, sink, "Extracting")?;

        let target = if track.is_deferred() {
            self.reset_pending()?;
            self.config.paths.pending_dir.clone()
        } else {
            self.config.paths.live_root(track).clone()
        };
        if !self.extract(track, &archive, &target, sink)? {
            return self.fail(track, UpdateEvent::ExtractionFailed, sink, "extraction failed");
        }
        self.step(track, UpdateEvent::Extracted, sink, "Ready to apply")?;

        if !self.await_confirmation(track) {
            return self.fail(track, UpdateEvent::Declined, sink, "update declined");
        }

        if track.is_deferred() {
            self.boot
                .arm(&self.config.paths.pending_dir, self.config.paths.live_root(track))?;
        }
        self.step(track, UpdateEvent::Confirmed, sink, "Applied")?;
        self.remove_work_files(track);

        info!(track = %track, version = %offer.available, "Update applied");
        Ok(UpdateOutcome::AppliedPendingReboot)
    }

    /// Download the companion digest, then the archive.
    fn download(
        &self,
        offer: &Offer,
        archive: &Path,
        digest: &Path,
        sink: &dyn ProgressSink,
    ) -> UpdateResult<bool> {
        match &offer.digest_url {
            Some(url) => {
                if !self.downloader.try_download(url, digest, &mut |_, _, _| {})? {
                    return Ok(false);
                }
            }
            // Verification will fail on the missing digest.
            None => warn!(track = %offer.track, "No checksum published for update"),
        }

        let label = format!("Downloading {} {}", offer.track, offer.available);
        let mut meter = ThroughputMeter::default();
        let mut on_block = |done: u64, _block: u64, total: u64| {
            let rate = meter.record(Instant::now(), done);
            let percent = (total > 0).then(|| (done as f64 / total as f64 * 100.0).min(100.0));
            let label = match rate {
                Some(rate) => format!("{} ({})", label, format_rate(rate)),
                None => label.clone(),
            };
            sink.report(ProgressUpdate {
                track: offer.track,
                state: UpdateState::Downloading,
                label,
                percent,
                bytes_per_sec: rate,
            });
        };

        self.downloader
            .try_download(&offer.download_url, archive, &mut on_block)
    }

    fn extract(
        &self,
        track: Track,
        archive: &Path,
        target: &Path,
        sink: &dyn ProgressSink,
    ) -> UpdateResult<bool> {
        let mut on_entry = |done: usize, total: usize, name: &str| {
            sink.report(ProgressUpdate {
                track,
                state: UpdateState::Extracting,
                label: format!("Extracting {}", name),
                percent: (total > 0).then(|| done as f64 / total as f64 * 100.0),
                bytes_per_sec: None,
            });
        };
        self.extractor.try_extract(archive, target, &mut on_entry)
    }

    fn await_confirmation(&self, track: Track) -> bool {
        if !track.is_deferred() || self.config.policy.auto_apply {
            return true;
        }

        info!(track = %track, "Waiting for confirmation");
        loop {
            if self.signals.take_confirmed() {
                return true;
            }
            if self.signals.cancel_requested() {
                return false;
            }
            self.sleeper.sleep(CONFIRM_POLL_INTERVAL);
        }
    }

    fn step(
        &mut self,
        track: Track,
        event: UpdateEvent,
        sink: &dyn ProgressSink,
        label: impl Into<String>,
    ) -> UpdateResult<UpdateState> {
        let state = self.states.apply(track, event)?;
        debug!(track = %track, event = ?event, state = %state, "State transition");
        sink.report(ProgressUpdate::stage(track, state, label));
        Ok(state)
    }

    fn fail(
        &mut self,
        track: Track,
        event: UpdateEvent,
        sink: &dyn ProgressSink,
        reason: &str,
    ) -> UpdateResult<UpdateOutcome> {
        warn!(track = %track, reason, "Update failed");
        self.step(track, event, sink, reason)?;
        Ok(UpdateOutcome::failed(reason))
    }

    /// Create the work directory and drop work files that cannot be reused.
    ///
    /// A partial archive is only resumed when it was started for the same
    /// URL and the same offered version. The marker holds both, one per line.
    fn prepare_work_files(&self, offer: &Offer) -> UpdateResult<()> {
        let track = offer.track;
        let paths = &self.config.paths;
        fs::create_dir_all(&paths.work_dir).map_err(|e| UpdateError::CreateDirFailed {
            path: paths.work_dir.clone(),
            source: e,
        })?;

        let source = paths.source_path(track);
        let marker = format!("{}\n{}\n", offer.download_url, offer.available);
        let previous = fs::read_to_string(&source).unwrap_or_default();
        if previous != marker {
            let archive = paths.archive_path(track);
            if archive.exists() {
                info!(
                    track = %track,
                    version = %offer.available,
                    "Discarding partial download from another source or version"
                );
                remove_if_exists(&archive)?;
            }
            fs::write(&source, marker).map_err(|e| UpdateError::io(&source, e))?;
        }

        remove_if_exists(&paths.digest_path(track))
    }

    fn remove_work_files(&self, track: Track) {
        if let Err(e) = self.cleanup(track) {
            warn!(track = %track, error = %e, "Failed to remove work files");
        }
    }

    /// Empty the pending directory, disarming any trigger that points at it.
    fn reset_pending(&self) -> UpdateResult<()> {
        if self.boot.disarm()? {
            info!("Disarmed previous boot trigger");
        }
        let pending = &self.config.paths.pending_dir;
        match fs::remove_dir_all(pending) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UpdateError::io(pending, e)),
        }
    }

    /// Remove a track's downloaded work files.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing work file cannot be removed.
    pub fn cleanup(&self, track: Track) -> UpdateResult<()> {
        let paths = &self.config.paths;
        remove_if_exists(&paths.archive_path(track))?;
        remove_if_exists(&paths.digest_path(track))?;
        remove_if_exists(&paths.source_path(track))
    }

    /// Drop a staged deferred update that has not been applied yet.
    ///
    /// Returns whether anything was staged.
    ///
    /// # Errors
    ///
    /// Returns an error if the boot script or the pending directory cannot be
    /// removed.
    pub fn discard_pending(&self) -> UpdateResult<bool> {
        let armed = self.boot.disarm()?;
        let staged = self.config.paths.pending_dir.exists();
        self.reset_pending()?;
        Ok(armed || staged)
    }
}

fn remove_if_exists(path: &Path) -> UpdateResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UpdateError::io(path, e)),
    }
}
