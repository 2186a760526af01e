//! Terminal progress display and the apply confirmation prompt.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use modupdater::{ProgressSink, ProgressUpdate, Track, UpdateState, UserSignals};
use parking_lot::Mutex;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% | {msg}";

/// Renders orchestrator progress on the terminal.
///
/// When prompting is enabled, reaching `ReadyToApply` on a deferred track
/// asks the user whether to apply. The question runs on its own input
/// thread and answers through [`UserSignals`]; the orchestrator polls them.
pub struct ConsoleProgress {
    bar: ProgressBar,
    signals: Arc<UserSignals>,
    prompt: bool,
    last: Mutex<Option<(Track, UpdateState)>>,
    input: Mutex<Option<JoinHandle<()>>>,
}

impl ConsoleProgress {
    /// Create a display; `prompt` enables the apply confirmation.
    pub fn new(signals: Arc<UserSignals>, prompt: bool) -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        Self {
            bar,
            signals,
            prompt,
            last: Mutex::new(None),
            input: Mutex::new(None),
        }
    }

    /// Clear the bar once the run is over.
    ///
    /// A prompt still open after a cancelled run is left detached; it only
    /// ever touches the signal flags.
    pub fn finish(&self) {
        self.reap_prompt();
        self.input.lock().take();
        self.bar.finish_and_clear();
    }

    /// Ask on the input thread. Only the signal flags cross back.
    fn confirm_apply(&self, track: Track) {
        let mut input = self.input.lock();
        if input.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        // Keep the bar from redrawing over the question.
        self.bar.set_draw_target(ProgressDrawTarget::hidden());
        let signals = Arc::clone(&self.signals);
        let spawned = thread::Builder::new()
            .name("confirm-prompt".to_string())
            .spawn(move || ask_to_apply(track, &signals));
        match spawned {
            Ok(handle) => *input = Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to start confirmation prompt; declining");
                self.signals.request_cancel();
            }
        }
    }

    /// Reap an answered prompt and show the bar again.
    fn reap_prompt(&self) {
        let mut input = self.input.lock();
        if !input.as_ref().is_some_and(|handle| handle.is_finished()) {
            return;
        }
        if let Some(handle) = input.take() {
            if handle.join().is_err() {
                tracing::warn!("Confirmation prompt thread panicked");
            }
        }
        self.bar.set_draw_target(ProgressDrawTarget::stderr());
    }
}

fn ask_to_apply(track: Track, signals: &UserSignals) {
    let answer = Confirm::new()
        .with_prompt(format!("Apply the {} update on next reboot?", track))
        .default(true)
        .interact();
    match answer {
        Ok(true) => signals.request_confirm(),
        Ok(false) => signals.request_cancel(),
        Err(e) => {
            tracing::warn!(error = %e, "Confirmation prompt failed; declining");
            signals.request_cancel();
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn report(&self, update: ProgressUpdate) {
        self.reap_prompt();
        let changed = {
            let mut last = self.last.lock();
            let current = Some((update.track, update.state));
            let changed = *last != current;
            *last = current;
            changed
        };

        if changed {
            self.bar.reset();
            self.bar.println(format!(
                "{} {}: {}",
                style("==>").cyan(),
                update.track,
                update.label
            ));
        }

        if let Some(percent) = update.percent {
            self.bar.set_position(percent.clamp(0.0, 100.0) as u64);
        }
        self.bar.set_message(update.label.clone());

        if changed
            && self.prompt
            && update.state == UpdateState::ReadyToApply
            && update.track.is_deferred()
        {
            self.confirm_apply(update.track);
        }
    }
}
