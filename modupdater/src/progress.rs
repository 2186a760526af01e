//! Progress reporting to the UI.
//!
//! The orchestrator pushes [`ProgressUpdate`]s into a [`ProgressSink`]
//! supplied by the caller. Download speed is computed here, on the caller's
//! side of the downloader, from a one-second sample.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::orchestrator::UpdateState;
use crate::track::Track;

/// Default sampling window for throughput.
pub const THROUGHPUT_WINDOW: Duration = Duration::from_secs(1);

/// A single progress notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub track: Track,
    pub state: UpdateState,
    /// Human-readable description of the current step.
    pub label: String,
    /// Completion of the current step, when it can be known.
    pub percent: Option<f64>,
    /// Download speed in bytes per second, when sampled.
    pub bytes_per_sec: Option<f64>,
}

impl ProgressUpdate {
    /// A stage change with no measurable progress.
    pub fn stage(track: Track, state: UpdateState, label: impl Into<String>) -> Self {
        Self {
            track,
            state,
            label: label.into(),
            percent: None,
            bytes_per_sec: None,
        }
    }
}

/// Receives progress updates.
///
/// Implementations must be cheap: they are called from the update thread
/// after every downloaded block and extracted entry.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Discards all updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _update: ProgressUpdate) {}
}

/// Keeps every update in memory.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl RecordingProgress {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every update received so far.
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.lock().clone()
    }

    /// Distinct states in the order they were first reported for `track`.
    pub fn states(&self, track: Track) -> Vec<UpdateState> {
        let mut states: Vec<UpdateState> = Vec::new();
        for update in self.updates.lock().iter().filter(|u| u.track == track) {
            if states.last() != Some(&update.state) {
                states.push(update.state);
            }
        }
        states
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, update: ProgressUpdate) {
        self.updates.lock().push(update);
    }
}

/// Samples download speed over a fixed window.
///
/// The rate is recomputed once per window from the bytes received since the
/// previous sample; between samples the last rate is returned.
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    window: Duration,
    sample_start: Option<(Instant, u64)>,
    rate: Option<f64>,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new(THROUGHPUT_WINDOW)
    }
}

impl ThroughputMeter {
    /// Meter sampling once per `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            sample_start: None,
            rate: None,
        }
    }

    /// Record the running byte count at `now` and return the current rate.
    pub fn record(&mut self, now: Instant, total_bytes: u64) -> Option<f64> {
        match self.sample_start {
            None => self.sample_start = Some((now, total_bytes)),
            Some((started, bytes)) => {
                let elapsed = now.saturating_duration_since(started);
                if elapsed >= self.window {
                    let delta = total_bytes.saturating_sub(bytes);
                    self.rate = Some(delta as f64 / elapsed.as_secs_f64());
                    self.sample_start = Some((now, total_bytes));
                }
            }
        }
        self.rate
    }

    /// Last computed rate.
    pub fn rate(&self) -> Option<f64> {
        self.rate
    }
}

/// Format a byte rate for display, e.g. `1.5 MiB/s`.
pub fn format_rate(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut value = bytes_per_sec;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
