//! Retry policy for network operations.

use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

/// How a network operation handles transient failures.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// No retries - fail after the first attempt.
    #[default]
    None,

    /// Fixed delay between attempts.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay between attempts.
        delay: Duration,
    },

    /// Delay grows linearly: retry `n` waits `n * step`.
    Linear {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay unit.
        step: Duration,
    },
}

impl RetryPolicy {
    /// Creates a fixed retry policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Creates a linear backoff policy.
    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self::Linear { max_attempts, step }
    }

    /// Calculates the delay after a failed attempt.
    ///
    /// `attempt` is 1-based and names the attempt that just failed. Returns
    /// `None` when no attempts remain.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed {
                max_attempts,
                delay,
            } => (attempt < *max_attempts).then_some(*delay),
            Self::Linear { max_attempts, step } => {
                (attempt < *max_attempts).then(|| step.saturating_mul(attempt))
            }
        }
    }

    /// Returns the maximum number of attempts for this policy.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::Linear { max_attempts, .. } => *max_attempts,
        }
    }
}

/// Waits between attempts.
///
/// Injected so tests can run the retry loop without real delays.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Sleeper with nothing recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}
