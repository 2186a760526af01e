//! Per-track update state machine.
//!
//! ```text
//! Idle ──fetch──▶ CheckingManifest ──available──▶ Downloading ──ok──▶ Verifying
//!  ▲                │        │                        │                 │
//!  └──up to date────┘        └──cancelled──▶ Idle     │ failed          │ match
//!                                                     ▼                 ▼
//! CheckingManifest ◀──retry── Failed ◀──mismatch─────────────────── Extracting
//!                               ▲                                       │ ok
//!                               └──declined── ReadyToApply ◀────────────┘
//!                                                  │ confirmed
//!                                                  ▼
//!                                               Applied
//! ```
//!
//! Every non-terminal state can also abort into `Failed` when a local error
//! ends the attempt. Any other pairing is rejected with [`InvalidTransition`].

use std::fmt;

use thiserror::Error;

use crate::track::Track;

/// Where a track is in its update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateState {
    #[default]
    Idle,
    CheckingManifest,
    Downloading,
    Verifying,
    Extracting,
    ReadyToApply,
    Applied,
    Failed,
}

/// Something that happened during an update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateEvent {
    FetchManifest,
    UpdateAvailable,
    UpToDate,
    Cancelled,
    DownloadSucceeded,
    DownloadFailed,
    DigestMatched,
    DigestMismatch,
    Extracted,
    ExtractionFailed,
    Confirmed,
    Declined,
    Retry,
    /// A local error ended the attempt.
    Abort,
}

/// A transition the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition for {track} update: {event:?} in state {from:?}")]
pub struct InvalidTransition {
    pub track: Track,
    pub from: UpdateState,
    pub event: UpdateEvent,
}

impl UpdateState {
    /// Every state, in lifecycle order.
    pub const ALL: [UpdateState; 8] = [
        Self::Idle,
        Self::CheckingManifest,
        Self::Downloading,
        Self::Verifying,
        Self::Extracting,
        Self::ReadyToApply,
        Self::Applied,
        Self::Failed,
    ];

    /// Next state for `event`, or `None` if the pairing is not allowed.
    pub fn next(self, event: UpdateEvent) -> Option<UpdateState> {
        use UpdateEvent as E;
        use UpdateState as S;

        let next = match (self, event) {
            (S::Idle, E::FetchManifest) => S::CheckingManifest,
            (S::CheckingManifest, E::UpdateAvailable) => S::Downloading,
            (S::CheckingManifest, E::UpToDate) => S::Idle,
            (S::CheckingManifest, E::Cancelled) => S::Idle,
            (S::Downloading, E::DownloadSucceeded) => S::Verifying,
            (S::Downloading, E::DownloadFailed) => S::Failed,
            (S::Verifying, E::DigestMatched) => S::Extracting,
            (S::Verifying, E::DigestMismatch) => S::Failed,
            (S::Extracting, E::Extracted) => S::ReadyToApply,
            (S::Extracting, E::ExtractionFailed) => S::Failed,
            (S::ReadyToApply, E::Confirmed) => S::Applied,
            (S::ReadyToApply, E::Declined) => S::Failed,
            (S::Failed, E::Retry) => S::CheckingManifest,
            (
                S::CheckingManifest
                | S::Downloading
                | S::Verifying
                | S::Extracting
                | S::ReadyToApply,
                E::Abort,
            ) => S::Failed,
            _ => return None,
        };
        Some(next)
    }

    /// States reachable in one step.
    pub fn successors(self) -> &'static [UpdateState] {
        use UpdateState as S;
        match self {
            S::Idle => &[S::CheckingManifest],
            S::CheckingManifest => &[S::Downloading, S::Idle, S::Failed],
            S::Downloading => &[S::Verifying, S::Failed],
            S::Verifying => &[S::Extracting, S::Failed],
            S::Extracting => &[S::ReadyToApply, S::Failed],
            S::ReadyToApply => &[S::Applied, S::Failed],
            S::Failed => &[S::CheckingManifest],
            S::Applied => &[],
        }
    }

    /// No further transitions are possible.
    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    /// Human-readable name for progress display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::CheckingManifest => "Checking for updates",
            Self::Downloading => "Downloading",
            Self::Verifying => "Verifying",
            Self::Extracting => "Extracting",
            Self::ReadyToApply => "Ready to apply",
            Self::Applied => "Applied",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Current state of every track. Owned by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackStates {
    states: [UpdateState; 3],
}

impl TrackStates {
    fn index(track: Track) -> usize {
        match track {
            Track::Application => 0,
            Track::System => 1,
            Track::DataOverlay => 2,
        }
    }

    /// Current state of `track`.
    pub fn get(&self, track: Track) -> UpdateState {
        self.states[Self::index(track)]
    }

    /// Apply `event` to `track`, leaving the state unchanged on error.
    pub fn apply(
        &mut self,
        track: Track,
        event: UpdateEvent,
    ) -> Result<UpdateState, InvalidTransition> {
        let from = self.get(track);
        let to = from.next(event).ok_or(InvalidTransition { track, from, event })?;
        self.states[Self::index(track)] = to;
        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENTS: [UpdateEvent; 14] = [
        UpdateEvent::FetchManifest,
        UpdateEvent::UpdateAvailable,
        UpdateEvent::UpToDate,
        UpdateEvent::Cancelled,
        UpdateEvent::DownloadSucceeded,
        UpdateEvent::DownloadFailed,
        UpdateEvent::DigestMatched,
        UpdateEvent::DigestMismatch,
        UpdateEvent::Extracted,
        UpdateEvent::ExtractionFailed,
        UpdateEvent::Confirmed,
        UpdateEvent::Declined,
        UpdateEvent::Retry,
        UpdateEvent::Abort,
    ];

    #[test]
    fn test_every_transition_is_a_listed_successor() {
        for state in UpdateState::ALL {
            for event in EVENTS {
                if let Some(next) = state.next(event) {
                    assert!(
                        state.successors().contains(&next),
                        "{:?} --{:?}--> {:?} not listed",
                        state,
                        event,
                        next
                    );
                }
            }
        }
    }

    #[test]
    fn test_every_successor_is_reachable() {
        for state in UpdateState::ALL {
            for successor in state.successors() {
                assert!(
                    EVENTS.iter().any(|e| state.next(*e) == Some(*successor)),
                    "{:?} -> {:?} unreachable",
                    state,
                    successor
                );
            }
        }
    }

    #[test]
    fn test_happy_path() {
        let mut states = TrackStates::default();
        let path = [
            (UpdateEvent::FetchManifest, UpdateState::CheckingManifest),
            (UpdateEvent::UpdateAvailable, UpdateState::Downloading),
            (UpdateEvent::DownloadSucceeded, UpdateState::Verifying),
            (UpdateEvent::DigestMatched, UpdateState::Extracting),
            (UpdateEvent::Extracted, UpdateState::ReadyToApply),
            (UpdateEvent::Confirmed, UpdateState::Applied),
        ];
        for (event, expected) in path {
            assert_eq!(states.apply(Track::System, event).unwrap(), expected);
        }
        assert!(states.get(Track::System).is_terminal());
        assert_eq!(states.get(Track::DataOverlay), UpdateState::Idle);
    }

    #[test]
    fn test_invalid_transition_keeps_state() {
        let mut states = TrackStates::default();
        let err = states
            .apply(Track::Application, UpdateEvent::Confirmed)
            .unwrap_err();
        assert_eq!(err.from, UpdateState::Idle);
        assert_eq!(err.event, UpdateEvent::Confirmed);
        assert_eq!(states.get(Track::Application), UpdateState::Idle);
        assert!(err.to_string().contains("application"));
    }

    #[test]
    fn test_failed_retries_from_manifest_check() {
        let mut states = TrackStates::default();
        states.apply(Track::System, UpdateEvent::FetchManifest).unwrap();
        states.apply(Track::System, UpdateEvent::UpdateAvailable).unwrap();
        states.apply(Track::System, UpdateEvent::DownloadFailed).unwrap();
        assert_eq!(
            states.apply(Track::System, UpdateEvent::Retry).unwrap(),
            UpdateState::CheckingManifest
        );
    }

    #[test]
    fn test_abort_only_from_active_states() {
        assert_eq!(UpdateState::Idle.next(UpdateEvent::Abort), None);
        assert_eq!(UpdateState::Applied.next(UpdateEvent::Abort), None);
        assert_eq!(UpdateState::Failed.next(UpdateEvent::Abort), None);
        assert_eq!(
            UpdateState::Extracting.next(UpdateEvent::Abort),
            Some(UpdateState::Failed)
        );
    }
}
