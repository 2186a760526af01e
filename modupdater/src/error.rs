//! Error types for the update agent.
//!
//! Expected failure modes (network trouble, digest mismatch, bad archives,
//! unreachable manifests) are reported by the components as plain success
//! signals and never show up here. `UpdateError` is reserved for the local
//! failures that must terminate an update attempt.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::orchestrator::InvalidTransition;

/// Result type for update operations.
pub type UpdateResult<T> = Result<T, UpdateError>;

/// Errors that terminate an update attempt.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// A local file-system operation failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// The state machine was asked for a transition it does not allow.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// The reboot hand-off could not be started.
    #[error("reboot failed: {0}")]
    RebootFailed(String),
}

impl UpdateError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Whether a local I/O error should terminate the attempt instead of being
/// reported as an ordinary failure.
///
/// A full disk or a permission problem will not go away on retry, and
/// swallowing it would leave the device in an unexplained state.
pub fn is_fatal_local(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::StorageFull | io::ErrorKind::PermissionDenied
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = UpdateError::io(
            "/tmp/update.dep",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/update.dep"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error;

        let err = UpdateError::io("/x", io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_fatal_local_kinds() {
        assert!(is_fatal_local(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(is_fatal_local(&io::Error::from(io::ErrorKind::StorageFull)));
        assert!(!is_fatal_local(&io::Error::from(io::ErrorKind::UnexpectedEof)));
        assert!(!is_fatal_local(&io::Error::from(io::ErrorKind::InvalidData)));
    }
}
