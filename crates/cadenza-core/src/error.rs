//! Engine error types

use thiserror::Error;

use crate::types::InstanceKind;

/// Errors that can occur during engine operations
///
/// Every operation reports failure through this taxonomy; validation
/// failures are raised before any native resource is touched, and
/// resource-level failures are translated at the collaborator boundary
/// with cleanup already performed on the failing path.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Control operation issued before a session was prepared
    #[error("no prepared session")]
    NotPrepared,

    /// Pause issued while not playing
    #[error("player is not playing")]
    NotPlaying,

    /// Out-of-range or malformed input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Source file does not exist
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The decoder does not recognize the container or codec
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The file was recognized but could not be read to the end
    #[error("corrupted file: {0}")]
    CorruptedFile(String),

    /// Recording permission has not been granted
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Recorder operation issued with no active or paused session
    #[error("no active recording")]
    NoActiveRecording,

    /// Recording output path is unusable
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// An instance with this key is already registered
    #[error("duplicate {kind} key: {key}")]
    DuplicateKey { kind: InstanceKind, key: String },

    /// Instance ceiling reached, or an exclusive job slot is busy
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The operation was cancelled cooperatively
    #[error("operation cancelled")]
    Cancelled,

    /// Allocation failure for a large output buffer
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A platform audio session could not be opened or activated
    #[error("session setup failed: {0}")]
    SessionSetupFailed(String),

    /// Aggregate result of a bulk stop where some instances failed
    #[error("{failed} of {total} {kind} instances failed to stop")]
    StopAllFailed {
        kind: InstanceKind,
        failed: usize,
        total: usize,
        /// Per-key failure messages
        details: Vec<String>,
    },
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Helper for validation failures
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = EngineError::DuplicateKey {
            kind: InstanceKind::Player,
            key: "deck-a".into(),
        };
        assert_eq!(err.to_string(), "duplicate player key: deck-a");

        let err = EngineError::StopAllFailed {
            kind: InstanceKind::Recorder,
            failed: 1,
            total: 3,
            details: vec!["mic-1: no active recording".into()],
        };
        assert_eq!(err.to_string(), "1 of 3 recorder instances failed to stop");
    }
}
