//! Engine error taxonomy.
//!
//! Transient I/O (source polls, sink writes) is retried internally; the
//! variants here are what surfaces to the caller once local recovery is
//! exhausted. Corruption and unsupported configuration are hard failures.

use std::time::Duration;

use crate::types::{IncrementId, SourceId};

/// Errors surfaced by the engine and its components.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A source kept failing after exponential-backoff retries.
    /// The increment did not advance offsets.
    #[error("source '{source_id}' unavailable after {attempts} attempts: {reason}")]
    SourceUnavailable {
        source_id: SourceId,
        attempts: u32,
        reason: String,
    },

    /// A published checkpoint could not be read back.
    #[error("checkpoint {increment_id} is corrupt: {reason}")]
    CheckpointCorrupt {
        increment_id: IncrementId,
        reason: String,
    },

    /// The configured output mode cannot run with the rest of the
    /// configuration. Rejected at start-up, never discovered mid-stream.
    #[error("unsupported output mode: {0}")]
    UnsupportedOutputMode(String),

    /// The sink rejected an increment's rows even after retries with the
    /// same increment id. The engine stops rather than skip the commit.
    #[error("sink write failed for increment {increment_id} after {attempts} attempts: {reason}")]
    SinkWriteFailure {
        increment_id: IncrementId,
        attempts: u32,
        reason: String,
    },

    /// A stop request expired while an increment was still committing.
    /// The in-flight commit is never aborted; the engine still stops once
    /// it completes.
    #[error("stop request timed out after {0:?}")]
    StopTimeout(Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("snapshot codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("checkpoint storage i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Outcome of waiting for the engine to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The engine reached `Stopped` (or `Failed`) within the wait.
    Completed,
    /// The engine was still running when the wait expired.
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::SourceUnavailable {
            source_id: "events".to_string(),
            attempts: 5,
            reason: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("events"));
        assert!(err.to_string().contains("5 attempts"));

        let err = EngineError::UnsupportedOutputMode(
            "complete mode requires a watermark".to_string(),
        );
        assert!(err.to_string().starts_with("unsupported output mode"));
    }
}
