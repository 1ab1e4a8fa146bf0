//! Error types for the metrics subsystem.

use std::path::PathBuf;

use crate::stage::Stage;
use crate::turn::TurnId;

/// Errors that can occur while recording or exporting session metrics.
///
/// None of these are fatal to a conversation: stage errors cost one data
/// point, export errors leave the session's metrics in memory for a retry.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// A stage was reported twice for the same turn with differing timestamps.
    #[error("stage {stage} already recorded for turn {turn_id} at {existing:.3}s (attempted {attempted:.3}s)")]
    DuplicateStage {
        turn_id: TurnId,
        stage: Stage,
        existing: f64,
        attempted: f64,
    },

    /// The reported timestamp is NaN or infinite.
    #[error("invalid timestamp {timestamp} for stage {stage} of turn {turn_id}")]
    InvalidTimestamp {
        turn_id: TurnId,
        stage: Stage,
        timestamp: f64,
    },

    /// A stage arrived for a turn that was interrupted before reaching it.
    #[error("stage {stage} rejected for interrupted turn {turn_id}")]
    StaleStage { turn_id: TurnId, stage: Stage },

    /// No turn with this identifier exists in the session.
    #[error("unknown turn: {0}")]
    UnknownTurn(TurnId),

    /// The export destination could not be written.
    #[error("failed to export metrics to {}: {source}", path.display())]
    ExportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MetricsError {
    /// Wraps an I/O failure against `path` as an export error.
    pub(crate) fn export(path: impl Into<PathBuf>, source: impl Into<std::io::Error>) -> Self {
        Self::ExportIo {
            path: path.into(),
            source: source.into(),
        }
    }
}
