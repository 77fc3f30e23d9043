// Error taxonomy. Collection and perf errors are carried as data past the
// safe-sample adapter; query errors reach the caller; everything else is anyhow.

use thiserror::Error;

/// One collector failed this tick. Isolated by the safe-sample adapter.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("{collector}: {reason}")]
    Failed { collector: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("collector task join: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CollectionError {
    pub fn failed(collector: &str, reason: impl std::fmt::Display) -> Self {
        CollectionError::Failed {
            collector: collector.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Counter backend missing or exited. Reported as `available: false`, never raised.
#[derive(Debug, Error)]
pub enum PerfError {
    #[error("perf binary not found: {0}")]
    BinaryMissing(String),

    #[error("failed to launch perf: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("perf exited immediately ({0})")]
    ExitedImmediately(String),

    #[error("perf output pipe unavailable")]
    NoOutputPipe,
}

/// Request validation failures at the history query boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Invalid metric type: {0}")]
    InvalidMetricType(String),

    #[error("Invalid time range: start must not be after end")]
    InvalidRange,

    #[error("Invalid comparison target: {0}")]
    InvalidCompareTo(String),
}

/// History engine failure: bad request or store I/O.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("history store: {0}")]
    Store(#[from] anyhow::Error),
}
