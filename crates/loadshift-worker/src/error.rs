//! Error types for the worker process manager.

use std::time::Duration;

use thiserror::Error;

use crate::manager::WorkerExit;

/// Result type alias for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid readiness url: {0}")]
    ReadyUrl(#[from] loadshift_probe::ProbeError),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker exited before becoming ready ({exit})")]
    ExitedEarly { exit: WorkerExit },

    #[error("worker not ready after {timeout:?}")]
    NotReady { timeout: Duration },
}
