//! Error types for the supervisor.

use serde::Serialize;
use thiserror::Error;

use loadshift_core::{AuthorityState, ConfigError};
use loadshift_probe::ProbeError;
use loadshift_scale::ScaleAction;
use loadshift_worker::WorkerError;

/// A handoff step failed and the transition was rolled back.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("worker failed to start: {0}")]
    WorkerStart(#[source] WorkerError),

    #[error("switching authority to {target} failed: {source}")]
    Authority {
        target: AuthorityState,
        #[source]
        source: ProbeError,
    },
}

/// Why a single tick did not complete.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("load sampling failed: {0}")]
    Sampling(#[source] ProbeError),

    #[error("{action} aborted: {source}")]
    Handoff {
        action: ScaleAction,
        #[source]
        source: HandoffError,
    },
}

/// The condition that ended monitoring on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FatalError {
    #[error("load sampling failed {failures} times in a row (last error: {last_error})")]
    ErrorBudgetExhausted { failures: u32, last_error: String },

    /// The poll task went away without being stopped, e.g. on a panic.
    #[error("{reason}")]
    PollTaskDied { reason: String },
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("load sampling failed {failures} times in a row (last error: {last_error})")]
    ErrorBudgetExhausted { failures: u32, last_error: String },

    #[error("poll task died: {reason}")]
    PollTaskDied { reason: String },

    #[error("invalid scaling config: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid primary endpoint: {0}")]
    Primary(#[from] ProbeError),

    #[error("invalid worker config: {0}")]
    Worker(#[from] WorkerError),
}

impl From<FatalError> for SupervisorError {
    fn from(fatal: FatalError) -> Self {
        match fatal {
            FatalError::ErrorBudgetExhausted {
                failures,
                last_error,
            } => SupervisorError::ErrorBudgetExhausted {
                failures,
                last_error,
            },
            FatalError::PollTaskDied { reason } => SupervisorError::PollTaskDied { reason },
        }
    }
}
