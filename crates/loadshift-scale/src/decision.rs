//! Threshold decisions and authority reconciliation.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use loadshift_core::{AuthorityState, LoadSample, ScalingConfig};

/// What the supervisor should do after a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScaleAction {
    /// Start the worker and hand it the delegated duty.
    ScaleUp,
    /// Take the duty back and stop the worker.
    ScaleDown,
    NoAction,
}

impl fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScaleAction::ScaleUp => "scale-up",
            ScaleAction::ScaleDown => "scale-down",
            ScaleAction::NoAction => "no-action",
        })
    }
}

/// The threshold policy for one supervisor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingPolicy {
    load_threshold: f64,
}

impl ScalingPolicy {
    pub fn new(load_threshold: f64) -> Self {
        Self { load_threshold }
    }

    pub fn from_config(config: &ScalingConfig) -> Self {
        Self::new(config.load_threshold)
    }

    pub fn load_threshold(&self) -> f64 {
        self.load_threshold
    }

    /// Decide from a raw rate and the worker's liveness.
    ///
    /// The reported authority state does not influence the action;
    /// mismatches are handled by [`ScalingPolicy::reconcile`].
    pub fn decide(&self, rate: f64, worker_running: bool) -> ScaleAction {
        let overloaded = rate > self.load_threshold;
        let action = match (overloaded, worker_running) {
            (true, false) => ScaleAction::ScaleUp,
            (false, true) => ScaleAction::ScaleDown,
            _ => ScaleAction::NoAction,
        };

        debug!(
            rate,
            threshold = self.load_threshold,
            worker_running,
            %action,
            "scaling decision"
        );
        action
    }

    /// Decide from a full sample.
    pub fn evaluate(&self, sample: &LoadSample, worker_running: bool) -> ScaleAction {
        self.decide(sample.rate, worker_running)
    }

    /// The flag to re-assert when the primary disagrees with the
    /// worker's liveness, or `None` when they agree.
    ///
    /// Only meaningful after a `NoAction` decision: a transition resets
    /// the flag itself.
    pub fn reconcile(&self, sample: &LoadSample, worker_running: bool) -> Option<AuthorityState> {
        let expected = expected_authority(worker_running);
        (sample.reported_state != expected).then_some(expected)
    }
}

/// The authority flag consistent with the worker's liveness.
pub fn expected_authority(worker_running: bool) -> AuthorityState {
    if worker_running {
        AuthorityState::Separated
    } else {
        AuthorityState::Integrated
    }
}
