//! Handoff coordinator — moves authority between primary and worker.
//!
//! Each transition runs to completion or rolls back before the tick
//! that started it ends.
//!
//! ```text
//! Integrated ──ScaleUp──► ScalingUp ──ok──► Separated
//!     ▲                      │ fail             │ ScaleDown
//!     ├──────────────────────┘                  ▼
//!     └───────────────ok─────────────────── ScalingDown ──fail──► Separated
//! ```

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use loadshift_core::AuthorityState;
use loadshift_scale::ScaleAction;

use crate::collab::{AuthoritySwitch, WorkerControl};
use crate::error::HandoffError;

/// Where the coordinator is in the handoff state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffPhase {
    /// Primary is authoritative, no worker.
    Integrated,
    ScalingUp,
    /// Worker is authoritative, primary's copy of the duty is off.
    Separated,
    ScalingDown,
}

impl From<AuthorityState> for HandoffPhase {
    fn from(state: AuthorityState) -> Self {
        match state {
            AuthorityState::Integrated => HandoffPhase::Integrated,
            AuthorityState::Separated => HandoffPhase::Separated,
        }
    }
}

/// Sequences the two-sided state change between the primary's
/// authority flag and the worker process.
pub struct HandoffCoordinator<A, W> {
    switch: A,
    worker: W,
    /// Pause between reclaiming the flag and stopping the worker.
    settle_delay: Duration,
    phase: HandoffPhase,
}

impl<A: AuthoritySwitch, W: WorkerControl> HandoffCoordinator<A, W> {
    pub fn new(switch: A, worker: W, settle_delay: Duration) -> Self {
        Self {
            switch,
            worker,
            settle_delay,
            phase: HandoffPhase::Integrated,
        }
    }

    pub fn phase(&self) -> HandoffPhase {
        self.phase
    }

    /// Liveness of the worker, checked fresh on every call.
    pub fn worker_running(&mut self) -> bool {
        let running = self.worker.worker_alive();
        if !running && self.phase == HandoffPhase::Separated {
            warn!("worker is not running while it holds authority");
        }
        running
    }

    /// Liveness without the authority check, for status snapshots.
    pub fn worker_alive(&mut self) -> bool {
        self.worker.worker_alive()
    }

    /// Carry out a scaling action.
    pub async fn execute(&mut self, action: ScaleAction) -> Result<(), HandoffError> {
        match action {
            ScaleAction::ScaleUp => self.scale_up().await,
            ScaleAction::ScaleDown => self.scale_down().await,
            ScaleAction::NoAction => Ok(()),
        }
    }

    /// Record the flag the primary reported when no change was needed.
    pub fn observe(&mut self, reported: AuthorityState) {
        let phase = HandoffPhase::from(reported);
        if phase != self.phase {
            debug!(from = ?self.phase, to = ?phase, "phase synced to reported authority");
            self.phase = phase;
        }
    }

    /// Push the flag back in line with the worker's liveness.
    pub async fn reassert(&mut self, target: AuthorityState) -> Result<(), HandoffError> {
        warn!(%target, "primary disagrees with worker liveness, re-asserting authority");
        self.switch
            .switch_to(target)
            .await
            .map_err(|source| HandoffError::Authority { target, source })?;
        self.phase = HandoffPhase::from(target);
        Ok(())
    }

    /// Worker first, flag second.
    async fn scale_up(&mut self) -> Result<(), HandoffError> {
        self.phase = HandoffPhase::ScalingUp;
        info!("scaling up: starting worker");

        let pid = match self.worker.spawn_worker().await {
            Ok(pid) => pid,
            Err(e) => {
                // The flag was never touched.
                self.phase = HandoffPhase::Integrated;
                return Err(HandoffError::WorkerStart(e));
            }
        };

        if let Err(source) = self.switch.switch_to(AuthorityState::Separated).await {
            warn!(pid, error = %source, "primary refused to stand down, stopping worker");
            // The command may have been applied even though the reply was
            // lost; reclaim the flag before the worker goes away.
            if let Err(e) = self.switch.switch_to(AuthorityState::Integrated).await {
                debug!(error = %e, "rollback of authority flag failed");
            }
            self.worker.stop_worker().await;
            self.phase = HandoffPhase::Integrated;
            return Err(HandoffError::Authority {
                target: AuthorityState::Separated,
                source,
            });
        }

        self.phase = HandoffPhase::Separated;
        info!(pid, "scaled up: worker is authoritative");
        Ok(())
    }

    /// Flag first, then settle, then stop the worker.
    async fn scale_down(&mut self) -> Result<(), HandoffError> {
        self.phase = HandoffPhase::ScalingDown;
        info!("scaling down: reclaiming authority");

        if let Err(source) = self.switch.switch_to(AuthorityState::Integrated).await {
            self.phase = HandoffPhase::Separated;
            return Err(HandoffError::Authority {
                target: AuthorityState::Integrated,
                source,
            });
        }

        tokio::time::sleep(self.settle_delay).await;

        let exit = self.worker.stop_worker().await;
        self.phase = HandoffPhase::Integrated;
        match exit {
            Some(exit) => info!(%exit, "scaled down: primary is authoritative"),
            None => info!("scaled down: primary is authoritative, worker was already gone"),
        }
        Ok(())
    }

    /// Unconditional return to an inert, integrated state.
    ///
    /// Reclaims the flag whenever it might not be integrated, then stops
    /// the worker. Errors are logged and swallowed.
    pub async fn teardown(&mut self) {
        let running = self.worker.worker_alive();
        if (running || self.phase != HandoffPhase::Integrated)
            && let Err(e) = self.switch.switch_to(AuthorityState::Integrated).await
        {
            warn!(error = %e, phase = ?self.phase, "could not reclaim authority during teardown");
        }

        if let Some(exit) = self.worker.stop_worker().await {
            info!(%exit, "worker stopped during teardown");
        }
        self.phase = HandoffPhase::Integrated;
    }
}
