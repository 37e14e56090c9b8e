//! The collaborators the supervisor drives, as traits.
//!
//! Production wiring uses `PrimaryClient` for both primary-facing traits
//! and `WorkerManager` for the worker.

use std::future::Future;

use loadshift_core::{AuthorityState, LoadSample, StatusChange};
use loadshift_probe::{PrimaryClient, ProbeResult};
use loadshift_worker::{WorkerExit, WorkerManager, WorkerResult};

/// Reports the primary's current load and authority flag.
pub trait LoadSource: Send + Sync + 'static {
    fn sample(&self) -> impl Future<Output = ProbeResult<LoadSample>> + Send;
}

/// The primary's authority flag command.
pub trait AuthoritySwitch: Send + Sync + 'static {
    fn switch_to(
        &self,
        state: AuthorityState,
    ) -> impl Future<Output = ProbeResult<StatusChange>> + Send;
}

/// Start, stop, and liveness of the worker process.
///
/// `spawn_worker` resolves only once the worker is ready. Both
/// `spawn_worker` and `stop_worker` must be idempotent.
pub trait WorkerControl: Send + 'static {
    fn spawn_worker(&mut self) -> impl Future<Output = WorkerResult<u32>> + Send;

    fn stop_worker(&mut self) -> impl Future<Output = Option<WorkerExit>> + Send;

    fn worker_alive(&mut self) -> bool;
}

impl LoadSource for PrimaryClient {
    fn sample(&self) -> impl Future<Output = ProbeResult<LoadSample>> + Send {
        self.sample_load()
    }
}

impl AuthoritySwitch for PrimaryClient {
    fn switch_to(
        &self,
        state: AuthorityState,
    ) -> impl Future<Output = ProbeResult<StatusChange>> + Send {
        self.set_authority(state)
    }
}

impl WorkerControl for WorkerManager {
    fn spawn_worker(&mut self) -> impl Future<Output = WorkerResult<u32>> + Send {
        self.spawn()
    }

    fn stop_worker(&mut self) -> impl Future<Output = Option<WorkerExit>> + Send {
        self.stop()
    }

    fn worker_alive(&mut self) -> bool {
        self.is_running()
    }
}
