//! loadshift-worker — lifecycle of the delegated-duty worker process.
//!
//! The `WorkerManager` owns at most one child process. Spawning waits
//! for readiness (an HTTP probe, or a fixed startup delay when the
//! worker has no probe). Stopping sends SIGTERM and force-kills after a
//! grace window.
//!
//! # Architecture
//!
//! ```text
//! WorkerManager
//!   └── WorkerHandle (pid, exit watch, stop request channel)
//!         ├── exit observer task: owns the Child, reaps it, logs the exit
//!         └── stdout / stderr pumps → tracing
//! ```
//!
//! An exit the manager did not ask for is only logged by the observer;
//! `is_running()` reports it the next time the supervisor looks.

pub mod error;
pub mod manager;

pub use error::{WorkerError, WorkerResult};
pub use manager::{ReadinessPolicy, WorkerExit, WorkerManager, WorkerSpec};
