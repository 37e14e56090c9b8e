//! loadshift-supervisor — moves the redirect duty between the primary
//! service and a dedicated worker process as load rises and falls.
//!
//! # Architecture
//!
//! ```text
//! Supervisor
//!   ├── poll loop task (one tick at a time)
//!   │   ├── LoadSource::sample()        → LoadSample
//!   │   ├── ScalingPolicy::evaluate()   → ScaleAction
//!   │   └── HandoffCoordinator
//!   │         ├── AuthoritySwitch (primary's status endpoint)
//!   │         └── WorkerControl   (worker process)
//!   └── status watch (read without waiting on a tick)
//! ```
//!
//! # Handoff ordering
//!
//! Scale-up starts the worker and waits for it to be ready before the
//! primary is told to stand down. Scale-down tells the primary to take
//! the duty back, lets in-flight requests settle, and only then stops
//! the worker. The flag therefore never says "separated" while no
//! worker exists, but both sides may briefly serve during scale-down.
//!
//! That overlap requires the delegated duty to be idempotent and free
//! of side effects per request. A redirect lookup is; anything that
//! writes state is not and must not be delegated through this crate.
//!
//! # Errors
//!
//! Failed load samples count against `max_consecutive_errors`; hitting
//! it tears everything down and ends monitoring (see
//! [`Supervisor::wait`]). A poll task that dies any other way, such as
//! a panic, also ends monitoring and is reported through `wait()`. A
//! failed handoff step is rolled back and retried on the next tick
//! without touching that budget.

pub mod collab;
pub mod error;
pub mod handoff;
pub mod supervisor;

pub use collab::{AuthoritySwitch, LoadSource, WorkerControl};
pub use error::{FatalError, HandoffError, SupervisorError, TickError};
pub use handoff::{HandoffCoordinator, HandoffPhase};
pub use supervisor::{Supervisor, SupervisorStatus};
