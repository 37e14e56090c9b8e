//! loadshift-scale — the scaling decision policy.
//!
//! Maps a load sample and the worker's liveness to an action. Pure: no
//! I/O, no clocks, no state between calls.
//!
//! # Policy
//!
//! ```text
//! rate >  threshold and no worker   → ScaleUp
//! rate <= threshold and worker up   → ScaleDown
//! otherwise                         → NoAction
//! ```
//!
//! The strict/inclusive split means a rate sitting exactly on the
//! threshold always resolves to "integrated" and never flaps.
//!
//! When no action is needed, `reconcile()` compares the flag the
//! primary reports with the flag the worker's liveness implies, so a
//! crashed worker or a restarted primary is corrected on the next tick.

pub mod decision;

pub use decision::{ScaleAction, ScalingPolicy, expected_authority};
