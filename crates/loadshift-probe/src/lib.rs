//! loadshift-probe — talking HTTP to the primary service and the worker.
//!
//! Every call is a one-shot HTTP/1 request over a fresh TCP connection,
//! wrapped in a timeout so an unresponsive peer can never stall the
//! supervisor's poll loop.
//!
//! # Endpoints
//!
//! | Method | Endpoint | Body | Response |
//! |---|---|---|---|
//! | GET | load | — | `{ rate, state: "integrated" \| "separated" }` |
//! | POST | status | `{ status: "active" \| "inactive" }` | `{ previousStatus, currentStatus }` |
//! | GET | worker readiness | — | any 2xx |

pub mod client;
pub mod endpoint;
pub mod error;
pub mod readiness;

pub use client::PrimaryClient;
pub use endpoint::Endpoint;
pub use error::{ProbeError, ProbeResult};
pub use readiness::{Readiness, http_probe};
