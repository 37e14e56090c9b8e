//! Worker readiness probe.

use std::time::Duration;

use http::Method;
use tracing::debug;

use crate::client::exchange;
use crate::endpoint::Endpoint;

/// Result of a single readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The endpoint returned 2xx.
    Ready,
    /// The endpoint answered with a non-2xx status.
    NotReady,
    /// The probe could not be executed (connection error or timeout).
    Unreachable,
}

/// Perform an HTTP readiness probe against an endpoint.
pub async fn http_probe(endpoint: &Endpoint, timeout: Duration) -> Readiness {
    match exchange(endpoint, Method::GET, None, timeout).await {
        Ok((status, _)) if status.is_success() => Readiness::Ready,
        Ok((status, _)) => {
            debug!(%status, %endpoint, "readiness probe non-2xx");
            Readiness::NotReady
        }
        Err(e) => {
            debug!(error = %e, %endpoint, "readiness probe failed");
            Readiness::Unreachable
        }
    }
}
