//! Error types for outbound HTTP calls.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors that can occur while calling the primary or the worker.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connection to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build request for {url}: {source}")]
    Build {
        url: String,
        #[source]
        source: http::Error,
    },

    #[error("http error talking to {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: hyper::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{url} reported status {current:?} after being asked for {requested:?}")]
    Rejected {
        url: String,
        requested: loadshift_core::DutyStatus,
        current: loadshift_core::DutyStatus,
    },

    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
}
