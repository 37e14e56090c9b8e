//! Parsed `http://host:port/path` targets.

use std::fmt;

use crate::error::{ProbeError, ProbeResult};

/// A plain-HTTP endpoint split into the pieces a raw connection needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `host:port` to connect to. Port defaults to 80.
    address: String,
    /// Value for the `Host` header.
    host: String,
    /// Path and query, always starting with `/`.
    path: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> ProbeResult<Self> {
        let uri: http::Uri = url.parse().map_err(|e: http::uri::InvalidUri| {
            ProbeError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        if uri.scheme_str() != Some("http") {
            return Err(ProbeError::InvalidUrl {
                url: url.to_string(),
                reason: "only http:// is supported".to_string(),
            });
        }

        let authority = uri.authority().ok_or_else(|| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        })?;

        let port = authority.port_u16().unwrap_or(80);
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string());

        Ok(Self {
            address: format!("{}:{port}", authority.host()),
            host: authority.as_str().to_string(),
            path,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}{}", self.host, self.path)
    }
}
