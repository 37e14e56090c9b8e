//! Client for the primary service's load and status endpoints.

use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use tracing::{debug, info, warn};

use loadshift_core::{
    AuthorityState, LoadReport, LoadSample, PrimaryConfig, StatusChange, StatusCommand,
};

use crate::endpoint::Endpoint;
use crate::error::{ProbeError, ProbeResult};

const USER_AGENT_VALUE: &str = "loadshift/0.1";

/// Talks to the primary: samples load and flips the authority flag.
#[derive(Debug, Clone)]
pub struct PrimaryClient {
    load: Endpoint,
    status: Endpoint,
    timeout: Duration,
}

impl PrimaryClient {
    pub fn new(load_url: &str, status_url: &str, timeout: Duration) -> ProbeResult<Self> {
        Ok(Self {
            load: Endpoint::parse(load_url)?,
            status: Endpoint::parse(status_url)?,
            timeout,
        })
    }

    pub fn from_config(config: &PrimaryConfig) -> ProbeResult<Self> {
        Self::new(&config.load_url, &config.status_url, config.request_timeout())
    }

    /// Query the load endpoint once.
    ///
    /// Any non-2xx answer, malformed body, connection failure, or timeout
    /// is an error.
    pub async fn sample_load(&self) -> ProbeResult<LoadSample> {
        let (status, body) = exchange(&self.load, Method::GET, None, self.timeout).await?;
        if !status.is_success() {
            return Err(ProbeError::Status {
                url: self.load.to_string(),
                status: status.as_u16(),
            });
        }

        let report: LoadReport =
            serde_json::from_slice(&body).map_err(|source| ProbeError::Decode {
                url: self.load.to_string(),
                source,
            })?;

        debug!(rate = report.rate, state = %report.state, "load sampled");
        Ok(LoadSample::from_report(report))
    }

    /// Ask the primary to switch the authority flag.
    ///
    /// Succeeds only when the primary answers 2xx and confirms the
    /// requested status.
    pub async fn set_authority(&self, state: AuthorityState) -> ProbeResult<StatusChange> {
        let requested = state.as_command();
        let payload = serde_json::to_vec(&StatusCommand { status: requested }).map_err(
            |source| ProbeError::Decode {
                url: self.status.to_string(),
                source,
            },
        )?;

        let (status, body) = exchange(
            &self.status,
            Method::POST,
            Some(Bytes::from(payload)),
            self.timeout,
        )
        .await?;

        if !status.is_success() {
            return Err(ProbeError::Status {
                url: self.status.to_string(),
                status: status.as_u16(),
            });
        }

        let change: StatusChange =
            serde_json::from_slice(&body).map_err(|source| ProbeError::Decode {
                url: self.status.to_string(),
                source,
            })?;

        if change.current_status != requested {
            warn!(
                requested = ?requested,
                current = ?change.current_status,
                "primary did not apply status command"
            );
            return Err(ProbeError::Rejected {
                url: self.status.to_string(),
                requested,
                current: change.current_status,
            });
        }

        info!(
            previous = ?change.previous_status,
            current = ?change.current_status,
            authority = %state,
            "authority flag set"
        );
        Ok(change)
    }
}

/// Perform one HTTP/1 exchange, bounded by `timeout` end to end.
pub(crate) async fn exchange(
    endpoint: &Endpoint,
    method: Method,
    body: Option<Bytes>,
    timeout: Duration,
) -> ProbeResult<(StatusCode, Bytes)> {
    match tokio::time::timeout(timeout, exchange_inner(endpoint, method, body)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout {
            url: endpoint.to_string(),
            timeout,
        }),
    }
}

async fn exchange_inner(
    endpoint: &Endpoint,
    method: Method,
    body: Option<Bytes>,
) -> ProbeResult<(StatusCode, Bytes)> {
    let url = endpoint.to_string();

    let stream = tokio::net::TcpStream::connect(endpoint.address())
        .await
        .map_err(|source| ProbeError::Connect {
            address: endpoint.address().to_string(),
            source,
        })?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|source| ProbeError::Http {
            url: url.clone(),
            source,
        })?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut builder = http::Request::builder()
        .method(method)
        .uri(endpoint.path())
        .header(HOST, endpoint.host())
        .header(USER_AGENT, USER_AGENT_VALUE);
    if body.is_some() {
        builder = builder.header(CONTENT_TYPE, "application/json");
    }
    let req = builder
        .body(Full::new(body.unwrap_or_default()))
        .map_err(|source| ProbeError::Build {
            url: url.clone(),
            source,
        })?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|source| ProbeError::Http {
            url: url.clone(),
            source,
        })?;

    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|source| ProbeError::Http { url, source })?
        .to_bytes();

    Ok((status, bytes))
}
