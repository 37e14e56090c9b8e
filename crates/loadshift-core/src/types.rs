//! Shared types used across loadshift crates.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Which side currently owns the delegated duty.
///
/// `Integrated` means the primary handles it itself; `Separated` means
/// the worker process is authoritative and the primary's copy is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityState {
    Integrated,
    Separated,
}

impl AuthorityState {
    /// The command-endpoint status that produces this state.
    pub fn as_command(self) -> DutyStatus {
        match self {
            AuthorityState::Integrated => DutyStatus::Active,
            AuthorityState::Separated => DutyStatus::Inactive,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AuthorityState::Integrated => "integrated",
            AuthorityState::Separated => "separated",
        }
    }
}

impl fmt::Display for AuthorityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Status of the primary's own copy of the delegated duty, as spoken by
/// the status command endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DutyStatus {
    Active,
    Inactive,
}

impl DutyStatus {
    pub fn authority(self) -> AuthorityState {
        match self {
            DutyStatus::Active => AuthorityState::Integrated,
            DutyStatus::Inactive => AuthorityState::Separated,
        }
    }
}

/// Body returned by the primary's load endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub rate: f64,
    pub state: AuthorityState,
}

/// Body sent to the primary's status command endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCommand {
    pub status: DutyStatus,
}

/// Body returned by the status command endpoint on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub previous_status: DutyStatus,
    pub current_status: DutyStatus,
}

/// One observation of the primary's load, consumed by a single tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadSample {
    pub rate: f64,
    pub reported_state: AuthorityState,
    /// Milliseconds since the Unix epoch.
    pub sampled_at: u64,
}

impl LoadSample {
    /// Stamp a load report with the current wall clock.
    pub fn from_report(report: LoadReport) -> Self {
        Self {
            rate: report.rate,
            reported_state: report.state,
            sampled_at: epoch_millis(),
        }
    }
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
