//! Probe module for endpoint monitoring.
//!
//! Supports Ping, HTTP, and TCP probes. Every check resolves to a
//! [`CheckOutcome`]; transport failures are data, not errors.

mod http;
mod ping;
mod tcp;

pub use http::*;
pub use ping::*;
pub use tcp::*;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
///
/// These never leave the probe module; each check folds them into a
/// [`CheckOutcome`].
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("address resolution failed: {0}")]
    Resolve(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Observed availability of a probe target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Online,
    Slow,
    Offline,
    Timeout,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Online => "online",
            CheckStatus::Slow => "slow",
            CheckStatus::Offline => "offline",
            CheckStatus::Timeout => "timeout",
            CheckStatus::Error => "error",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(CheckStatus::Online),
            "slow" => Ok(CheckStatus::Slow),
            "offline" => Ok(CheckStatus::Offline),
            "timeout" => Ok(CheckStatus::Timeout),
            "error" => Ok(CheckStatus::Error),
            other => Err(format!("unknown check status: {}", other)),
        }
    }
}

/// The check method tag, as written in the probe file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeType {
    Ping,
    Http,
    Tcp,
}

/// Check method plus its type-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProbeKind {
    Ping {
        /// Round-trip time in milliseconds above which the target is `slow`.
        #[serde(default = "default_threshold")]
        threshold: f64,
    },
    Http {
        #[serde(default = "default_expected_status")]
        expected_status: u16,
    },
    Tcp {
        port: u16,
    },
}

fn default_threshold() -> f64 {
    100.0
}

fn default_expected_status() -> u16 {
    200
}

/// A configured network target and the check to apply to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub id: String,
    pub name: String,
    pub target: String,
    /// Timeout in seconds; the per-type default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(flatten)]
    pub kind: ProbeKind,
}

impl Probe {
    pub fn probe_type(&self) -> ProbeType {
        match self.kind {
            ProbeKind::Ping { .. } => ProbeType::Ping,
            ProbeKind::Http { .. } => ProbeType::Http,
            ProbeKind::Tcp { .. } => ProbeType::Tcp,
        }
    }

    /// Effective timeout: 10s for HTTP, 5s otherwise, unless configured.
    pub fn timeout(&self) -> Duration {
        let default = match self.kind {
            ProbeKind::Http { .. } => 10.0,
            ProbeKind::Ping { .. } | ProbeKind::Tcp { .. } => 5.0,
        };
        self.configured_timeout()
            .unwrap_or_else(|| Duration::from_secs_f64(default))
    }

    /// The configured timeout, when it is a positive, representable duration.
    fn configured_timeout(&self) -> Option<Duration> {
        self.timeout
            .filter(|t| *t > 0.0)
            .and_then(|t| Duration::try_from_secs_f64(t).ok())
    }

    /// False when a timeout is set but cannot be used.
    pub fn has_valid_timeout(&self) -> bool {
        self.timeout.is_none() || self.configured_timeout().is_some()
    }

    /// Perform one connectivity check against this probe's target.
    pub async fn execute(&self) -> CheckOutcome {
        let timeout = self.timeout();
        match &self.kind {
            ProbeKind::Ping { threshold } => run_ping_check(&self.target, timeout, *threshold).await,
            ProbeKind::Http { expected_status } => {
                run_http_check(&self.target, timeout, *expected_status).await
            }
            ProbeKind::Tcp { port } => run_tcp_check(&self.target, *port, timeout).await,
        }
    }
}

/// Normalized result of a single check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    /// Milliseconds; `None` when no response was obtained.
    #[serde(default)]
    pub response_time: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl CheckOutcome {
    pub fn responded(status: CheckStatus, elapsed: Duration) -> Self {
        Self {
            status,
            response_time: Some(millis(elapsed)),
            error: None,
            http_status: None,
        }
    }

    pub fn failed(status: CheckStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            response_time: None,
            error: Some(error.into()),
            http_status: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Convert a duration to milliseconds rounded to two decimals.
pub fn millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100_000.0).round() / 100.0
}

/// A check outcome stamped with the probe's identity and observation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub probe_type: ProbeType,
    pub target: String,
    pub timestamp: DateTime<Local>,
    #[serde(flatten)]
    pub outcome: CheckOutcome,
}

impl CheckResult {
    pub fn new(probe: &Probe, outcome: CheckOutcome) -> Self {
        Self {
            id: probe.id.clone(),
            name: probe.name.clone(),
            probe_type: probe.probe_type(),
            target: probe.target.clone(),
            timestamp: Local::now(),
            outcome,
        }
    }

    pub fn status(&self) -> CheckStatus {
        self.outcome.status
    }
}

/// Executes checks. The scheduler only talks to probes through this seam.
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, probe: &Probe) -> CheckOutcome;
}

/// Checker that performs real network I/O.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkChecker;

#[async_trait]
impl Checker for NetworkChecker {
    async fn check(&self, probe: &Probe) -> CheckOutcome {
        probe.execute().await
    }
}

/// Run one check for `probe` and stamp it with identity and timestamp.
pub async fn check_probe(checker: &dyn Checker, probe: &Probe) -> CheckResult {
    let outcome = checker.check(probe).await;
    CheckResult::new(probe, outcome)
}
