//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A monitored endpoint with its own check interval and timeout.
///
/// Targets are built from configuration at startup and never change for the
/// lifetime of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Target {
    /// Stable unique identifier.
    pub id: String,
    /// URL probed on each check.
    pub url: String,
    /// Time between consecutive probe starts.
    #[serde(with = "secs")]
    pub interval: Duration,
    /// Upper bound on one probe, connect through body completion.
    #[serde(with = "secs")]
    pub timeout: Duration,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: String::new(),
            url: String::new(),
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
        }
    }
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// Classified result of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Response within the timeout, success status class.
    Success,
    /// Response within the timeout, failure status class.
    Failure,
    /// No response before the timeout elapsed.
    Timeout,
    /// Connection-level failure (DNS, refused, TLS) before the timeout.
    Error,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Timeout => "timeout",
            Outcome::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Outcome::Success),
            "failure" => Some(Outcome::Failure),
            "timeout" => Some(Outcome::Timeout),
            "error" => Some(Outcome::Error),
            _ => None,
        }
    }
}

/// A single probe result, keyed by `(target, timestamp)`.
///
/// Append-only; once written, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub target: String,
    /// Probe start time.
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    /// Wall time of the full request, set for `Success` and `Failure`.
    pub latency_ms: Option<f64>,
    /// HTTP status code or error description.
    pub detail: Option<String>,
}
