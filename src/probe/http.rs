//! HTTP probe implementation.

use super::Prober;
use crate::db::{Outcome, ProbeResult, Target};
use async_trait::async_trait;
use chrono::Utc;
use std::time::{Duration, Instant};

/// Upper bound on the random pre-request delay.
const MAX_JITTER_MS: u64 = 100;

/// Probes targets with GET requests over one shared client.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Build the shared client. Timeouts are per-request (each target has
    /// its own), so the client carries none.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &Target) -> ProbeResult {
        // Spread concurrent probes out to avoid a thundering herd
        let jitter = rand::random::<u64>() % MAX_JITTER_MS;
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let timestamp = Utc::now();
        let clock = Instant::now();

        let response = self
            .client
            .get(&target.url)
            .timeout(target.timeout)
            .send()
            .await;

        let (outcome, latency_ms, detail) = match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                // Read the full body so latency covers the complete transfer.
                // The request timeout applies through the body read.
                match resp.bytes().await {
                    Ok(_) => {
                        let latency = clock.elapsed().as_secs_f64() * 1000.0;
                        let outcome = if (200..400).contains(&status) {
                            Outcome::Success
                        } else {
                            Outcome::Failure
                        };
                        (outcome, Some(latency), Some(status.to_string()))
                    }
                    Err(e) if e.is_timeout() => (Outcome::Timeout, None, None),
                    Err(e) => (Outcome::Error, None, Some(describe_error(&e))),
                }
            }
            Err(e) if e.is_timeout() => (Outcome::Timeout, None, None),
            Err(e) => (Outcome::Error, None, Some(describe_error(&e))),
        };

        ProbeResult {
            target: target.id.clone(),
            timestamp,
            outcome,
            latency_ms,
            detail,
        }
    }
}

/// Collapse reqwest's error chain into a short, stable description.
fn describe_error(error: &reqwest::Error) -> String {
    let text = error.to_string();
    let lower = text.to_lowercase();

    let mut detail = if lower.contains("dns") {
        "dns resolution failed".to_string()
    } else if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        "tls error".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else if error.is_request() {
        format!("invalid request: {}", text)
    } else {
        format!("request failed: {}", text)
    };

    detail.truncate(300);
    detail
}
