//! Probe execution for target health checks.

mod http;

pub use http::*;

use crate::db::{ProbeResult, Target};
use async_trait::async_trait;

/// A probe executor.
///
/// `probe` is total: every network failure mode is classified into the
/// returned result, never raised to the caller. One call produces exactly
/// one result.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &Target) -> ProbeResult;
}
