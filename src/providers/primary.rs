//! Single-source VPN check backed by the persistent response cache.
//!
//! The primary source is consulted for every candidate address, so it alone
//! carries the persistent cache; the aggregate provider is the expensive
//! confirmation step behind it.

use super::{with_retries, CheckError, CheckResult, ReputationProvider, RetryPolicy};
use crate::cache::ResponseCache;
use crate::config::PrimaryConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Score contributed by a flagged primary verdict. Reaches the escalation
/// threshold on its own.
pub const PRIMARY_FLAGGED_SCORE: u32 = 2;

/// Marker phrase in a provider `message` that signals quota exhaustion.
const QUOTA_MARKER: &str = "exceeded limit";

/// Primary provider response body.
#[derive(Debug, Deserialize)]
struct PrimaryBody {
    /// "no" for clean addresses, any other value for flagged ones. Absent
    /// when the provider reports an error instead of a verdict.
    vpn_or_proxy: Option<String>,

    /// Provider-side error description.
    message: Option<String>,
}

/// Single-source reputation provider with a persistent response cache.
pub struct PrimaryProvider {
    config: PrimaryConfig,
    retry: RetryPolicy,
    client: Client,
    cache: Arc<ResponseCache>,
}

impl PrimaryProvider {
    /// Create a new primary provider around a shared cache store.
    pub fn new(config: PrimaryConfig, retry: RetryPolicy, cache: Arc<ResponseCache>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            retry,
            client,
            cache,
        }
    }

    async fn fetch(&self, ip: &str) -> Result<String, CheckError> {
        let url = format!("{}/{}", self.config.endpoint.trim_end_matches('/'), ip);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(CheckError::Status(response.status()));
        }

        response.text().await.map_err(CheckError::from)
    }
}

/// Extract the score from a response body. Quota and provider-reported
/// errors are non-retryable; an undecodable body is retried like any
/// transport failure.
fn parse_body(body: &str) -> Result<u32, CheckError> {
    let parsed: PrimaryBody =
        serde_json::from_str(body).map_err(|e| CheckError::Decode(e.to_string()))?;

    match parsed.vpn_or_proxy {
        Some(verdict) if verdict != "no" => Ok(PRIMARY_FLAGGED_SCORE),
        Some(_) => Ok(0),
        None => match parsed.message {
            Some(msg) if msg.to_ascii_lowercase().contains(QUOTA_MARKER) => {
                Err(CheckError::Quota(msg))
            }
            Some(msg) => Err(CheckError::Provider(msg)),
            None => Err(CheckError::Provider("unknown error".to_string())),
        },
    }
}

#[async_trait]
impl ReputationProvider for PrimaryProvider {
    async fn check(&self, ip: &str) -> Result<CheckResult, CheckError> {
        match self.cache.get(ip) {
            Ok(Some(body)) => match parse_body(&body) {
                Ok(score) => {
                    debug!(ip = %ip, score, "primary cache hit");
                    return Ok(CheckResult {
                        score,
                        cached: true,
                    });
                }
                Err(e) => {
                    // Only validated bodies are written, so an unusable
                    // entry means the store was corrupted. Refetch.
                    warn!(ip = %ip, error = %e, "unusable cache entry, evicting");
                    if let Err(e) = self.cache.evict(ip) {
                        warn!(ip = %ip, error = %e, "cache eviction failed");
                    }
                }
            },
            Ok(None) => {}
            Err(e) => warn!(ip = %ip, error = %e, "cache read failed"),
        }

        let (score, body) = with_retries(&self.retry, || async move {
            let body = self.fetch(ip).await?;
            let score = parse_body(&body)?;
            Ok((score, body))
        })
        .await?;

        // Clear verdicts are cached too, so definitively-clean addresses
        // skip the network on repeat lookups.
        if let Err(e) = self.cache.put(ip, &body) {
            warn!(ip = %ip, error = %e, "cache write failed");
        }

        debug!(ip = %ip, score, "primary lookup complete");
        Ok(CheckResult {
            score,
            cached: false,
        })
    }

    fn name(&self) -> &str {
        "primary"
    }
}
