//! Multi-source check against a keyed proxy-check aggregation service.
//!
//! The remote service fans out to four independent upstream reputation
//! sources and performs its own caching; this client only reports whether
//! the service's answer was cache-derived. Each upstream that independently
//! flags the address adds one point to the score.

use super::{
    with_retries, CheckError, CheckResult, ProviderVerdict, ReputationProvider, RetryPolicy,
};
use crate::config::{AggregateConfig, API_KEY_ENV};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// getIPIntel reports a 0-100 confidence; only a saturated value counts as
/// an independent signal.
const GETIPINTEL_SATURATION: f64 = 100.0;

/// One upstream section of the aggregate response: either the service-side
/// error marker or that upstream's own result shape.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Section<T> {
    Failed {
        #[allow(dead_code)] // Error detail is service-internal
        error: serde_json::Value,
    },
    Done {
        result: T,
    },
}

impl<T: Signal> Section<T> {
    fn verdict(&self) -> ProviderVerdict {
        match self {
            Section::Failed { .. } => ProviderVerdict::Unavailable,
            Section::Done { result } => {
                if result.flagged() {
                    ProviderVerdict::Flagged
                } else {
                    ProviderVerdict::Clear
                }
            }
        }
    }
}

/// Reduce an upstream's result shape to a flagged/clear signal.
trait Signal {
    fn flagged(&self) -> bool;
}

#[derive(Debug, Deserialize)]
struct TeohioResult {
    #[serde(rename = "vpnOrProxy")]
    vpn_or_proxy: bool,
}

impl Signal for TeohioResult {
    fn flagged(&self) -> bool {
        self.vpn_or_proxy
    }
}

#[derive(Debug, Deserialize)]
struct ProxycheckResult {
    proxy: bool,
}

impl Signal for ProxycheckResult {
    fn flagged(&self) -> bool {
        self.proxy
    }
}

#[derive(Debug, Deserialize)]
struct GetIpIntelResult {
    chance: f64,
}

impl Signal for GetIpIntelResult {
    fn flagged(&self) -> bool {
        self.chance >= GETIPINTEL_SATURATION
    }
}

#[derive(Debug, Deserialize)]
struct IpQualityScoreResult {
    proxy: bool,
    vpn: bool,
}

impl Signal for IpQualityScoreResult {
    fn flagged(&self) -> bool {
        self.proxy || self.vpn
    }
}

#[derive(Debug, Deserialize)]
struct CacheSection {
    result: CacheStatus,
}

#[derive(Debug, Deserialize)]
struct CacheStatus {
    cached: String,
}

/// Aggregate service response body.
#[derive(Debug, Deserialize)]
struct AggregateBody {
    teohio: Section<TeohioResult>,
    proxycheck: Section<ProxycheckResult>,
    #[serde(rename = "getIPIntel")]
    get_ip_intel: Section<GetIpIntelResult>,
    #[serde(rename = "ipQualityScore")]
    ip_quality_score: Section<IpQualityScoreResult>,
    cache: CacheSection,
}

/// Sum the upstream verdicts into a score. An upstream carrying an error
/// marker is skipped; the remaining upstreams still count.
fn parse_body(body: &str) -> Result<CheckResult, CheckError> {
    let parsed: AggregateBody =
        serde_json::from_str(body).map_err(|e| CheckError::Decode(e.to_string()))?;

    let verdicts = [
        ("teohio", parsed.teohio.verdict()),
        ("proxycheck", parsed.proxycheck.verdict()),
        ("getIPIntel", parsed.get_ip_intel.verdict()),
        ("ipQualityScore", parsed.ip_quality_score.verdict()),
    ];

    let mut score = 0;
    for (name, verdict) in verdicts {
        if verdict == ProviderVerdict::Unavailable {
            debug!(upstream = name, "upstream unavailable, not counted");
        }
        score += verdict.points();
    }

    let cached = parsed.cache.result.cached == "yes";

    Ok(CheckResult { score, cached })
}

/// Client for the keyed aggregation service. Carries no local cache.
pub struct AggregateProvider {
    config: AggregateConfig,
    retry: RetryPolicy,
    client: Client,
}

impl AggregateProvider {
    /// Create a new aggregate provider.
    pub fn new(config: AggregateConfig, retry: RetryPolicy) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            retry,
            client,
        }
    }

    async fn fetch(&self, ip: &str, key: &str) -> Result<String, CheckError> {
        let response = self
            .client
            .get(&self.config.endpoint)
            .query(&[("ip", ip), ("api", "true"), ("key", key)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CheckError::Status(response.status()));
        }

        response.text().await.map_err(CheckError::from)
    }
}

#[async_trait]
impl ReputationProvider for AggregateProvider {
    async fn check(&self, ip: &str) -> Result<CheckResult, CheckError> {
        let key = self.config.resolve_api_key().ok_or_else(|| {
            CheckError::Provider(format!("no API key configured (set {})", API_KEY_ENV))
        })?;

        let key = key.as_str();
        let result = with_retries(&self.retry, || async move {
            let body = self.fetch(ip, key).await?;
            parse_body(&body)
        })
        .await?;

        debug!(
            ip = %ip,
            score = result.score,
            cached = result.cached,
            "aggregate lookup complete"
        );
        Ok(result)
    }

    fn name(&self) -> &str {
        "aggregate"
    }
}
