//! Aggregating checker: orchestrates the provider clients for a single IP.

use crate::cache::ResponseCache;
use crate::config::{Config, SafeRangeEntry};
use crate::providers::aggregate::AggregateProvider;
use crate::providers::primary::PrimaryProvider;
use crate::providers::{CheckError, CheckResult, ReputationProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Score at which callers declare an address "likely VPN or proxy". A
/// flagged primary verdict reaches it on its own; aggregate upstreams reach
/// it with two independent signals.
pub const SUSPICION_THRESHOLD: u32 = 2;

/// Two-tier VPN/proxy checker.
///
/// The cheap, cached primary check runs for every candidate address; only
/// addresses it already finds suspicious escalate to the metered aggregate
/// service. Checks for distinct addresses are independent and may run
/// concurrently; the cache store is the only shared state.
pub struct VpnChecker {
    safe_ranges: Vec<SafeRangeEntry>,
    deadline: Option<Duration>,
    primary: PrimaryProvider,
    aggregate: AggregateProvider,
}

impl VpnChecker {
    /// Open the cache store and build the provider clients. The store is
    /// acquired once here and released when the checker is dropped.
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let cache = Arc::new(ResponseCache::open(&config.cache.path)?);
        Ok(Self::with_cache(config, cache))
    }

    /// Build a checker around an already-open cache store.
    pub fn with_cache(config: Config, cache: Arc<ResponseCache>) -> Self {
        let safe_ranges = config.parse_safe_ranges();
        let retry = config.retry.policy();

        info!(
            safe_ranges = safe_ranges.len(),
            cached_entries = cache.len(),
            "VPN checker ready"
        );

        let deadline = retry.deadline;
        let primary = PrimaryProvider::new(config.primary, retry.clone(), cache);
        let aggregate = AggregateProvider::new(config.aggregate, retry);

        Self {
            safe_ranges,
            deadline,
            primary,
            aggregate,
        }
    }

    /// Check if an address falls inside a configured safe range. Strings
    /// that do not parse as addresses are never safe.
    fn is_safe(&self, ip: &str) -> bool {
        match ip.parse() {
            Ok(addr) => self.safe_ranges.iter().any(|r| r.contains(&addr)),
            Err(_) => false,
        }
    }

    async fn run_provider<P: ReputationProvider>(
        &self,
        provider: &P,
        ip: &str,
    ) -> Result<CheckResult, CheckError> {
        let fut = provider.check(ip);
        let result = match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, fut)
                .await
                .map_err(|_| CheckError::DeadlineExceeded)?,
            None => fut.await,
        };

        if let Err(ref e) = result {
            warn!(provider = provider.name(), ip = %ip, error = %e, "lookup failed");
        }
        result
    }

    /// Cheap single-source check; run for every candidate address.
    ///
    /// Safe-range addresses short-circuit to a clean, cached result without
    /// touching the cache store or the network.
    pub async fn check_primary(&self, ip: &str) -> Result<CheckResult, CheckError> {
        if self.is_safe(ip) {
            debug!(ip = %ip, "address in safe range");
            return Ok(CheckResult {
                score: 0,
                cached: true,
            });
        }

        self.run_provider(&self.primary, ip).await
    }

    /// Expensive multi-source check against the keyed aggregation service.
    pub async fn check_aggregate(&self, ip: &str) -> Result<CheckResult, CheckError> {
        self.run_provider(&self.aggregate, ip).await
    }

    /// Two-tier check. The primary verdict pre-filters; only addresses it
    /// already scores at [`SUSPICION_THRESHOLD`] or above spend aggregate
    /// quota, and the corroborated verdict then replaces the cheap one.
    pub async fn check(&self, ip: &str) -> Result<CheckResult, CheckError> {
        let primary = self.check_primary(ip).await?;
        if primary.score < SUSPICION_THRESHOLD {
            return Ok(primary);
        }

        debug!(ip = %ip, score = primary.score, "escalating to aggregate check");
        self.check_aggregate(ip).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AggregateConfig, PrimaryConfig, RetryConfig};
    use crate::providers::ErrorKind;

    /// Both endpoints unreachable: any network attempt fails fast.
    fn offline_config() -> Config {
        Config {
            primary: PrimaryConfig {
                endpoint: "http://127.0.0.1:9/api/vpn".to_string(),
                timeout_ms: 500,
            },
            aggregate: AggregateConfig {
                endpoint: "http://127.0.0.1:9/index.php".to_string(),
                api_key: Some("test-key".to_string()),
                timeout_ms: 500,
            },
            retry: RetryConfig {
                attempts: 1,
                backoff_ms: 0,
                deadline_ms: None,
            },
            ..Config::default()
        }
    }

    fn offline_checker() -> (VpnChecker, Arc<ResponseCache>) {
        let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
        let checker = VpnChecker::with_cache(offline_config(), cache.clone());
        (checker, cache)
    }

    #[tokio::test]
    async fn test_safe_range_short_circuits() {
        let (checker, cache) = offline_checker();

        // Default safe range; success proves neither cache nor network ran.
        let result = checker.check_primary("2001:16b8:dead::1").await.unwrap();

        assert_eq!(result.score, 0);
        assert!(result.cached);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_safe_range_applies_to_full_check() {
        let (checker, _cache) = offline_checker();

        let result = checker.check("2001:16b8:dead::1").await.unwrap();
        assert_eq!(result.score, 0);
        assert!(result.cached);
    }

    #[tokio::test]
    async fn test_unparseable_address_is_not_safe() {
        let (checker, _cache) = offline_checker();

        let result = checker.check_primary("not-an-address").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_warm_cache_returns_cached_verdict() {
        let (checker, cache) = offline_checker();
        cache
            .put("203.0.113.9", r#"{"vpn_or_proxy":"no"}"#)
            .unwrap();

        let result = checker.check_primary("203.0.113.9").await.unwrap();

        assert_eq!(result.score, 0);
        assert!(result.cached);
    }

    #[tokio::test]
    async fn test_clean_primary_does_not_escalate() {
        let (checker, cache) = offline_checker();
        cache
            .put("203.0.113.9", r#"{"vpn_or_proxy":"no"}"#)
            .unwrap();

        // The aggregate endpoint is unreachable, so a clean overall result
        // proves the aggregate provider was never consulted.
        let result = checker.check("203.0.113.9").await.unwrap();

        assert_eq!(result.score, 0);
        assert!(result.cached);
    }

    #[tokio::test]
    async fn test_flagged_primary_escalates() {
        let (checker, cache) = offline_checker();
        cache
            .put("198.51.100.7", r#"{"vpn_or_proxy":"yes"}"#)
            .unwrap();

        // Escalation reaches the unreachable aggregate endpoint and fails;
        // the primary verdict alone would have succeeded.
        let err = checker.check("198.51.100.7").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_primary_scores_at_threshold() {
        let (checker, cache) = offline_checker();
        cache
            .put("198.51.100.7", r#"{"vpn_or_proxy":"yes"}"#)
            .unwrap();

        let result = checker.check_primary("198.51.100.7").await.unwrap();
        assert!(result.score >= SUSPICION_THRESHOLD);
    }

    #[tokio::test]
    async fn test_deadline_bounds_retry_loop() {
        let mut config = offline_config();
        // Five attempts with a minute of backoff each, bounded by a 50ms
        // deadline.
        config.retry = RetryConfig {
            attempts: 5,
            backoff_ms: 60_000,
            deadline_ms: Some(50),
        };
        let cache = Arc::new(ResponseCache::open_in_memory().unwrap());
        let checker = VpnChecker::with_cache(config, cache);

        let err = checker.check_primary("203.0.113.9").await.unwrap_err();
        assert!(matches!(err, CheckError::DeadlineExceeded));
    }
}
