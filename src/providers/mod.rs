//! Reputation provider clients and shared provider types.

pub mod aggregate;
pub mod primary;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Outcome of a reputation lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    /// Count of independent signals judging the address a proxy/VPN.
    pub score: u32,

    /// Whether the result was served from cache rather than a fresh call.
    pub cached: bool,
}

/// Verdict of a single upstream source inside an aggregate response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderVerdict {
    /// The source judged the address a proxy/VPN.
    Flagged,
    /// The source judged the address clean.
    Clear,
    /// The source's own sub-response carried an error marker. Contributes
    /// nothing to the score but is not a Clear verdict.
    Unavailable,
}

impl ProviderVerdict {
    /// Score contribution of this verdict.
    pub fn points(&self) -> u32 {
        match self {
            ProviderVerdict::Flagged => 1,
            ProviderVerdict::Clear | ProviderVerdict::Unavailable => 0,
        }
    }
}

/// Error from a reputation check.
#[derive(Debug)]
pub enum CheckError {
    /// HTTP transport failure.
    Http(reqwest::Error),
    /// Per-attempt request timeout.
    Timeout,
    /// Non-success status from the provider endpoint.
    Status(reqwest::StatusCode),
    /// Response body was not decodable.
    Decode(String),
    /// Provider explicitly signaled quota exhaustion. Raised on the first
    /// attempt; retrying within the same quota window cannot succeed.
    Quota(String),
    /// Provider-reported error or a response missing its expected fields.
    Provider(String),
    /// Overall deadline elapsed before the check finished.
    DeadlineExceeded,
    /// All retry attempts failed; carries the last error's description.
    Exhausted { attempts: u32, last: String },
}

/// Coarse classification of a [`CheckError`] so callers can branch without
/// inspecting error strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport-level failure; a later call may succeed.
    Transient,
    /// Quota exhausted; back off the whole provider path.
    Quota,
    /// The provider answered, but not with a usable verdict.
    Malformed,
}

impl CheckError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckError::Http(_)
            | CheckError::Timeout
            | CheckError::Status(_)
            | CheckError::Decode(_)
            | CheckError::DeadlineExceeded
            | CheckError::Exhausted { .. } => ErrorKind::Transient,
            CheckError::Quota(_) => ErrorKind::Quota,
            CheckError::Provider(_) => ErrorKind::Malformed,
        }
    }

    /// Whether the retry loop may try again after this error. Quota and
    /// provider-reported errors surface immediately.
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckError::Http(_)
                | CheckError::Timeout
                | CheckError::Status(_)
                | CheckError::Decode(_)
        )
    }
}

impl std::fmt::Display for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckError::Http(e) => write!(f, "HTTP error: {}", e),
            CheckError::Timeout => write!(f, "request timed out"),
            CheckError::Status(status) => write!(f, "unexpected status: {}", status),
            CheckError::Decode(msg) => write!(f, "undecodable response: {}", msg),
            CheckError::Quota(msg) => write!(f, "quota exceeded: {}", msg),
            CheckError::Provider(msg) => write!(f, "provider error: {}", msg),
            CheckError::DeadlineExceeded => write!(f, "deadline exceeded"),
            CheckError::Exhausted { attempts, last } => {
                write!(f, "giving up after {} attempts: {}", attempts, last)
            }
        }
    }
}

impl std::error::Error for CheckError {}

impl From<reqwest::Error> for CheckError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CheckError::Timeout
        } else {
            CheckError::Http(e)
        }
    }
}

/// Bounded-retry policy applied to every provider call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Fixed delay after each failed attempt.
    pub backoff: Duration,
    /// Overall deadline across all attempts and backoffs. Enforced by the
    /// checker around the whole provider call.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(1),
            deadline: None,
        }
    }
}

/// Run `attempt` up to `policy.attempts` times, sleeping `policy.backoff`
/// after each retryable failure. Non-retryable errors surface immediately;
/// exhaustion surfaces the last error's description.
pub(crate) async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<T, CheckError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CheckError>>,
{
    let mut last: Option<CheckError> = None;
    for _ in 0..policy.attempts {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                tracing::debug!(error = %e, "attempt failed, will retry");
                last = Some(e);
            }
            Err(e) => return Err(e),
        }
        tokio::time::sleep(policy.backoff).await;
    }
    Err(CheckError::Exhausted {
        attempts: policy.attempts,
        last: last
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string()),
    })
}

/// Trait for IP reputation providers.
#[async_trait]
pub trait ReputationProvider: Send + Sync {
    /// Look up the reputation of an IP address. The address is the literal
    /// string form; implementations must not normalize it.
    async fn check(&self, ip: &str) -> Result<CheckResult, CheckError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            backoff: Duration::from_millis(0),
            deadline: None,
        }
    }

    #[test]
    fn test_verdict_points() {
        assert_eq!(ProviderVerdict::Flagged.points(), 1);
        assert_eq!(ProviderVerdict::Clear.points(), 0);
        assert_eq!(ProviderVerdict::Unavailable.points(), 0);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(CheckError::Timeout.kind(), ErrorKind::Transient);
        assert_eq!(
            CheckError::Status(reqwest::StatusCode::BAD_GATEWAY).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            CheckError::Decode("bad json".to_string()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            CheckError::Quota("Exceeded limit".to_string()).kind(),
            ErrorKind::Quota
        );
        assert_eq!(
            CheckError::Provider("invalid ip".to_string()).kind(),
            ErrorKind::Malformed
        );
        assert_eq!(
            CheckError::Exhausted {
                attempts: 5,
                last: "x".to_string()
            }
            .kind(),
            ErrorKind::Transient
        );
    }

    #[tokio::test]
    async fn test_retries_exhausted_after_attempt_ceiling() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(&fast_policy(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CheckError::Status(
                reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            ))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match result {
            Err(CheckError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 5);
                assert!(last.contains("500"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_quota_short_circuits_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(&fast_policy(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CheckError::Quota("Exceeded limit of 1000".to_string()))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(CheckError::Quota(_))));
    }

    #[tokio::test]
    async fn test_provider_error_short_circuits_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(&fast_policy(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CheckError::Provider("invalid address".to_string()))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(CheckError::Provider(_))));
    }

    #[tokio::test]
    async fn test_success_stops_retrying() {
        let calls = AtomicU32::new(0);
        let result = with_retries(&fast_policy(5), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(CheckError::Timeout)
            } else {
                Ok(42u32)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhausted_display_carries_last_error() {
        let err = CheckError::Exhausted {
            attempts: 5,
            last: "request timed out".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("5 attempts"));
        assert!(text.contains("request timed out"));
    }
}
