//! Configuration types for the VPN check service.

use crate::providers::RetryPolicy;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable consulted for the aggregate provider's API key when
/// the configuration does not carry one.
pub const API_KEY_ENV: &str = "IPCHECK_API_KEY";

/// Root configuration for the VPN check service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Primary (cached) provider.
    #[serde(default)]
    pub primary: PrimaryConfig,

    /// Aggregate (keyed, metered) provider.
    #[serde(default)]
    pub aggregate: AggregateConfig,

    /// Retry policy shared by both providers.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Persistent response cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Address ranges known to never be proxies. Checked before any cache
    /// or network access. Supports single IPs and CIDR notation.
    #[serde(default = "default_safe_ranges")]
    pub safe_ranges: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            primary: PrimaryConfig::default(),
            aggregate: AggregateConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            safe_ranges: default_safe_ranges(),
        }
    }
}

/// Primary provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrimaryConfig {
    /// Endpoint queried as `GET <endpoint>/<ip>`.
    #[serde(default = "default_primary_endpoint")]
    pub endpoint: String,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_primary_endpoint(),
            timeout_ms: default_timeout(),
        }
    }
}

fn default_primary_endpoint() -> String {
    "https://ip.teoh.io/api/vpn".to_string()
}

/// Aggregate provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregateConfig {
    /// Endpoint queried as `GET <endpoint>?ip=<ip>&api=true&key=<apikey>`.
    #[serde(default = "default_aggregate_endpoint")]
    pub endpoint: String,

    /// API key (supports ${ENV_VAR} syntax in config files). Falls back to
    /// the [`API_KEY_ENV`] environment variable when unset.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            endpoint: default_aggregate_endpoint(),
            api_key: None,
            timeout_ms: default_timeout(),
        }
    }
}

impl AggregateConfig {
    /// The API key from config, or from the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()))
    }
}

fn default_aggregate_endpoint() -> String {
    "https://ipcheck.toolforge.org/index.php".to_string()
}

fn default_timeout() -> u64 {
    5000
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Total attempts per provider call, including the first.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Delay after each failed attempt, in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Overall deadline per provider call, in milliseconds. Unset means no
    /// deadline beyond per-request timeouts and the attempt ceiling.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
            deadline_ms: None,
        }
    }
}

impl RetryConfig {
    /// Build the runtime retry policy.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts,
            backoff: Duration::from_millis(self.backoff_ms),
            deadline: self.deadline_ms.map(Duration::from_millis),
        }
    }
}

fn default_attempts() -> u32 {
    5
}

fn default_backoff_ms() -> u64 {
    1000
}

/// Persistent cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Path of the on-disk store. Relative paths resolve against the
    /// working directory of the process.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("vpn-check-cache.db")
}

fn default_safe_ranges() -> Vec<String> {
    vec!["2001:16b8::/32".to_string()]
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry.attempts == 0 {
            anyhow::bail!("retry.attempts must be at least 1");
        }

        if self.primary.endpoint.is_empty() {
            anyhow::bail!("primary.endpoint must not be empty");
        }

        if self.aggregate.endpoint.is_empty() {
            anyhow::bail!("aggregate.endpoint must not be empty");
        }

        for entry in &self.safe_ranges {
            if entry.parse::<IpAddr>().is_err() && entry.parse::<IpNet>().is_err() {
                anyhow::bail!("Invalid safe range entry: {}", entry);
            }
        }

        Ok(())
    }

    /// Parse safe range entries into IpAddr or IpNet.
    pub fn parse_safe_ranges(&self) -> Vec<SafeRangeEntry> {
        self.safe_ranges
            .iter()
            .filter_map(|s| {
                if let Ok(ip) = s.parse::<IpAddr>() {
                    Some(SafeRangeEntry::Single(ip))
                } else if let Ok(net) = s.parse::<IpNet>() {
                    Some(SafeRangeEntry::Network(net))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# VPN Check Configuration

# Primary provider - queried for every candidate address, responses cached
primary:
  endpoint: "https://ip.teoh.io/api/vpn"
  timeout_ms: 5000             # Per-request timeout

# Aggregate provider - keyed, metered; only queried on escalation
aggregate:
  endpoint: "https://ipcheck.toolforge.org/index.php"
  api_key: "${IPCHECK_API_KEY}"  # Use environment variable
  timeout_ms: 5000

# Retry policy shared by both providers
retry:
  attempts: 5                  # Total attempts per call
  backoff_ms: 1000             # Delay after each failed attempt
  # deadline_ms: 30000         # Optional overall deadline per call

# Persistent response cache (primary provider only)
cache:
  path: "vpn-check-cache.db"

# Address ranges known to never be proxies - checked before cache and network
# Supports single IPs and CIDR notation
safe_ranges:
  - "2001:16b8::/32"
"#
        .to_string()
    }
}

/// Parsed safe range entry.
#[derive(Debug, Clone)]
pub enum SafeRangeEntry {
    Single(IpAddr),
    Network(IpNet),
}

impl SafeRangeEntry {
    /// Check if an IP address matches this entry.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            SafeRangeEntry::Single(safe) => safe == ip,
            SafeRangeEntry::Network(net) => net.contains(ip),
        }
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let var_value = std::env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
