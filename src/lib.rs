//! Proxy/VPN reputation lookups with provider escalation.
//!
//! Given an IP address, determines whether it is likely a VPN, open proxy,
//! or anonymizing relay by querying external reputation providers and
//! aggregating their signals into a single score.
//!
//! # Features
//!
//! - **Two-tier escalation** - A cheap, cached single-source check runs for
//!   every candidate address; only already-suspicious addresses escalate to
//!   the metered multi-source aggregation service
//! - **Persistent response cache** - Primary responses are cached on disk
//!   and survive process restarts
//! - **Safe ranges** - Addresses in configured ranges are never looked up
//! - **Bounded retries** - Parameterized attempt ceiling, backoff, and
//!   optional overall deadline per call
//! - **Typed errors** - Quota exhaustion, malformed responses, and
//!   transient failures are distinct variants, not strings
//!
//! # Example Configuration
//!
//! ```yaml
//! primary:
//!   endpoint: "https://ip.teoh.io/api/vpn"
//!
//! aggregate:
//!   endpoint: "https://ipcheck.toolforge.org/index.php"
//!   api_key: "${IPCHECK_API_KEY}"
//!
//! retry:
//!   attempts: 5
//!   backoff_ms: 1000
//!
//! cache:
//!   path: "vpn-check-cache.db"
//!
//! safe_ranges:
//!   - "2001:16b8::/32"
//! ```

pub mod cache;
pub mod checker;
pub mod config;
pub mod providers;

pub use cache::ResponseCache;
pub use checker::{VpnChecker, SUSPICION_THRESHOLD};
pub use config::Config;
pub use providers::{CheckError, CheckResult, ErrorKind};
