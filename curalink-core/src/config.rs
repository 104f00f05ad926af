//! Client configuration.
//!
//! [`ApiConfig`] carries everything the pipeline needs to talk to one
//! backend environment: base URL, identification headers, signing
//! secret, and the retry/backoff tuning. Host applications build it in
//! code; the CLI loads it from a TOML file.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::NetworkError;
use crate::store::Secret;

/// Retry and backoff tuning for the request pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries per logical call. One budget is shared between
    /// authentication retries and server-error retries, so a call makes
    /// at most `max_retries + 1` attempts in total.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for the linear backoff between server-error retries.
    /// The n-th retry waits `n * backoff_base_ms`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Fixed delay before retrying after a 401 triggered token refresh.
    #[serde(default = "default_auth_retry_delay_ms")]
    pub auth_retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            auth_retry_delay_ms: default_auth_retry_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Backoff delay before the given retry, 1-based.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        Duration::from_millis(u64::from(retry) * self.backoff_base_ms)
    }

    /// Delay applied between a token refresh and the retried request.
    pub fn auth_retry_delay(&self) -> Duration {
        Duration::from_millis(self.auth_retry_delay_ms)
    }
}

/// Device identity stamped onto every outbound request.
///
/// Host applications collect these from the platform and inject them;
/// [`generate`](Self::generate) exists for development hosts that have
/// nothing better to report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Stable per-installation identifier.
    pub device_id: String,

    /// Hardware model string.
    pub model: String,

    /// Operating system version string.
    pub os_version: String,

    /// Version of the embedding application.
    pub app_version: String,
}

impl DeviceIdentity {
    /// Development identity with a random device id.
    pub fn generate(app_version: impl Into<String>) -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            model: std::env::consts::ARCH.to_string(),
            os_version: std::env::consts::OS.to_string(),
            app_version: app_version.into(),
        }
    }
}

/// Configuration for one backend environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Backend origin, e.g. `https://api.curalink.example`.
    pub base_url: Url,

    /// Environment tag recorded into minted token records. A stored
    /// record carrying a different tag is discarded on read, so
    /// credentials never leak across environments.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Static API key sent on every request.
    pub api_key: String,

    /// Shared secret enabling HMAC body signatures. `None` disables
    /// signing entirely.
    #[serde(default)]
    pub signing_secret: Option<Secret>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Path probed while the backend is unreachable.
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Seconds between connectivity probes.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Lifetime of in-memory token cache entries in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Seconds subtracted from the server-reported token lifetime so
    /// refresh happens before the real expiry.
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: i64,

    /// Retry and backoff tuning.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Identity of this device.
    #[serde(default = "default_device")]
    pub device: DeviceIdentity,
}

impl ApiConfig {
    /// Create a configuration with default tuning.
    pub fn new(base_url: Url, api_key: impl Into<String>, device: DeviceIdentity) -> Self {
        Self {
            base_url,
            environment: default_environment(),
            api_key: api_key.into(),
            signing_secret: None,
            request_timeout_secs: default_request_timeout_secs(),
            health_path: default_health_path(),
            probe_interval_secs: default_probe_interval_secs(),
            cache_ttl_ms: default_cache_ttl_ms(),
            safety_margin_secs: default_safety_margin_secs(),
            retry: RetryConfig::default(),
            device,
        }
    }

    /// Set the environment tag.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Enable HMAC body signatures with the given shared secret.
    pub fn with_signing_secret(mut self, secret: impl Into<Secret>) -> Self {
        self.signing_secret = Some(secret.into());
        self
    }

    /// Set the retry tuning.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the token cache lifetime in milliseconds.
    pub fn with_cache_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.cache_ttl_ms = ttl_ms;
        self
    }

    /// Set the proactive refresh margin in seconds.
    pub fn with_safety_margin_secs(mut self, secs: i64) -> Self {
        self.safety_margin_secs = secs;
        self
    }

    /// Set the connectivity probe cadence in seconds.
    pub fn with_probe_interval_secs(mut self, secs: u64) -> Self {
        self.probe_interval_secs = secs;
        self
    }

    /// Resolve an absolute endpoint path against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, NetworkError> {
        self.base_url
            .join(path)
            .map_err(|e| NetworkError::InvalidUrl(format!("{path}: {e}")))
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Token cache entry lifetime.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Proactive refresh margin.
    pub fn safety_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.safety_margin_secs)
    }

    /// Connectivity probe cadence.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Build an HTTP client honoring the configured timeout.
    pub fn build_http_client(&self) -> Result<reqwest::Client, NetworkError> {
        reqwest::Client::builder()
            .timeout(self.request_timeout())
            .user_agent(concat!("curalink-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NetworkError::InvalidRequest(format!("http client: {e}")))
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    2_000
}

fn default_auth_retry_delay_ms() -> u64 {
    1_000
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_probe_interval_secs() -> u64 {
    5
}

fn default_cache_ttl_ms() -> u64 {
    5_000
}

fn default_safety_margin_secs() -> i64 {
    300
}

fn default_device() -> DeviceIdentity {
    DeviceIdentity::generate(env!("CARGO_PKG_VERSION"))
}
