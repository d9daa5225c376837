//! Throttling policy configuration.
//!
//! A policy lists the limiters every request must pass and how the default
//! HTTP client is built:
//!
//! ```yaml
//! client:
//!   timeout_ms: 30000
//! limiters:
//!   - kind: quota
//!     limit: 36000
//!     unit: hour
//!   - kind: rate
//!     requests_per_unit: 99
//!     unit: second
//! ```

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ThrottleError};
use crate::ratelimit::{Limiter, Quota, TimeUnit, TokenBucket};
use crate::transport::{HttpExecutor, ThrottlingTransport};

/// A complete throttling policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// HTTP client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Limiters applied to every request
    #[serde(default)]
    pub limiters: Vec<LimiterConfig>,
}

/// Settings for the default `reqwest` client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Overall per-request timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Configuration for a single limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimiterConfig {
    /// Fixed-window quota that fails once exhausted.
    ///
    /// The window is either one `unit` or `interval_ms` milliseconds.
    Quota {
        limit: u64,
        #[serde(default)]
        unit: Option<TimeUnit>,
        #[serde(default)]
        interval_ms: Option<u64>,
    },

    /// Token bucket that blocks until a request may proceed.
    Rate {
        requests_per_unit: u32,
        unit: TimeUnit,
        #[serde(default = "default_burst")]
        burst: u32,
    },
}

fn default_burst() -> u32 {
    1
}

impl LimiterConfig {
    /// Validate this entry and build the limiter it describes.
    pub fn build(&self) -> Result<Arc<dyn Limiter>> {
        match *self {
            LimiterConfig::Quota {
                limit,
                unit,
                interval_ms,
            } => {
                let interval = match (unit, interval_ms) {
                    (Some(unit), None) => unit.duration(),
                    (None, Some(0)) => {
                        return Err(ThrottleError::Config(
                            "quota interval_ms must be greater than zero".to_string(),
                        ))
                    }
                    (None, Some(ms)) => Duration::from_millis(ms),
                    (Some(_), Some(_)) => {
                        return Err(ThrottleError::Config(
                            "quota accepts either unit or interval_ms, not both".to_string(),
                        ))
                    }
                    (None, None) => {
                        return Err(ThrottleError::Config(
                            "quota requires unit or interval_ms".to_string(),
                        ))
                    }
                };
                Ok(Arc::new(Quota::new(interval, limit)))
            }
            LimiterConfig::Rate {
                requests_per_unit,
                unit,
                burst,
            } => {
                let requests = NonZeroU32::new(requests_per_unit).ok_or_else(|| {
                    ThrottleError::Config("rate requests_per_unit must be greater than zero".to_string())
                })?;
                let burst = NonZeroU32::new(burst).ok_or_else(|| {
                    ThrottleError::Config("rate burst must be greater than zero".to_string())
                })?;
                Ok(Arc::new(TokenBucket::rate(requests, unit, burst)?))
            }
        }
    }
}

impl ClientConfig {
    /// Build the default executor from these settings.
    pub fn build_executor(&self) -> Result<HttpExecutor> {
        let mut builder = reqwest::Client::builder();
        if let Some(ms) = self.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(ref user_agent) = self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder
            .build()
            .map_err(|e| ThrottleError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(HttpExecutor::new(client))
    }
}

impl ThrottleConfig {
    /// Load a policy from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading throttling policy");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a policy from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ThrottleError::Config(format!("Failed to parse throttling policy: {}", e)))
    }

    /// Build every configured limiter, in order.
    pub fn build_limiters(&self) -> Result<Vec<Arc<dyn Limiter>>> {
        self.limiters.iter().map(LimiterConfig::build).collect()
    }

    /// Build a transport over the default HTTP executor enforcing this policy.
    pub fn build_transport(&self) -> Result<ThrottlingTransport<HttpExecutor>> {
        let executor = self.client.build_executor()?;
        let limiters = self.build_limiters()?;
        info!(limiters = limiters.len(), "Throttling transport configured");
        Ok(ThrottlingTransport::custom(executor, limiters))
    }
}
