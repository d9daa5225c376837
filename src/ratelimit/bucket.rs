//! Blocking token bucket backed by `governor`.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::DefaultDirectRateLimiter;
use tracing::trace;

use super::context::Context;
use super::limiter::Limiter;
use super::quota::TimeUnit;
use crate::error::{Result, ThrottleError};

/// A limiter that blocks until a cell is available.
///
/// Replenishes one cell per period up to `burst` cells. Waiting stops as
/// soon as the context is done; a cell is only consumed on admission.
pub struct TokenBucket {
    inner: DefaultDirectRateLimiter,
    period: Duration,
    burst: NonZeroU32,
}

impl TokenBucket {
    /// Wrap a prepared `governor` quota.
    pub fn from_quota(quota: governor::Quota) -> Self {
        Self {
            inner: DefaultDirectRateLimiter::direct(quota),
            period: quota.replenish_interval(),
            burst: quota.burst_size(),
        }
    }

    /// Allow `rate` events per second, with a burst of the same size.
    pub fn per_second(rate: NonZeroU32) -> Self {
        Self::from_quota(governor::Quota::per_second(rate))
    }

    /// Replenish one cell every `period`, holding at most `burst` cells.
    pub fn every(period: Duration, burst: NonZeroU32) -> Result<Self> {
        let quota = governor::Quota::with_period(period).ok_or_else(|| {
            ThrottleError::Config("token bucket period must be greater than zero".to_string())
        })?;
        Ok(Self::from_quota(quota.allow_burst(burst)))
    }

    /// Allow `requests` events per `unit`, holding at most `burst` cells.
    pub fn rate(requests: NonZeroU32, unit: TimeUnit, burst: NonZeroU32) -> Result<Self> {
        Self::every(unit.duration() / requests.get(), burst)
    }

    /// Time between two replenished cells.
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn burst(&self) -> NonZeroU32 {
        self.burst
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("period", &self.period)
            .field("burst", &self.burst)
            .finish()
    }
}

#[async_trait]
impl Limiter for TokenBucket {
    async fn wait(&self, ctx: &Context) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        tokio::select! {
            biased;
            err = ctx.done() => Err(err),
            _ = self.inner.until_ready() => {
                trace!(period = ?self.period, "Token bucket admitted");
                Ok(())
            }
        }
    }
}
