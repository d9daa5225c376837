//! Fixed-window quota.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::context::Context;
use super::limiter::Limiter;
use crate::error::{Result, ThrottleError};

/// Time unit for quotas and rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// Counter state for the current window.
#[derive(Debug, Default)]
struct Window {
    /// Unset until the first admission attempt
    start: Option<Instant>,
    count: u64,
}

/// Allows `limit` events per `interval` and fails, rather than blocks, once
/// the limit is reached.
///
/// Useful for long-term limits where failing is more appropriate than
/// waiting. The first window starts at the first admission attempt, not at
/// construction. Once exhausted, a window stays exhausted until it elapses;
/// denied attempts still count against it.
#[derive(Debug)]
pub struct Quota {
    interval: Duration,
    limit: u64,
    window: Mutex<Window>,
}

impl Quota {
    /// Create a quota allowing `limit` events within `interval`.
    pub fn new(interval: Duration, limit: u64) -> Self {
        Self {
            interval,
            limit,
            window: Mutex::new(Window::default()),
        }
    }

    /// Create a quota allowing `limit` events per `unit`.
    pub fn per(unit: TimeUnit, limit: u64) -> Self {
        Self::new(unit.duration(), limit)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Count one event against the current window.
    ///
    /// Never blocks. Returns [`ThrottleError::QuotaExceeded`] once more than
    /// `limit` events have been attempted in the window.
    pub fn try_admit(&self) -> Result<()> {
        let mut window = self.window.lock();
        let now = Instant::now();

        let start = *window.start.get_or_insert(now);
        if self.has_elapsed(start, now) {
            debug!(
                interval = ?self.interval,
                previous_count = window.count,
                "Quota window rolled over"
            );
            window.start = Some(now);
            window.count = 0;
        }

        window.count = window.count.saturating_add(1);
        if window.count > self.limit {
            debug!(
                count = window.count,
                limit = self.limit,
                "Quota exceeded"
            );
            return Err(ThrottleError::QuotaExceeded);
        }

        trace!(count = window.count, limit = self.limit, "Quota admitted");
        Ok(())
    }

    /// Admissions left in the current window.
    pub fn remaining(&self) -> u64 {
        let window = self.window.lock();
        match window.start {
            Some(start) if !self.has_elapsed(start, Instant::now()) => {
                self.limit.saturating_sub(window.count)
            }
            _ => self.limit,
        }
    }

    /// Time until the current window ends, or `None` before first use.
    pub fn resets_in(&self) -> Option<Duration> {
        let window = self.window.lock();
        let start = window.start?;
        let end = start.checked_add(self.interval)?;
        Some(end.saturating_duration_since(Instant::now()))
    }

    /// The window rolls over strictly after `start + interval`.
    fn has_elapsed(&self, start: Instant, now: Instant) -> bool {
        match start.checked_add(self.interval) {
            Some(end) => now > end,
            None => false,
        }
    }
}

#[async_trait]
impl Limiter for Quota {
    async fn wait(&self, _ctx: &Context) -> Result<()> {
        self.try_admit()
    }
}
