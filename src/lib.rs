//! httpthrottle - client-side HTTP request throttling
//!
//! This crate holds outbound requests until a set of limiters admits them.
//! Blocking token buckets and failing fixed-window quotas are combined into
//! one admission decision by [`ratelimit::MultiLimiter`], and
//! [`transport::ThrottlingTransport`] only hands a request to the real
//! executor once that decision succeeds.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod transport;

pub use config::ThrottleConfig;
pub use error::{Result, ThrottleError};
pub use ratelimit::{Context, Limiter, MultiLimiter, Quota, TimeUnit, TokenBucket};
pub use transport::{Executor, HttpExecutor, ThrottlingTransport, TransportError};
