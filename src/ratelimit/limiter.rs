//! Limiter trait shared by quotas, token buckets and combinators.

use std::sync::Arc;

use async_trait::async_trait;

use super::context::Context;
use crate::error::Result;

/// Anything that can decide whether one unit of work may proceed now.
///
/// Implementations may block until admission is possible (token buckets),
/// return immediately (quotas), or fan out to other limiters
/// ([`MultiLimiter`](super::MultiLimiter)). Blocking implementations should
/// stop waiting once `ctx` is done and return the context's error.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// Wait for admission of one event.
    async fn wait(&self, ctx: &Context) -> Result<()>;
}

#[async_trait]
impl<L: Limiter + ?Sized> Limiter for Arc<L> {
    async fn wait(&self, ctx: &Context) -> Result<()> {
        (**self).wait(ctx).await
    }
}

#[async_trait]
impl<L: Limiter + ?Sized> Limiter for Box<L> {
    async fn wait(&self, ctx: &Context) -> Result<()> {
        (**self).wait(ctx).await
    }
}
