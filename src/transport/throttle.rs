//! Transport that holds every request until its limiters admit it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, trace};

use super::executor::{Executor, HttpExecutor};
use crate::error::ThrottleError;
use crate::ratelimit::{Context, Limiter, MultiLimiter};

/// Error returned by [`ThrottlingTransport`].
///
/// Both variants display as the error they wrap.
#[derive(Error, Debug)]
pub enum TransportError<E> {
    /// A limiter refused admission; the request was never sent
    #[error(transparent)]
    Throttled(ThrottleError),

    /// The delegate executor failed
    #[error(transparent)]
    Delegate(E),
}

impl<E> TransportError<E> {
    pub fn is_throttled(&self) -> bool {
        matches!(self, TransportError::Throttled(_))
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, TransportError::Throttled(err) if err.is_quota_exceeded())
    }

    /// The limiter failure, if admission was refused.
    pub fn throttle_error(&self) -> Option<&ThrottleError> {
        match self {
            TransportError::Throttled(err) => Some(err),
            TransportError::Delegate(_) => None,
        }
    }

    /// The executor's own error, if the request was sent.
    pub fn into_delegate(self) -> Option<E> {
        match self {
            TransportError::Throttled(_) => None,
            TransportError::Delegate(err) => Some(err),
        }
    }
}

/// Gates an [`Executor`] behind a limiter.
///
/// Built once and shared across requests; all throttling state lives in the
/// limiters. The transport is itself an [`Executor`], so transports stack.
pub struct ThrottlingTransport<E = HttpExecutor> {
    /// Used to make the actual requests
    executor: E,
    limiter: Arc<dyn Limiter>,
}

impl ThrottlingTransport<HttpExecutor> {
    /// Throttle requests sent with a default `reqwest` client.
    pub fn new(limiters: Vec<Arc<dyn Limiter>>) -> Self {
        Self::custom(HttpExecutor::default(), limiters)
    }
}

impl<E: Executor> ThrottlingTransport<E> {
    /// Throttle requests sent through `executor`, enforcing every limiter.
    pub fn custom(executor: E, limiters: Vec<Arc<dyn Limiter>>) -> Self {
        Self::with_limiter(executor, Arc::new(MultiLimiter::new(limiters)))
    }

    /// Throttle requests sent through `executor` with a prepared limiter.
    pub fn with_limiter(executor: E, limiter: Arc<dyn Limiter>) -> Self {
        Self { executor, limiter }
    }

    /// Like [`custom`](Self::custom), falling back to `E::default()` when no
    /// executor is given.
    pub fn from_parts(executor: Option<E>, limiters: Vec<Arc<dyn Limiter>>) -> Self
    where
        E: Default,
    {
        Self::custom(executor.unwrap_or_default(), limiters)
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn limiter(&self) -> &Arc<dyn Limiter> {
        &self.limiter
    }

    /// Wait for admission under `ctx`, then send `request`.
    ///
    /// On refusal the executor is never invoked. Otherwise the executor's
    /// result is returned unmodified.
    #[instrument(skip_all)]
    pub async fn execute(
        &self,
        ctx: &Context,
        request: E::Request,
    ) -> Result<E::Response, TransportError<E::Error>> {
        if let Err(err) = self.limiter.wait(ctx).await {
            debug!(error = %err, "Request throttled");
            return Err(TransportError::Throttled(err));
        }

        trace!("Request admitted");
        self.executor
            .execute(ctx, request)
            .await
            .map_err(TransportError::Delegate)
    }

    /// [`execute`](Self::execute) without cancellation or deadline.
    pub async fn execute_background(
        &self,
        request: E::Request,
    ) -> Result<E::Response, TransportError<E::Error>> {
        self.execute(&Context::background(), request).await
    }
}

impl<E: fmt::Debug> fmt::Debug for ThrottlingTransport<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottlingTransport")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<E: Executor> Executor for ThrottlingTransport<E> {
    type Request = E::Request;
    type Response = E::Response;
    type Error = TransportError<E::Error>;

    async fn execute(
        &self,
        ctx: &Context,
        request: E::Request,
    ) -> Result<E::Response, TransportError<E::Error>> {
        ThrottlingTransport::execute(self, ctx, request).await
    }
}
