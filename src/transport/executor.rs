//! Delegate executors that perform the actual request.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::error::ThrottleError;
use crate::ratelimit::Context;

/// The downstream mechanism that sends a request once it is admitted.
#[async_trait]
pub trait Executor: Send + Sync {
    type Request: Send + 'static;
    type Response: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Perform `request`, giving up once `ctx` is done.
    async fn execute(
        &self,
        ctx: &Context,
        request: Self::Request,
    ) -> std::result::Result<Self::Response, Self::Error>;
}

/// Errors returned by [`HttpExecutor`].
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The context was done before a response arrived
    #[error("HTTP request aborted: {0}")]
    Aborted(ThrottleError),
}

/// Default executor sending requests with a `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    type Request = reqwest::Request;
    type Response = reqwest::Response;
    type Error = HttpError;

    async fn execute(
        &self,
        ctx: &Context,
        request: reqwest::Request,
    ) -> std::result::Result<reqwest::Response, HttpError> {
        if let Some(err) = ctx.err() {
            return Err(HttpError::Aborted(err));
        }

        let method = request.method().clone();
        let url = request.url().clone();

        tokio::select! {
            biased;
            err = ctx.done() => {
                debug!(%method, %url, error = %err, "HTTP request aborted");
                Err(HttpError::Aborted(err))
            }
            response = self.client.execute(request) => {
                let response = response?;
                debug!(%method, %url, status = %response.status(), "HTTP request completed");
                Ok(response)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{hanging_server, http_server, test_client};
    use reqwest::{Method, StatusCode, Url};
    use std::time::Duration;
    use tokio_test::assert_err;

    fn get(addr: std::net::SocketAddr) -> reqwest::Request {
        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        reqwest::Request::new(Method::GET, url)
    }

    #[tokio::test]
    async fn test_executes_request() {
        let addr = http_server("HTTP/1.1 200 OK").await;
        let executor = HttpExecutor::new(test_client());

        let response = executor
            .execute(&Context::background(), get(addr))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let addr = http_server("HTTP/1.1 429 Too Many Requests").await;
        let executor = HttpExecutor::new(test_client());

        let response = executor
            .execute(&Context::background(), get(addr))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_aborts_on_deadline() {
        let addr = hanging_server().await;
        let executor = HttpExecutor::new(test_client());
        let ctx = Context::background().with_timeout(Duration::from_millis(50));

        let err = assert_err!(executor.execute(&ctx, get(addr)).await);
        assert!(matches!(
            err,
            HttpError::Aborted(ThrottleError::DeadlineExceeded)
        ));
    }

    #[tokio::test]
    async fn test_done_context_skips_request() {
        let executor = HttpExecutor::new(test_client());
        let ctx = Context::background();
        ctx.cancel();

        // Nothing listens on port 9; the request must not be attempted.
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let err = assert_err!(
            executor
                .execute(&ctx, reqwest::Request::new(Method::GET, url))
                .await
        );
        assert!(matches!(err, HttpError::Aborted(ThrottleError::Cancelled)));
    }
}
