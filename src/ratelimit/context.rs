//! Cancellation contexts passed through admission and request execution.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::ThrottleError;

/// A cancellation scope with an optional deadline.
///
/// Contexts form a tree. Deriving a child with [`Context::with_cancel`] or
/// [`Context::with_timeout`] produces a scope that is cancelled whenever its
/// parent is, while cancelling the child leaves the parent untouched.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A root context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Wrap a token owned by the host application.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a child scope that can be cancelled independently.
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child scope that expires after `timeout`.
    ///
    /// The child never outlives the parent's own deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.with_cancel(),
        }
    }

    /// Derive a child scope that expires at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancel this scope and every scope derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns a guard that cancels this scope when dropped.
    pub fn drop_guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }

    /// The deadline of this scope, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The reason this scope is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ThrottleError> {
        if self.token.is_cancelled() {
            return Some(ThrottleError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ThrottleError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once this scope is cancelled or its deadline passes.
    pub async fn done(&self) -> ThrottleError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => ThrottleError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ThrottleError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ThrottleError::Cancelled
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
