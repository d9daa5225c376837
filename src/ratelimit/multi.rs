//! Combinator enforcing several limiters at once.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use super::context::Context;
use super::limiter::Limiter;
use crate::error::{Result, ThrottleError};

/// Presents several limiters as one; every limiter must admit.
///
/// Each [`wait`](Limiter::wait) dispatches to all limiters concurrently
/// under a child of the caller's context. The first failure, in completion
/// order, cancels that child so siblings can stop waiting early, and is
/// returned as is. Siblings that ignore cancellation are left to finish on
/// their own and their results are dropped.
///
/// A `MultiLimiter` with no limiters always admits.
#[derive(Clone, Default)]
pub struct MultiLimiter {
    limiters: Vec<Arc<dyn Limiter>>,
}

impl MultiLimiter {
    /// Create a combinator over the given limiters.
    pub fn new(limiters: Vec<Arc<dyn Limiter>>) -> Self {
        Self { limiters }
    }

    /// Add a limiter while building the combinator.
    pub fn with(mut self, limiter: impl Limiter + 'static) -> Self {
        self.limiters.push(Arc::new(limiter));
        self
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

impl FromIterator<Arc<dyn Limiter>> for MultiLimiter {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Limiter>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Debug for MultiLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiLimiter")
            .field("limiters", &self.limiters.len())
            .finish()
    }
}

#[async_trait]
impl Limiter for MultiLimiter {
    async fn wait(&self, ctx: &Context) -> Result<()> {
        if self.limiters.is_empty() {
            return Ok(());
        }

        let scope = ctx.with_cancel();
        // Siblings are released on every exit, including when this future is dropped.
        let _release = scope.drop_guard();

        // Set before the scope is cancelled, so a sibling's cancellation
        // can never be reported in place of the failure that caused it.
        let first_error: Arc<Mutex<Option<ThrottleError>>> = Arc::new(Mutex::new(None));

        let mut tasks = JoinSet::new();
        for limiter in &self.limiters {
            let limiter = Arc::clone(limiter);
            let scope = scope.clone();
            let first_error = Arc::clone(&first_error);
            tasks.spawn(async move {
                match limiter.wait(&scope).await {
                    Ok(()) => true,
                    Err(err) => {
                        first_error.lock().get_or_insert(err);
                        scope.cancel();
                        false
                    }
                }
            });
        }

        trace!(limiters = self.limiters.len(), "Waiting for all limiters");

        while let Some(joined) = tasks.join_next().await {
            let panicked = match joined {
                Ok(true) => continue,
                Ok(false) => None,
                Err(join_err) => Some(ThrottleError::Limiter(format!(
                    "limiter task failed: {join_err}"
                ))),
            };
            let failure = first_error
                .lock()
                .take()
                .or(panicked)
                .unwrap_or_else(|| ThrottleError::Limiter("limiter failed".to_string()));

            debug!(
                error = %failure,
                pending = tasks.len(),
                "Limiter denied admission"
            );
            scope.cancel();
            tasks.detach_all();
            return Err(failure);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Quota, TokenBucket};
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio_test::{assert_err, assert_ok};

    struct AlwaysAdmit;

    #[async_trait]
    impl Limiter for AlwaysAdmit {
        async fn wait(&self, _ctx: &Context) -> Result<()> {
            Ok(())
        }
    }

    struct Deny;

    #[async_trait]
    impl Limiter for Deny {
        async fn wait(&self, _ctx: &Context) -> Result<()> {
            Err(ThrottleError::Limiter("denied".to_string()))
        }
    }

    /// Blocks until the context is done and records that it noticed.
    struct UntilCancelled {
        observed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Limiter for UntilCancelled {
        async fn wait(&self, ctx: &Context) -> Result<()> {
            let err = ctx.done().await;
            self.observed.store(true, Ordering::SeqCst);
            Err(err)
        }
    }

    /// Sleeps for a fixed time regardless of cancellation.
    struct Stubborn {
        delay: Duration,
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Limiter for Stubborn {
        async fn wait(&self, _ctx: &Context) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl Limiter for Panics {
        async fn wait(&self, _ctx: &Context) -> Result<()> {
            panic!("limiter bug");
        }
    }

    fn nz(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_empty_always_admits() {
        let limiter = MultiLimiter::default();
        assert!(limiter.is_empty());

        for _ in 0..100 {
            assert_ok!(limiter.wait(&Context::background()).await);
        }
    }

    #[tokio::test]
    async fn test_empty_admits_cancelled_context() {
        let ctx = Context::background();
        ctx.cancel();
        assert_ok!(MultiLimiter::default().wait(&ctx).await);
    }

    #[tokio::test]
    async fn test_all_must_admit() {
        let limiter = MultiLimiter::default()
            .with(AlwaysAdmit)
            .with(Quota::new(Duration::from_secs(1), 1));
        let ctx = Context::background();

        let start = Instant::now();
        assert_ok!(limiter.wait(&ctx).await);
        let err = assert_err!(limiter.wait(&ctx).await);
        assert!(err.is_quota_exceeded());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_quota_short_circuits_blocking_bucket() {
        let limiter = MultiLimiter::default()
            .with(TokenBucket::per_second(nz(1)))
            .with(Quota::new(Duration::from_secs(1), 1));
        let ctx = Context::background();

        let start = Instant::now();
        assert_ok!(limiter.wait(&ctx).await);
        let err = assert_err!(limiter.wait(&ctx).await);
        assert!(err.is_quota_exceeded());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_bucket_paces_until_quota_ceiling() {
        let limiter = MultiLimiter::default()
            .with(Quota::new(Duration::from_secs(1), 101))
            .with(TokenBucket::every(Duration::from_millis(1), nz(1)).unwrap());
        let ctx = Context::background();

        let start = Instant::now();
        for _ in 0..101 {
            assert_ok!(limiter.wait(&ctx).await);
        }
        assert!(start.elapsed() >= Duration::from_millis(100));

        let err = assert_err!(limiter.wait(&ctx).await);
        assert!(err.is_quota_exceeded());
    }

    #[tokio::test]
    async fn test_failure_cancels_siblings() {
        let observed = Arc::new(AtomicBool::new(false));
        let limiter = MultiLimiter::default()
            .with(UntilCancelled {
                observed: observed.clone(),
            })
            .with(Deny);

        let err = assert_err!(limiter.wait(&Context::background()).await);
        assert!(matches!(err, ThrottleError::Limiter(_)));

        tokio::time::timeout(Duration::from_secs(1), async {
            while !observed.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("sibling never observed cancellation");
    }

    #[tokio::test]
    async fn test_failure_does_not_wait_for_stubborn_sibling() {
        let finished = Arc::new(AtomicUsize::new(0));
        let limiter = MultiLimiter::default()
            .with(Stubborn {
                delay: Duration::from_millis(300),
                finished: finished.clone(),
            })
            .with(Deny);

        let start = Instant::now();
        assert_err!(limiter.wait(&Context::background()).await);
        assert!(start.elapsed() < Duration::from_millis(250));

        // The detached wait still runs to completion.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_waits_for_every_limiter() {
        let finished = Arc::new(AtomicUsize::new(0));
        let limiter = MultiLimiter::default()
            .with(Stubborn {
                delay: Duration::from_millis(30),
                finished: finished.clone(),
            })
            .with(Stubborn {
                delay: Duration::from_millis(10),
                finished: finished.clone(),
            })
            .with(AlwaysAdmit);

        assert_ok!(limiter.wait(&Context::background()).await);
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_limiters_run_concurrently() {
        let finished = Arc::new(AtomicUsize::new(0));
        let limiter: MultiLimiter = (0..4)
            .map(|_| {
                Arc::new(Stubborn {
                    delay: Duration::from_millis(100),
                    finished: finished.clone(),
                }) as Arc<dyn Limiter>
            })
            .collect();

        let start = Instant::now();
        assert_ok!(limiter.wait(&Context::background()).await);
        assert!(start.elapsed() < Duration::from_millis(350));
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_root_cancellation_reaches_limiters() {
        let observed = Arc::new(AtomicBool::new(false));
        let limiter = MultiLimiter::default().with(UntilCancelled {
            observed: observed.clone(),
        });
        let ctx = Context::background();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = assert_err!(limiter.wait(&ctx).await);
        assert!(matches!(err, ThrottleError::Cancelled));
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_limiter_surfaces_as_error() {
        let limiter = MultiLimiter::default().with(AlwaysAdmit).with(Panics);
        let err = assert_err!(limiter.wait(&Context::background()).await);
        assert!(matches!(err, ThrottleError::Limiter(_)));
    }

    #[tokio::test]
    async fn test_nested_combinators() {
        let inner = MultiLimiter::default()
            .with(AlwaysAdmit)
            .with(Quota::new(Duration::from_secs(60), 2));
        let outer = MultiLimiter::default().with(inner).with(AlwaysAdmit);
        let ctx = Context::background();

        assert_ok!(outer.wait(&ctx).await);
        assert_ok!(outer.wait(&ctx).await);
        assert!(assert_err!(outer.wait(&ctx).await).is_quota_exceeded());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_quota_error_wins_over_cancelled_bucket() {
        for _ in 0..500 {
            let limiter = MultiLimiter::default()
                .with(TokenBucket::every(Duration::from_secs(100), nz(1)).unwrap())
                .with(Quota::new(Duration::from_secs(100), 1));
            let ctx = Context::background();

            assert_ok!(limiter.wait(&ctx).await);
            let err = assert_err!(limiter.wait(&ctx).await);
            assert!(err.is_quota_exceeded(), "got {err:?}");
            assert!(!ctx.is_done());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_denial_wins_over_cancelled_sibling() {
        for _ in 0..500 {
            let observed = Arc::new(AtomicBool::new(false));
            let limiter = MultiLimiter::default()
                .with(UntilCancelled {
                    observed: observed.clone(),
                })
                .with(UntilCancelled {
                    observed: observed.clone(),
                })
                .with(Deny);

            let err = assert_err!(limiter.wait(&Context::background()).await);
            assert!(matches!(err, ThrottleError::Limiter(_)), "got {err:?}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_quota() {
        let limiter = Arc::new(
            MultiLimiter::default()
                .with(AlwaysAdmit)
                .with(Quota::new(Duration::from_secs(60), 10)),
        );

        let mut handles = Vec::new();
        for _ in 0..40 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait(&Context::background()).await.is_ok()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }
}
