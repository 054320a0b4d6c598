//! Shared rate limiters and iteration budgets.
//!
//! The limiter is a semaphore fed by one producer task; the budget is a single
//! atomic counter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;

use crate::context::ExecContext;
use crate::error::LoadgenError;

/// Token source gating statement (QPS) or trx-start (TPS) execution.
///
/// Waiters block in [`RateLimiter::wait`] until a token is released. A closed
/// limiter lets every waiter through.
#[derive(Debug)]
pub struct RateLimiter {
    tokens: Semaphore,
}

impl RateLimiter {
    /// Limiter whose tokens are released only by [`RateLimiter::add_tokens`].
    #[must_use]
    pub fn manual() -> Arc<Self> {
        Arc::new(Self {
            tokens: Semaphore::new(0),
        })
    }

    /// Release `rate` tokens per second, evenly spaced, until `ctx` ends.
    ///
    /// At most one unclaimed token is banked, so idle periods do not turn into bursts.
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn per_second(rate: u32, ctx: &ExecContext) -> Arc<Self> {
        let limiter = Self::manual();
        let producer = Arc::clone(&limiter);
        let ctx = ctx.clone();
        let period = Duration::from_secs(1) / rate.max(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            while ctx.run(async {
                ticker.tick().await;
                Ok(())
            })
            .await
            .is_ok()
            {
                if producer.tokens.available_permits() == 0 {
                    producer.tokens.add_permits(1);
                }
            }
            producer.close();
            tracing::debug!("rate limiter ({rate}/s) stopped");
        });
        limiter
    }

    pub fn add_tokens(&self, n: usize) {
        self.tokens.add_permits(n);
    }

    /// Stop limiting: current and future waiters return immediately.
    pub fn close(&self) {
        self.tokens.close();
    }

    /// Wait for one token.
    ///
    /// # Errors
    /// Returns a cancellation-class error if `ctx` ends before a token is available.
    pub async fn wait(&self, ctx: &ExecContext) -> Result<(), LoadgenError> {
        ctx.run(async {
            if let Ok(permit) = self.tokens.acquire().await {
                permit.forget();
            }
            Ok(())
        })
        .await
    }
}

/// Cap on the total iterations run by a group of clients.
#[derive(Debug)]
pub struct IterBudget {
    count: AtomicU64,
    cap: u64,
}

impl IterBudget {
    #[must_use]
    pub fn new(cap: u64) -> Arc<Self> {
        Arc::new(Self {
            count: AtomicU64::new(0),
            cap,
        })
    }

    /// Claim one iteration; true if this claim went past the cap.
    pub fn increment_and_check(&self) -> bool {
        self.count.fetch_add(1, Ordering::Relaxed) + 1 > self.cap
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn cap(&self) -> u64 {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exceeded_after_cap() {
        let budget = IterBudget::new(2);
        assert!(!budget.increment_and_check());
        assert!(!budget.increment_and_check());
        assert!(budget.increment_and_check());
        assert_eq!(budget.count(), 3);
    }

    #[tokio::test]
    async fn manual_limiter_releases_tokens() {
        let ctx = ExecContext::default();
        let limiter = RateLimiter::manual();
        limiter.add_tokens(2);
        limiter.wait(&ctx).await.unwrap();
        limiter.wait(&ctx).await.unwrap();

        let waiting = ctx.clone().with_timeout(Duration::from_millis(20));
        let err = limiter.wait(&waiting).await.unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn closed_limiter_passes_through() {
        let ctx = ExecContext::default();
        let limiter = RateLimiter::manual();
        limiter.close();
        limiter.wait(&ctx).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ticking_limiter_stops_with_context() {
        let ctx = ExecContext::default();
        let limiter = RateLimiter::per_second(100, &ctx);
        limiter.wait(&ctx).await.unwrap();
        limiter.wait(&ctx).await.unwrap();
        ctx.cancel();
        assert!(limiter.wait(&ctx).await.unwrap_err().is_cancellation());
    }
}
