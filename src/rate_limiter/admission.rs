//! # Async Admission
//!
//! Lets an adapter say "run this under the rate limit, waiting if needed,
//! but not longer than `max_wait_ms`".
//!
//! ```text
//!     wait = get_wait_time(source)
//!       │
//!       ├─ 0 ─────────────────────► go
//!       ├─ > max_wait_ms ─────────► RateLimitExceeded (no sleep)
//!       └─ otherwise ─► sleep(wait) ─► can_proceed? ─► go / RateLimitExceeded
//!
//!     go: consume(source) ─► false ─► RateLimitExceeded (lost race)
//!                         └► true ──► run work
//! ```
//!
//! The sleep is a tokio timer, so the task yields instead of polling. The
//! re-check after waiting is required: another task may have taken the
//! token that freed up. Cancellation is the caller's job (wrap the future
//! in `tokio::time::timeout` or `select!`).

use super::{error::RateLimitExceeded, manager::RateLimitCoordinator};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

impl RateLimitCoordinator {
    /// Waits until `source` can probably proceed, up to `max_wait_ms`.
    ///
    /// # Returns
    ///
    /// - `true` immediately when no wait is needed
    /// - `false` immediately when the wait would exceed `max_wait_ms`
    /// - otherwise, after sleeping for the estimated wait, whether the
    ///   request would now be admitted
    pub async fn wait_for_token(&self, source: &str, max_wait_ms: u64) -> bool {
        self.wait_for_token_inner(source, max_wait_ms).await.is_ok()
    }

    /// `Err` carries the estimated wait when it exceeded the bound; `None`
    /// when the wait finished but capacity was gone.
    async fn wait_for_token_inner(&self, source: &str, max_wait_ms: u64) -> Result<(), Option<u64>> {
        let wait_ms = self.get_wait_time(source);
        if wait_ms == 0 {
            return Ok(());
        }

        if wait_ms > max_wait_ms {
            warn!(
                source = %source,
                wait_ms,
                max_wait_ms,
                "Rate limit wait exceeds bound"
            );
            return Err(Some(wait_ms));
        }

        debug!(source = %source, wait_ms, "Waiting for rate limit token");
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;

        if self.can_proceed(source) {
            Ok(())
        } else {
            Err(None)
        }
    }

    /// Runs `work` once `source` is admitted.
    ///
    /// # Errors
    ///
    /// [`RateLimitExceeded`] when the wait would exceed `max_wait_ms`, or
    /// when another request took the capacity first. `work` is not called
    /// in either case.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sourcegate::RateLimitCoordinator;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let coordinator = RateLimitCoordinator::new();
    ///
    /// let result = coordinator
    ///     .execute_with_rate_limit("openalex", || async { "works page 1" }, 5_000)
    ///     .await;
    ///
    /// assert_eq!(result.unwrap(), "works page 1");
    /// # }
    /// ```
    pub async fn execute_with_rate_limit<F, Fut, T>(
        &self,
        source: &str,
        work: F,
        max_wait_ms: u64,
    ) -> Result<T, RateLimitExceeded>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.wait_for_token_inner(source, max_wait_ms).await {
            Ok(()) => {}
            Err(Some(wait_ms)) => {
                return Err(RateLimitExceeded::wait_too_long(source, max_wait_ms, wait_ms));
            }
            Err(None) => {
                warn!(source = %source, "Capacity taken while waiting for rate limit");
                return Err(RateLimitExceeded::lost_race(source, max_wait_ms));
            }
        }

        if !self.consume(source) {
            warn!(source = %source, "Lost rate limit race after waiting");
            return Err(RateLimitExceeded::lost_race(source, max_wait_ms));
        }

        Ok(work().await)
    }
}
