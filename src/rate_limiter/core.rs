//! # Token Bucket
//!
//! One bucket guards one resource: the global budget or a single source.
//!
//! ## Refill Model
//!
//! ```text
//!     capacity = requests_per_minute + burst_size
//!     refill   = requests_per_minute / 60_000 tokens per ms
//!
//!     t=0      [■■■■] 4/4     full at creation
//!     4 reqs   [    ] 0/4     depleted
//!     t+10s    [    ] 0/4     0.5 token accrued, clock NOT advanced
//!     t+20s    [■   ] 1/4     1 whole token added, clock advanced
//! ```
//!
//! Whole tokens are added only once at least one has accrued. While less
//! than one has accrued the refill timestamp stays where it is, so frequent
//! polling never throws fractional progress away.
//!
//! ## Thread Safety
//!
//! State lives behind a `parking_lot::Mutex`. The coordinator takes the
//! lock through a `BucketGuard` when it needs to check and consume two
//! buckets as a single step.

use super::clock::Clock;
use super::config::RateLimitConfig;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

const MS_PER_MINUTE: u128 = 60_000;

/// Point-in-time view of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketStatus {
    /// Whole tokens available right now.
    pub available: u64,

    /// Maximum tokens the bucket holds.
    pub capacity: u64,

    /// Milliseconds until the next whole token; 0 when one is available.
    pub time_until_refill_ms: u64,
}

impl BucketStatus {
    /// True when at least one token is available.
    #[inline]
    pub fn is_available(&self) -> bool {
        self.available >= 1
    }

    /// Fraction of capacity in use, from 0.0 (full) to 1.0 (empty).
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            1.0 - (self.available as f64 / self.capacity as f64)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Continuous-refill token bucket.
///
/// ## Example
///
/// ```rust
/// use sourcegate::{RateLimitConfig, TokenBucket};
///
/// // 3 per minute plus 1 burst: capacity 4
/// let bucket = TokenBucket::new(RateLimitConfig::per_minute(3).with_burst(1));
///
/// for _ in 0..4 {
///     assert!(bucket.try_consume());
/// }
/// assert!(!bucket.try_consume());
/// // one token every 20s
/// assert!(bucket.time_until_available() > 19_000);
/// ```
pub struct TokenBucket {
    capacity: u64,
    requests_per_minute: u32,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Creates a full bucket driven by the system clock.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(super::clock::SystemClock))
    }

    /// Creates a full bucket driven by `clock`.
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            capacity: config.capacity(),
            requests_per_minute: config.requests_per_minute,
            state: Mutex::new(BucketState {
                tokens: config.capacity() as f64,
                last_refill: now,
            }),
            clock,
        }
    }

    /// Maximum tokens this bucket holds.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Tokens added per elapsed millisecond.
    #[inline]
    pub fn refill_rate_per_ms(&self) -> f64 {
        self.requests_per_minute as f64 / 60_000.0
    }

    /// Tops the bucket up for the time elapsed since the last refill.
    pub fn refill(&self) {
        let now = self.clock.now();
        self.lock_at(now);
    }

    /// Takes one token if one is available.
    ///
    /// # Returns
    ///
    /// - `true` if a token was taken
    /// - `false` if the bucket is depleted (nothing changes)
    pub fn try_consume(&self) -> bool {
        self.lock().try_consume()
    }

    /// Milliseconds until a whole token is available; 0 if one is now.
    pub fn time_until_available(&self) -> u64 {
        self.lock().time_until_available()
    }

    /// Current status, refilled first so it is never stale.
    pub fn status(&self) -> BucketStatus {
        self.lock().status()
    }

    /// Restores full capacity and restarts the refill clock.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.tokens = self.capacity as f64;
        state.last_refill = now;
    }

    /// Whole tokens the bucket would hold after a refill at `now`, without
    /// writing anything back.
    pub(crate) fn peek_available(&self, now: Instant) -> u64 {
        self.peek_status(now).available
    }

    /// Status as of `now`, computed on a copy of the state.
    pub(crate) fn peek_status(&self, now: Instant) -> BucketStatus {
        let state = *self.state.lock();
        let (tokens, advanced) = self.project(&state, now);
        let projected = BucketState {
            tokens,
            last_refill: if advanced { now } else { state.last_refill },
        };
        BucketStatus {
            available: projected.tokens.floor() as u64,
            capacity: self.capacity,
            time_until_refill_ms: self.wait_ms(&projected, now),
        }
    }

    /// Locks and refills the bucket, returning a guard for compound updates.
    pub(crate) fn lock(&self) -> BucketGuard<'_> {
        let now = self.clock.now();
        self.lock_at(now)
    }

    pub(crate) fn lock_at(&self, now: Instant) -> BucketGuard<'_> {
        let mut guard = BucketGuard {
            bucket: self,
            state: self.state.lock(),
            now,
        };
        guard.refill();
        guard
    }

    /// Milliseconds elapsed since `last_refill`, clamped at zero.
    fn elapsed_ms(state: &BucketState, now: Instant) -> u128 {
        now.saturating_duration_since(state.last_refill).as_millis()
    }

    /// Token count after a refill at `now`, and whether the refill clock moves.
    fn project(&self, state: &BucketState, now: Instant) -> (f64, bool) {
        // integer arithmetic keeps "has a whole token accrued" exact
        let whole = Self::elapsed_ms(state, now) * self.requests_per_minute as u128 / MS_PER_MINUTE;
        if whole >= 1 {
            let topped = (state.tokens + whole as f64).min(self.capacity as f64);
            (topped, true)
        } else {
            (state.tokens, false)
        }
    }

    /// Milliseconds until `state` holds a whole token, given no consumption.
    fn wait_ms(&self, state: &BucketState, now: Instant) -> u64 {
        if state.tokens >= 1.0 {
            return 0;
        }
        let deficit = (1.0 - state.tokens).ceil() as u128;
        let rpm = self.requests_per_minute.max(1) as u128;
        // ceil(deficit / rate), less what has already accrued toward it
        let needed_ms = (deficit * MS_PER_MINUTE + rpm - 1) / rpm;
        needed_ms.saturating_sub(Self::elapsed_ms(state, now)) as u64
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = *self.state.lock();
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("tokens", &state.tokens)
            .finish()
    }
}

/// Exclusive, already-refilled access to a bucket.
pub(crate) struct BucketGuard<'a> {
    bucket: &'a TokenBucket,
    state: MutexGuard<'a, BucketState>,
    now: Instant,
}

impl BucketGuard<'_> {
    fn refill(&mut self) {
        let (tokens, advanced) = self.bucket.project(&self.state, self.now);
        if advanced {
            self.state.tokens = tokens;
            self.state.last_refill = self.now;
        }
    }

    /// Whole tokens available.
    pub(crate) fn available(&self) -> u64 {
        self.state.tokens.floor() as u64
    }

    pub(crate) fn has_token(&self) -> bool {
        self.state.tokens >= 1.0
    }

    /// Removes one token. Callers check [`has_token`](Self::has_token) first.
    pub(crate) fn take_one(&mut self) {
        debug_assert!(self.state.tokens >= 1.0);
        self.state.tokens = (self.state.tokens - 1.0).max(0.0);
    }

    pub(crate) fn try_consume(&mut self) -> bool {
        if self.has_token() {
            self.take_one();
            true
        } else {
            false
        }
    }

    pub(crate) fn time_until_available(&self) -> u64 {
        self.bucket.wait_ms(&self.state, self.now)
    }

    pub(crate) fn status(&self) -> BucketStatus {
        BucketStatus {
            available: self.available(),
            capacity: self.bucket.capacity,
            time_until_refill_ms: self.time_until_available(),
        }
    }

    #[cfg(test)]
    pub(crate) fn tokens(&self) -> f64 {
        self.state.tokens
    }
}
