//! # Rate Limit Coordinator
//!
//! The single admission authority for every outbound source adapter. A
//! request is admitted only if the global budget AND the source's own
//! budget both have a token, and neither daily quota is used up.
//!
//! ## Architecture
//!
//! ```text
//!     Source adapters:
//!     arxiv ─────┐
//!     openalex ──┤
//!     pubmed ────┼──► Coordinator ──► Global bucket (shared budget)
//!     eia ───────┤         │
//!     (any) ─────┘         ├────────► Source buckets
//!                          │          ┌───────────────────┐
//!                          │          │ DashMap           │
//!                          │          │  name → bucket    │
//!                          │          └───────────────────┘
//!                          │
//!                          └────────► Daily counters
//!                                     ┌───────────────────┐
//!                                     │ (scope, day) → n  │
//!                                     └───────────────────┘
//! ```
//!
//! ## Consume Protocol
//!
//! 1. Count the attempt
//! 2. Lock the global bucket, then the source bucket (always this order)
//! 3. Refill both and check buckets plus daily quotas
//! 4. Denied: count the throttle, change nothing else
//! 5. Admitted: take one token from each bucket, bump both daily counters
//!
//! Because every consume holds the global bucket lock while it checks and
//! updates, two callers can never both spend the last token, and the daily
//! counters are checked and incremented as one step.
//!
//! ## Day Rollover
//!
//! Daily counters are keyed by UTC day, so yesterday's counts stop
//! applying the moment the day key changes. Stale keys are purged lazily
//! from [`can_proceed`](RateLimitCoordinator::can_proceed) once a day, or
//! on a schedule via [`spawn_housekeeping`](RateLimitCoordinator::spawn_housekeeping).

use super::{
    clock::{Clock, DayKey, SystemClock},
    config::{RateLimitConfig, RateLimitRegistry},
    core::{BucketStatus, TokenBucket},
    metrics::{RateLimitStats, SourceStats, StatsRecorder},
};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How often the inline day check purges stale counters.
const DAY_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default period for [`RateLimitCoordinator::spawn_housekeeping`].
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Whose quota a daily counter tracks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CounterScope {
    Global,
    Source(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DailyKey {
    scope: CounterScope,
    day: DayKey,
}

impl DailyKey {
    fn global(day: DayKey) -> Self {
        Self {
            scope: CounterScope::Global,
            day,
        }
    }

    fn source(name: &str, day: DayKey) -> Self {
        Self {
            scope: CounterScope::Source(name.to_owned()),
            day,
        }
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Denial {
    GlobalBucket,
    SourceBucket,
    SourceDailyQuota,
    GlobalDailyQuota,
}

impl Denial {
    fn as_str(&self) -> &'static str {
        match self {
            Self::GlobalBucket => "global bucket depleted",
            Self::SourceBucket => "source bucket depleted",
            Self::SourceDailyQuota => "source daily quota reached",
            Self::GlobalDailyQuota => "global daily quota reached",
        }
    }
}

/// Read-only view of one source, for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    /// Source name as given by the adapter.
    pub source: String,

    /// Effective limit (explicit entry or the default).
    pub config: RateLimitConfig,

    /// The source's own bucket.
    pub bucket: BucketStatus,

    /// Whether a request would be admitted right now.
    pub can_proceed: bool,

    /// Requests charged to today's quota.
    pub daily_count: u64,

    /// Today's quota, if the source has one.
    pub daily_limit: Option<u64>,

    /// Milliseconds until both buckets have a token.
    pub wait_time_ms: u64,

    /// Counters for this source, if it has been used.
    pub stats: Option<SourceStats>,
}

impl SourceStatus {
    /// Requests left today, if the source has a daily quota.
    pub fn daily_remaining(&self) -> Option<u64> {
        self.daily_limit
            .map(|limit| limit.saturating_sub(self.daily_count))
    }
}

/// Coordinates the global budget, per-source buckets and daily quotas.
///
/// Construct one per process and share it (see
/// [`SharedCoordinator`](crate::SharedCoordinator)); every adapter goes
/// through the same instance.
///
/// ## Example
///
/// ```rust
/// use sourcegate::RateLimitCoordinator;
///
/// let coordinator = RateLimitCoordinator::new();
///
/// // arxiv allows 3/min plus a burst of 1
/// for _ in 0..4 {
///     assert!(coordinator.consume("arxiv"));
/// }
/// assert!(!coordinator.consume("arxiv"));
///
/// // other sources are unaffected
/// assert!(coordinator.consume("openalex"));
/// ```
pub struct RateLimitCoordinator {
    registry: RateLimitRegistry,
    clock: Arc<dyn Clock>,
    global: TokenBucket,
    sources: DashMap<String, Arc<TokenBucket>, ahash::RandomState>,
    daily: DashMap<DailyKey, u64, ahash::RandomState>,
    stats: StatsRecorder,
    last_day_check: Mutex<Instant>,
}

impl RateLimitCoordinator {
    /// A coordinator with the built-in limits and the system clock.
    pub fn new() -> Self {
        Self::with_registry(RateLimitRegistry::default())
    }

    /// A coordinator for `registry`, driven by the system clock.
    pub fn with_registry(registry: RateLimitRegistry) -> Self {
        Self::with_clock(registry, Arc::new(SystemClock))
    }

    /// A coordinator for `registry`, driven by `clock`.
    ///
    /// Every source with an explicit entry gets its bucket up front; other
    /// names get one on first use.
    pub fn with_clock(registry: RateLimitRegistry, clock: Arc<dyn Clock>) -> Self {
        let sources = DashMap::with_hasher(ahash::RandomState::new());
        for name in registry.source_names() {
            let bucket = TokenBucket::with_clock(*registry.get_config(name), clock.clone());
            sources.insert(name.to_owned(), Arc::new(bucket));
        }

        let global = TokenBucket::with_clock(*registry.global(), clock.clone());
        let last_day_check = Mutex::new(clock.now());

        debug!(
            global = %registry.global(),
            sources = sources.len(),
            "Created rate limit coordinator"
        );

        Self {
            registry,
            clock,
            global,
            sources,
            daily: DashMap::with_hasher(ahash::RandomState::new()),
            stats: StatsRecorder::default(),
            last_day_check,
        }
    }

    /// The limits this coordinator enforces.
    #[inline]
    pub fn registry(&self) -> &RateLimitRegistry {
        &self.registry
    }

    /// Gets the bucket for `source`, creating it from the registry if needed.
    fn source_bucket(&self, source: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.sources.get(source) {
            return bucket.clone();
        }

        self.sources
            .entry(source.to_owned())
            .or_insert_with(|| {
                let config = *self.registry.get_config(source);
                debug!(source = %source, limit = %config, "Created bucket for unconfigured source");
                Arc::new(TokenBucket::with_clock(config, self.clock.clone()))
            })
            .clone()
    }

    fn daily_value(&self, key: &DailyKey) -> u64 {
        self.daily.get(key).map(|count| *count).unwrap_or(0)
    }

    /// First daily quota that would reject one more request, if any.
    fn daily_denial(&self, source: &str, config: &RateLimitConfig, day: DayKey) -> Option<Denial> {
        if let Some(limit) = config.requests_per_day {
            if self.daily_value(&DailyKey::source(source, day)) >= limit {
                return Some(Denial::SourceDailyQuota);
            }
        }
        if let Some(limit) = self.registry.global().requests_per_day {
            if self.daily_value(&DailyKey::global(day)) >= limit {
                return Some(Denial::GlobalDailyQuota);
            }
        }
        None
    }

    /// Whether a request for `source` would be admitted right now.
    ///
    /// Pure predicate: no token or counter changes. Runs the day-rollover
    /// check first.
    pub fn can_proceed(&self, source: &str) -> bool {
        self.check_day_reset();
        let bucket = self.source_bucket(source);
        let now = self.clock.now();

        self.global.peek_available(now) >= 1
            && bucket.peek_available(now) >= 1
            && self
                .daily_denial(source, self.registry.get_config(source), self.clock.day_key())
                .is_none()
    }

    /// Admits one request for `source` if every gate allows it.
    ///
    /// # Returns
    ///
    /// - `true`: one token was taken from the global and the source bucket
    ///   and both daily counters went up by one
    /// - `false`: throttled; only the throttle statistics changed
    pub fn consume(&self, source: &str) -> bool {
        self.stats.record_attempt(source);
        self.check_day_reset();

        let bucket = self.source_bucket(source);
        let config = self.registry.get_config(source);
        let now = self.clock.now();
        let day = self.clock.day_key();

        {
            let mut global = self.global.lock_at(now);
            let mut local = bucket.lock_at(now);

            let denial = if !global.has_token() {
                Some(Denial::GlobalBucket)
            } else if !local.has_token() {
                Some(Denial::SourceBucket)
            } else {
                self.daily_denial(source, config, day)
            };

            if let Some(denial) = denial {
                drop(local);
                drop(global);
                self.stats.record_throttled(source);
                debug!(source = %source, reason = denial.as_str(), "Request throttled");
                return false;
            }

            global.take_one();
            local.take_one();
            *self.daily.entry(DailyKey::source(source, day)).or_insert(0) += 1;
            *self.daily.entry(DailyKey::global(day)).or_insert(0) += 1;
        }

        self.stats.record_allowed(source, self.clock.utc_now());
        true
    }

    /// Milliseconds until both the global and the source bucket have a
    /// token; the longer of the two waits.
    pub fn get_wait_time(&self, source: &str) -> u64 {
        let bucket = self.source_bucket(source);
        self.global
            .time_until_available()
            .max(bucket.time_until_available())
    }

    /// Composite view of `source` for dashboards. Changes nothing.
    pub fn get_status(&self, source: &str) -> SourceStatus {
        let can_proceed = self.can_proceed(source);
        let bucket = self.source_bucket(source);
        let config = *self.registry.get_config(source);
        let now = self.clock.now();

        let bucket_status = bucket.peek_status(now);
        let global_status = self.global.peek_status(now);

        SourceStatus {
            source: source.to_owned(),
            config,
            bucket: bucket_status,
            can_proceed,
            daily_count: self.daily_count(source),
            daily_limit: config.requests_per_day,
            wait_time_ms: bucket_status
                .time_until_refill_ms
                .max(global_status.time_until_refill_ms),
            stats: self.stats.source(source),
        }
    }

    /// Snapshot of every counter plus the global bucket.
    pub fn get_stats(&self) -> RateLimitStats {
        let global = self.global.peek_status(self.clock.now());
        self.stats.snapshot(global, self.global_daily_count())
    }

    /// Requests charged to `source`'s quota today.
    pub fn daily_count(&self, source: &str) -> u64 {
        self.daily_value(&DailyKey::source(source, self.clock.day_key()))
    }

    /// Requests charged to the global quota today.
    pub fn global_daily_count(&self) -> u64 {
        self.daily_value(&DailyKey::global(self.clock.day_key()))
    }

    /// Sources that currently have a bucket, sorted by name.
    pub fn tracked_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Refills every bucket, clears all daily counters and zeroes the
    /// statistics. Meant for test isolation.
    pub fn reset(&self) {
        self.global.reset();
        for entry in self.sources.iter() {
            entry.value().reset();
        }
        self.daily.clear();
        self.stats.reset();
        *self.last_day_check.lock() = self.clock.now();

        info!(sources = self.sources.len(), "Reset rate limit coordinator");
    }

    /// Purges stale daily counters if a day has passed since the last check.
    fn check_day_reset(&self) {
        let now = self.clock.now();
        {
            let mut last = self.last_day_check.lock();
            if now.saturating_duration_since(*last) <= DAY_CHECK_INTERVAL {
                return;
            }
            *last = now;
        }

        let removed = self.purge_stale_counters();
        debug!(removed, "Daily counter check");
    }

    /// Removes daily counters for any day other than today.
    ///
    /// Returns the number of entries removed.
    pub fn purge_stale_counters(&self) -> usize {
        let today = self.clock.day_key();
        let mut removed = 0;
        self.daily.retain(|key, _| {
            let keep = key.day == today;
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            info!(removed, day = %today, "Purged stale daily counters");
        }
        removed
    }

    /// Runs [`purge_stale_counters`](Self::purge_stale_counters) every
    /// `interval` on the tokio runtime until `shutdown` is cancelled.
    ///
    /// The inline check in [`can_proceed`](Self::can_proceed) already keeps
    /// counters bounded; this is for processes that want a fixed schedule
    /// (see [`HOUSEKEEPING_INTERVAL`]).
    ///
    /// # Example
    ///
    /// ```rust
    /// use sourcegate::{RateLimitCoordinator, HOUSEKEEPING_INTERVAL};
    /// use std::sync::Arc;
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let coordinator = Arc::new(RateLimitCoordinator::new());
    /// let shutdown = CancellationToken::new();
    /// let handle = coordinator.clone().spawn_housekeeping(HOUSEKEEPING_INTERVAL, shutdown.clone());
    ///
    /// // on shutdown:
    /// shutdown.cancel();
    /// handle.await.unwrap();
    /// # }
    /// ```
    pub fn spawn_housekeeping(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let period = interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            info!(interval_ms = period.as_millis() as u64, "Started rate limit housekeeping");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Rate limit housekeeping stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.purge_stale_counters();
                    }
                }
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn daily_entries(&self) -> usize {
        self.daily.len()
    }
}

impl Default for RateLimitCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitCoordinator")
            .field("global", &self.global)
            .field("tracked_sources", &self.sources.len())
            .field("daily_counters", &self.daily.len())
            .finish()
    }
}
