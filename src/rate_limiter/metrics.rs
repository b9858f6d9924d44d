//! # Admission Statistics
//!
//! Counters for allowed and throttled requests, globally and per source,
//! read by dashboards and telemetry through immutable snapshots.
//!
//! ```text
//!     RateLimitStats:
//!     ┌─────────────────────────────────────┐
//!     │  Total Requests: 120                │
//!     │  Throttled:      18  (15.00%)       │
//!     │  Global Bucket:  92/110             │
//!     │                                     │
//!     │  arxiv     4 ok / 6 throttled       │
//!     │  openalex 98 ok / 12 throttled      │
//!     │                                     │
//!     │  Health: ⚠️ Degraded                │
//!     └─────────────────────────────────────┘
//! ```
//!
//! Counters only ever grow, except on an explicit reset.

use super::core::BucketStatus;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Throttle ratio above which the limiter reports [`HealthStatus::Critical`].
const CRITICAL_THROTTLE_RATIO: f64 = 0.3;

/// Throttle ratio above which the limiter reports [`HealthStatus::Degraded`].
const DEGRADED_THROTTLE_RATIO: f64 = 0.1;

/// Per-source counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    /// Requests that were admitted.
    pub requests: u64,

    /// Requests that were throttled.
    pub throttled: u64,

    /// When the most recent admitted request went out.
    pub last_request_at: Option<DateTime<Utc>>,
}

impl SourceStats {
    /// Admitted plus throttled.
    #[inline]
    pub fn attempts(&self) -> u64 {
        self.requests + self.throttled
    }

    /// Fraction of attempts that were throttled (0.0 with no attempts).
    pub fn throttle_rate(&self) -> f64 {
        match self.attempts() {
            0 => 0.0,
            total => self.throttled as f64 / total as f64,
        }
    }
}

/// Snapshot of every counter plus the global bucket.
///
/// ## Example
///
/// ```rust
/// use sourcegate::RateLimitCoordinator;
///
/// let coordinator = RateLimitCoordinator::new();
/// coordinator.consume("arxiv");
///
/// let stats = coordinator.get_stats();
/// assert_eq!(stats.total_requests, 1);
/// assert_eq!(stats.by_source["arxiv"].requests, 1);
/// println!("{}", stats.summary());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStats {
    /// Every `consume` call, admitted or not.
    pub total_requests: u64,

    /// `consume` calls that were denied.
    pub throttled_requests: u64,

    /// Counters per source name.
    pub by_source: BTreeMap<String, SourceStats>,

    /// Global bucket at snapshot time.
    pub global: BucketStatus,

    /// Requests charged to today's global daily quota.
    pub global_daily_count: u64,
}

impl RateLimitStats {
    /// Fraction of requests admitted (1.0 with no requests).
    pub fn success_rate(&self) -> f64 {
        1.0 - self.throttle_rate()
    }

    /// Fraction of requests throttled (0.0 with no requests).
    pub fn throttle_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.throttled_requests as f64 / self.total_requests as f64
        }
    }

    /// Requests admitted.
    #[inline]
    pub fn allowed_requests(&self) -> u64 {
        self.total_requests.saturating_sub(self.throttled_requests)
    }

    /// Source with the most throttled requests, if any were throttled.
    pub fn most_throttled_source(&self) -> Option<(&str, &SourceStats)> {
        self.by_source
            .iter()
            .filter(|(_, stats)| stats.throttled > 0)
            .max_by_key(|(_, stats)| stats.throttled)
            .map(|(name, stats)| (name.as_str(), stats))
    }

    /// Quick assessment for alerting.
    ///
    /// - **Critical**: more than 30% of requests throttled
    /// - **Degraded**: more than 10% throttled, or the global bucket is empty
    /// - **Healthy**: otherwise
    pub fn health_status(&self) -> HealthStatus {
        let ratio = self.throttle_rate();
        if ratio > CRITICAL_THROTTLE_RATIO {
            HealthStatus::Critical
        } else if ratio > DEGRADED_THROTTLE_RATIO || !self.global.is_available() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Human-readable report for logs or a status page.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Rate Limit Stats:\n\
             ├─ Requests:\n\
             │  ├─ Total: {}\n\
             │  ├─ Allowed: {}\n\
             │  └─ Throttled: {} ({:.2}%)\n\
             ├─ Global Bucket:\n\
             │  ├─ Available Tokens: {}/{}\n\
             │  ├─ Next Token In: {}ms\n\
             │  └─ Today: {}\n\
             ├─ Health: {}\n\
             └─ Sources:",
            self.total_requests,
            self.allowed_requests(),
            self.throttled_requests,
            self.throttle_rate() * 100.0,
            self.global.available,
            self.global.capacity,
            self.global.time_until_refill_ms,
            self.global_daily_count,
            self.health_status(),
        );

        let count = self.by_source.len();
        for (i, (name, stats)) in self.by_source.iter().enumerate() {
            let branch = if i + 1 == count { "└─" } else { "├─" };
            out.push_str(&format!(
                "\n   {} {}: {} allowed, {} throttled",
                branch, name, stats.requests, stats.throttled
            ));
        }
        out
    }
}

impl fmt::Display for RateLimitStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Health of the limiter as seen by telemetry.
///
/// ```text
///     Healthy ──────► few or no throttled requests
///        │
///     Degraded ─────► noticeable throttling, or global budget empty
///        │
///     Critical ─────► adapters are being turned away routinely
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,
    /// Under some pressure.
    Degraded,
    /// Under sustained pressure; limits or traffic need attention.
    Critical,
}

impl HealthStatus {
    /// True for anything but [`HealthStatus::Healthy`].
    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Operator guidance for this status.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Healthy => "No action needed",
            Self::Degraded => "Monitor closely, consider spreading requests across sources",
            Self::Critical => "Immediate action required: reduce request volume or raise limits",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "✅ Healthy"),
            Self::Degraded => write!(f, "⚠️ Degraded"),
            Self::Critical => write!(f, "🔴 Critical"),
        }
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    total_requests: u64,
    throttled_requests: u64,
    by_source: HashMap<String, SourceStats>,
}

/// Mutable counters owned by the coordinator.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    inner: Mutex<StatsInner>,
}

impl StatsRecorder {
    /// Counts an attempt and makes sure the source has an entry.
    pub(crate) fn record_attempt(&self, source: &str) {
        let mut inner = self.inner.lock();
        inner.total_requests += 1;
        if !inner.by_source.contains_key(source) {
            inner.by_source.insert(source.to_owned(), SourceStats::default());
        }
    }

    pub(crate) fn record_throttled(&self, source: &str) {
        let mut inner = self.inner.lock();
        inner.throttled_requests += 1;
        inner.by_source.entry(source.to_owned()).or_default().throttled += 1;
    }

    pub(crate) fn record_allowed(&self, source: &str, at: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let entry = inner.by_source.entry(source.to_owned()).or_default();
        entry.requests += 1;
        entry.last_request_at = Some(at);
    }

    pub(crate) fn source(&self, source: &str) -> Option<SourceStats> {
        self.inner.lock().by_source.get(source).cloned()
    }

    pub(crate) fn snapshot(&self, global: BucketStatus, global_daily_count: u64) -> RateLimitStats {
        let inner = self.inner.lock();
        RateLimitStats {
            total_requests: inner.total_requests,
            throttled_requests: inner.throttled_requests,
            by_source: inner
                .by_source
                .iter()
                .map(|(name, stats)| (name.clone(), stats.clone()))
                .collect(),
            global,
            global_daily_count,
        }
    }

    pub(crate) fn reset(&self) {
        *self.inner.lock() = StatsInner::default();
    }
}
