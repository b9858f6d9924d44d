//! # Sourcegate - Coordinated Outbound Rate Limiting
//!
//! An in-memory admission-control layer for applications that call many
//! third-party data APIs (literature, patent and energy-statistics
//! services). Every outbound request must fit inside BOTH a shared global
//! budget and the source's own published limit before it goes out.
//!
//! ## The Problem
//!
//! Each external API publishes its own limit, and the application as a
//! whole should not hammer the network either:
//!
//! ```text
//!     arxiv     3/min   ──┐
//!     pubmed   12/min   ──┤
//!     openalex 60/min   ──┼──► global budget 100/min, 10 000/day
//!     eia      60/min   ──┤
//!     (other)  30/min   ──┘
//! ```
//!
//! A request for arxiv is admitted only if arxiv's bucket has a token,
//! the global bucket has a token, and neither daily quota is used up.
//!
//! ## The Token Bucket
//!
//! ```text
//!     capacity = requests_per_minute + burst_size
//!
//!     Time 0:    [🪙🪙🪙🪙] (arxiv: 3/min + 1 burst)
//!     Request 1: [🪙🪙🪙] ✅
//!     ...
//!     Request 5: [] ⛔ (next token in 20s)
//!     Time +20s: [🪙] (one token refilled)
//! ```
//!
//! Tokens refill continuously. Sub-token progress is never lost to
//! frequent polling.
//!
//! ## Quick Start
//!
//! ### Direct Admission
//!
//! ```rust
//! use sourcegate::RateLimitCoordinator;
//!
//! let coordinator = RateLimitCoordinator::new();
//!
//! if coordinator.consume("arxiv") {
//!     // issue the request
//! } else {
//!     let wait = coordinator.get_wait_time("arxiv");
//!     println!("arxiv throttled, retry in {}ms", wait);
//! }
//! ```
//!
//! ### Wait, Then Run
//!
//! ```rust
//! use sourcegate::{RateLimitCoordinator, RateLimitExceeded};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), RateLimitExceeded> {
//! let coordinator = RateLimitCoordinator::new();
//!
//! let body = coordinator
//!     .execute_with_rate_limit("pubmed", || async { "esearch result" }, 5_000)
//!     .await?;
//! # assert_eq!(body, "esearch result");
//! # Ok(())
//! # }
//! ```
//!
//! ### Custom Limits
//!
//! ```rust
//! use sourcegate::{CoordinatorBuilder, RateLimitConfig};
//!
//! let coordinator = CoordinatorBuilder::new()
//!     .source_limit("internal-mirror", RateLimitConfig::per_minute(600).with_burst(50))
//!     .global_limit(RateLimitConfig::per_minute(1_000).with_daily_limit(50_000))
//!     .try_build()
//!     .expect("valid limits");
//!
//! assert!(coordinator.consume("internal-mirror"));
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │    Source Adapters      │
//!                    └──────────┬──────────────┘
//!                               │
//!                    ┌──────────▼───────────────┐
//!                    │  RateLimitCoordinator    │
//!                    ├──────────────────────────┤
//!                    │  • execute_with_rate_limit│
//!                    │  • consume / can_proceed │
//!                    │  • get_status / get_stats│
//!                    └──────────┬───────────────┘
//!                               │
//!                ┌──────────────┴───────────────┐
//!                │                              │
//!     ┌──────────▼──────────┐       ┌───────────▼──────────┐
//!     │   Token Buckets     │       │   Daily Counters     │
//!     ├─────────────────────┤       ├──────────────────────┤
//!     │ • 1 global          │       │ • per source, per day│
//!     │ • 1 per source      │       │ • global, per day    │
//!     │ • continuous refill │       │ • lazy purge         │
//!     └─────────────────────┘       └──────────────────────┘
//! ```
//!
//! ## Errors
//!
//! Only the async wrapper fails, with [`RateLimitExceeded`].
//! [`consume`](RateLimitCoordinator::consume) and
//! [`can_proceed`](RateLimitCoordinator::can_proceed) answer with a `bool`.
//! Configuration problems surface as [`ConfigError`] at build time.
//!
//! ## Thread Safety
//!
//! The coordinator is `Send + Sync`; share it as [`SharedCoordinator`].
//! Every bucket sits behind its own mutex and a consume locks the global
//! bucket before the source bucket, so concurrent callers never oversell
//! a token.
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events and never installs a subscriber.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

// Internal module
mod rate_limiter;

// Public re-exports
pub use rate_limiter::{
    BucketStatus, Clock, ConfigError, DayKey, ExceededReason, HealthStatus, KnownSource,
    MockClock, RateLimitConfig, RateLimitCoordinator, RateLimitExceeded, RateLimitRegistry,
    RateLimitStats, SourceCategory, SourceStats, SourceStatus, SystemClock, TokenBucket,
    DEFAULT_SOURCE_RATE_LIMIT, GLOBAL_RATE_LIMIT, HOUSEKEEPING_INTERVAL,
};

use std::sync::Arc;

/// A coordinator wrapped in `Arc`, the way adapters hold it.
///
/// # Example
/// ```rust
/// use sourcegate::{RateLimitCoordinator, SharedCoordinator};
/// use std::sync::Arc;
///
/// let shared: SharedCoordinator = Arc::new(RateLimitCoordinator::new());
///
/// let for_adapter = shared.clone();
/// std::thread::spawn(move || {
///     for_adapter.consume("crossref");
/// })
/// .join()
/// .unwrap();
///
/// assert_eq!(shared.get_stats().total_requests, 1);
/// ```
pub type SharedCoordinator = Arc<RateLimitCoordinator>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
pub const MSRV: &str = "1.70.0";

/// Prelude module for convenient imports.
///
/// ```rust
/// use sourcegate::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for source adapters.
    //!
    //! # Example
    //! ```rust
    //! use sourcegate::prelude::*;
    //!
    //! let coordinator: SharedCoordinator = CoordinatorBuilder::new().build().into();
    //! let source = KnownSource::PubMed;
    //! assert!(coordinator.can_proceed(source.as_str()));
    //! ```

    pub use crate::{
        CoordinatorBuilder, HealthStatus, KnownSource, RateLimitConfig, RateLimitCoordinator,
        RateLimitExceeded, RateLimitRegistry, SharedCoordinator,
    };
}

/// Fluent construction of a [`RateLimitCoordinator`].
///
/// Starts from the built-in registry (every [`KnownSource`] plus the
/// global and default limits) and layers overrides on top.
///
/// # Example
///
/// ```rust
/// use sourcegate::{CoordinatorBuilder, MockClock, RateLimitConfig};
/// use std::sync::Arc;
///
/// let clock = MockClock::new();
/// let coordinator = CoordinatorBuilder::new()
///     .clock(Arc::new(clock.clone()))
///     .source_limit("arxiv", RateLimitConfig::per_minute(1))
///     .build();
///
/// assert!(coordinator.consume("arxiv"));
/// assert!(!coordinator.consume("arxiv"));
///
/// // Or use try_build() to catch bad limits
/// let result = CoordinatorBuilder::new()
///     .source_limit("broken", RateLimitConfig::per_minute(0))
///     .try_build();
///
/// assert!(result.is_err());
/// ```
#[derive(Debug, Clone)]
pub struct CoordinatorBuilder {
    registry: RateLimitRegistry,
    clock: Option<Arc<dyn Clock>>,
}

impl CoordinatorBuilder {
    /// A builder seeded with the built-in registry.
    pub fn new() -> Self {
        Self {
            registry: RateLimitRegistry::default(),
            clock: None,
        }
    }

    /// Replaces the whole registry, e.g. one loaded with
    /// [`RateLimitRegistry::from_yaml_file`].
    pub fn registry(mut self, registry: RateLimitRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Drives the coordinator from `clock` instead of the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Adds or replaces the limit for one source.
    pub fn source_limit(mut self, source: impl Into<String>, config: RateLimitConfig) -> Self {
        self.registry = self.registry.with_source(source, config);
        self
    }

    /// Replaces the global budget.
    pub fn global_limit(mut self, config: RateLimitConfig) -> Self {
        self.registry = self.registry.with_global(config);
        self
    }

    /// Replaces the fallback for unconfigured sources.
    pub fn default_limit(mut self, config: RateLimitConfig) -> Self {
        self.registry = self.registry.with_default(config);
        self
    }

    /// Builds the coordinator without validating the limits.
    ///
    /// A zero `requests_per_minute` yields a bucket that never refills.
    /// Use [`try_build`](Self::try_build) to reject such limits.
    pub fn build(self) -> RateLimitCoordinator {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        RateLimitCoordinator::with_clock(self.registry, clock)
    }

    /// Validates every limit, then builds the coordinator.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidLimit`] naming the first offending scope.
    pub fn try_build(self) -> Result<RateLimitCoordinator, ConfigError> {
        self.registry.validate()?;
        Ok(self.build())
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_basic_functionality() {
        let coordinator = CoordinatorBuilder::new()
            .clock(Arc::new(MockClock::new()))
            .build();

        for _ in 0..4 {
            assert!(coordinator.consume("arxiv"));
        }
        assert!(!coordinator.consume("arxiv"));

        let stats = coordinator.get_stats();
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.throttled_requests, 1);
    }

    #[test]
    fn test_builder_overrides() {
        let coordinator = CoordinatorBuilder::new()
            .clock(Arc::new(MockClock::new()))
            .source_limit("mirror", RateLimitConfig::per_minute(5).with_burst(1))
            .default_limit(RateLimitConfig::per_minute(2))
            .global_limit(RateLimitConfig::per_minute(500))
            .build();

        assert_eq!(coordinator.get_status("mirror").bucket.capacity, 6);
        assert_eq!(coordinator.get_status("unlisted").bucket.capacity, 2);
        assert_eq!(coordinator.get_stats().global.capacity, 500);
    }

    #[test]
    fn test_builder_validation() {
        let err = CoordinatorBuilder::new()
            .global_limit(RateLimitConfig::per_minute(0))
            .try_build()
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidLimit { ref scope, .. } if scope == "global"));
    }

    #[test]
    fn test_builder_with_registry() {
        let registry = RateLimitRegistry::new(
            RateLimitConfig::per_minute(100),
            RateLimitConfig::per_minute(1),
        );
        let coordinator = CoordinatorBuilder::new()
            .registry(registry)
            .clock(Arc::new(MockClock::new()))
            .try_build()
            .unwrap();

        // no explicit sources: arxiv falls back to the default
        assert!(coordinator.tracked_sources().is_empty());
        assert!(coordinator.consume("arxiv"));
        assert!(!coordinator.consume("arxiv"));
    }

    #[test]
    fn test_thread_safety() {
        let coordinator: SharedCoordinator = Arc::new(
            CoordinatorBuilder::new()
                .clock(Arc::new(MockClock::new()))
                .global_limit(RateLimitConfig::per_minute(1_000))
                .build(),
        );
        let mut handles = vec![];

        for _ in 0..10 {
            let coordinator = coordinator.clone();
            handles.push(thread::spawn(move || {
                (0..20).filter(|_| coordinator.consume("crossref")).count()
            }));
        }

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // crossref: 50/min + 10 burst
        assert_eq!(total, 60);
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let _coordinator: SharedCoordinator = Arc::new(RateLimitCoordinator::new());
        let _config = RateLimitConfig::per_minute(10);
        let _source = KnownSource::Arxiv;
        let _status = HealthStatus::Healthy;
    }

    #[test]
    fn test_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(MSRV, "1.70.0");
    }

    #[test]
    fn test_builder_default() {
        let coordinator = CoordinatorBuilder::default().build();
        assert_eq!(coordinator.tracked_sources().len(), KnownSource::ALL.len());
    }
}
