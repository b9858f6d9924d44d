//! # Rate Limiter Module
//!
//! Internal implementation of coordinated outbound rate limiting, split by
//! concern.
//!
//! ## Module Structure
//!
//! ```text
//!     rate_limiter/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── config.rs       (Limits, known sources, registry, YAML)
//!     ├── clock.rs        (Time sources and day keys)
//!     ├── core.rs         (Token bucket)
//!     ├── manager.rs      (Global coordinator and daily counters)
//!     ├── admission.rs    (Async wait-then-run wrapper)
//!     ├── metrics.rs      (Admission statistics)
//!     └── error.rs        (Error types)
//! ```
//!
//! ## Architecture Flow
//!
//! ```text
//!     Source adapter
//!          │
//!          ▼
//!     ┌───────────┐
//!     │ Admission │ ◄── Bounded async wait
//!     └─────┬─────┘
//!           │
//!           ▼
//!     ┌─────────────┐
//!     │ Coordinator │ ◄── Global + source buckets, daily quotas, stats
//!     └─────┬───────┘
//!           │
//!           ▼
//!     ┌──────────┐
//!     │   Core   │ ◄── Token bucket algorithm
//!     └─────┬────┘
//!           │
//!           ▼
//!     ┌──────────┐
//!     │  Config  │ ◄── Per-source limits
//!     └──────────┘
//! ```

mod admission;
mod clock;
mod config;
mod core;
mod error;
mod manager;
mod metrics;

/// Limits, known sources and the registry that resolves them
pub use config::{
    KnownSource, RateLimitConfig, RateLimitRegistry, SourceCategory, DEFAULT_SOURCE_RATE_LIMIT,
    GLOBAL_RATE_LIMIT,
};

/// Time sources
pub use clock::{Clock, DayKey, MockClock, SystemClock};

/// Token bucket for a single resource
pub use core::{BucketStatus, TokenBucket};

/// The coordinator every adapter shares
pub use manager::{RateLimitCoordinator, SourceStatus, HOUSEKEEPING_INTERVAL};

/// Statistics for dashboards and telemetry
pub use metrics::{HealthStatus, RateLimitStats, SourceStats};

/// Error types
pub use error::{ConfigError, ExceededReason, RateLimitExceeded};
