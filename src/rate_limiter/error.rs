//! # Error Types
//!
//! The admission path has exactly one failure kind, [`RateLimitExceeded`],
//! and only the async wrapper produces it. Buckets and the coordinator
//! report exhaustion as plain booleans.
//!
//! [`ConfigError`] belongs to the configuration layer (validation and
//! YAML loading) and never shows up on the request path.

use std::fmt;
use std::path::PathBuf;

/// Why an admission attempt gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceededReason {
    /// The estimated wait was longer than the caller was willing to wait.
    WaitTooLong {
        /// Estimated wait in milliseconds at the time of the check.
        wait_ms: u64,
    },

    /// Capacity looked available after waiting, but another consumer took it
    /// before this caller could consume.
    LostRace,
}

impl fmt::Display for ExceededReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitTooLong { wait_ms } => write!(f, "estimated wait {}ms", wait_ms),
            Self::LostRace => write!(f, "capacity taken by a concurrent request"),
        }
    }
}

/// A source could not be admitted within the caller's wait bound.
///
/// Adapters should treat this as "skip this source for now": do not retry
/// in the same tick, surface a retry-later notice instead.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("rate limit exceeded for source '{source_name}' (max wait {max_wait_ms}ms, {reason})")]
pub struct RateLimitExceeded {
    /// The source that was throttled.
    pub source_name: String,

    /// The wait bound the caller supplied.
    pub max_wait_ms: u64,

    /// What tripped the limit.
    pub reason: ExceededReason,
}

impl RateLimitExceeded {
    pub(crate) fn wait_too_long(source: &str, max_wait_ms: u64, wait_ms: u64) -> Self {
        Self {
            source_name: source.to_owned(),
            max_wait_ms,
            reason: ExceededReason::WaitTooLong { wait_ms },
        }
    }

    pub(crate) fn lost_race(source: &str, max_wait_ms: u64) -> Self {
        Self {
            source_name: source.to_owned(),
            max_wait_ms,
            reason: ExceededReason::LostRace,
        }
    }

    /// Suggested delay before the caller tries this source again, if known.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self.reason {
            ExceededReason::WaitTooLong { wait_ms } => Some(wait_ms),
            ExceededReason::LostRace => None,
        }
    }
}

/// Errors raised while building or loading rate limit configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A limit failed validation.
    #[error("invalid rate limit for '{scope}': {message}")]
    InvalidLimit {
        /// `global`, `default`, or the source name.
        scope: String,
        /// What was wrong with it.
        message: &'static str,
    },

    /// The YAML document could not be parsed.
    #[error("failed to parse rate limit configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The configuration file could not be read.
    #[error("failed to read rate limit configuration from {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exceeded_message_names_source_and_bound() {
        let err = RateLimitExceeded::wait_too_long("pubmed", 50, 5000);
        let msg = err.to_string();
        assert!(msg.contains("pubmed"));
        assert!(msg.contains("50ms"));
        assert!(msg.contains("5000ms"));
        assert_eq!(err.retry_after_ms(), Some(5000));
    }

    #[test]
    fn test_lost_race_has_no_retry_hint() {
        let err = RateLimitExceeded::lost_race("arxiv", 1000);
        assert_eq!(err.reason, ExceededReason::LostRace);
        assert_eq!(err.retry_after_ms(), None);
        assert!(err.to_string().contains("concurrent"));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidLimit {
            scope: "openalex".to_string(),
            message: "requests_per_minute must be greater than 0",
        };
        assert!(err.to_string().contains("openalex"));
    }
}
