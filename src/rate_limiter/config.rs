//! # Rate Limit Configuration
//!
//! Static limits for every outbound data source, plus the registry that
//! resolves a source name to its limit.
//!
//! ## Key Concepts
//!
//! ```text
//!     RateLimitConfig:
//!
//!     ┌──────────────────────────────┐
//!     │ requests_per_minute: 12      │ ← steady refill rate
//!     │ burst_size: 3                │ ← extra headroom above the rate
//!     │ requests_per_day: None       │ ← optional daily quota
//!     │                              │
//!     │ capacity = 12 + 3 = 15       │
//!     │ refill   = 12 / 60000 per ms │
//!     └──────────────────────────────┘
//! ```
//!
//! ### Lookup
//!
//! ```text
//!     "arxiv"        ──► explicit entry       (3/min, burst 1)
//!     "my-new-api"   ──► DEFAULT_SOURCE_RATE_LIMIT
//!     global budget  ──► GLOBAL_RATE_LIMIT    (never looked up by name)
//! ```
//!
//! Lookups never fail: any string resolves to a config.

use super::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Limits for a single rate-limited resource.
///
/// Capacity of the bucket built from this config is
/// `requests_per_minute + burst_size`; it refills at
/// `requests_per_minute / 60_000` tokens per millisecond.
///
/// ## Examples
///
/// ```rust
/// use sourcegate::RateLimitConfig;
///
/// let config = RateLimitConfig::per_minute(12).with_burst(3);
/// assert_eq!(config.capacity(), 15);
///
/// let quota = RateLimitConfig::per_minute(60).with_daily_limit(5_000);
/// assert_eq!(quota.requests_per_day, Some(5_000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Sustained request rate. Must be greater than 0.
    pub requests_per_minute: u32,

    /// Optional hard cap on requests per UTC day. Must be greater than 0 when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_day: Option<u64>,

    /// Extra bucket capacity above the per-minute rate.
    #[serde(default)]
    pub burst_size: u32,
}

impl RateLimitConfig {
    /// A config with only a per-minute rate: no burst, no daily quota.
    pub const fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            requests_per_day: None,
            burst_size: 0,
        }
    }

    /// Sets the burst allowance.
    pub const fn with_burst(self, burst_size: u32) -> Self {
        Self { burst_size, ..self }
    }

    /// Sets the daily quota.
    pub const fn with_daily_limit(self, requests_per_day: u64) -> Self {
        Self {
            requests_per_day: Some(requests_per_day),
            ..self
        }
    }

    /// Maximum tokens a bucket built from this config holds.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.requests_per_minute as u64 + self.burst_size as u64
    }

    /// Tokens added per elapsed millisecond.
    #[inline]
    pub fn refill_rate_per_ms(&self) -> f64 {
        self.requests_per_minute as f64 / 60_000.0
    }

    /// Checks that the limits are usable.
    ///
    /// # Errors
    ///
    /// - `requests_per_minute` is 0
    /// - `requests_per_day` is `Some(0)`
    ///
    /// ```rust
    /// use sourcegate::RateLimitConfig;
    ///
    /// assert!(RateLimitConfig::per_minute(0).validate().is_err());
    /// assert!(RateLimitConfig::per_minute(10).validate().is_ok());
    /// ```
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.requests_per_minute == 0 {
            return Err("requests_per_minute must be greater than 0");
        }
        if self.requests_per_day == Some(0) {
            return Err("requests_per_day must be greater than 0 when set");
        }
        Ok(())
    }
}

impl fmt::Display for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/min", self.requests_per_minute)?;
        if self.burst_size > 0 {
            write!(f, " +{} burst", self.burst_size)?;
        }
        if let Some(day) = self.requests_per_day {
            write!(f, ", {}/day", day)?;
        }
        Ok(())
    }
}

/// Budget shared by every outbound request regardless of source.
pub const GLOBAL_RATE_LIMIT: RateLimitConfig = RateLimitConfig::per_minute(100)
    .with_burst(10)
    .with_daily_limit(10_000);

/// Limit applied to any source without an explicit entry.
pub const DEFAULT_SOURCE_RATE_LIMIT: RateLimitConfig = RateLimitConfig::per_minute(30).with_burst(5);

/// What kind of data a source serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCategory {
    /// Scholarly literature and citation indexes.
    Literature,
    /// Patent databases.
    Patent,
    /// Energy statistics and resource data.
    Energy,
}

/// Sources with published limits known at build time.
///
/// Anything else is still accepted by name and falls back to
/// [`DEFAULT_SOURCE_RATE_LIMIT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KnownSource {
    /// arXiv export API.
    Arxiv,
    /// OpenAlex works/authors API.
    OpenAlex,
    /// NCBI E-utilities (PubMed).
    PubMed,
    /// Semantic Scholar Graph API.
    SemanticScholar,
    /// Crossref REST API.
    Crossref,
    /// CORE aggregator API.
    Core,
    /// Lens.org patent API.
    Lens,
    /// USPTO PatentsView.
    PatentsView,
    /// EPO Open Patent Services.
    EpoOps,
    /// U.S. Energy Information Administration.
    Eia,
    /// NREL developer APIs.
    Nrel,
    /// Ember electricity data.
    Ember,
    /// International Energy Agency data services.
    Iea,
}

impl KnownSource {
    /// Every known source.
    pub const ALL: [KnownSource; 13] = [
        Self::Arxiv,
        Self::OpenAlex,
        Self::PubMed,
        Self::SemanticScholar,
        Self::Crossref,
        Self::Core,
        Self::Lens,
        Self::PatentsView,
        Self::EpoOps,
        Self::Eia,
        Self::Nrel,
        Self::Ember,
        Self::Iea,
    ];

    /// Name adapters use when calling into the coordinator.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Arxiv => "arxiv",
            Self::OpenAlex => "openalex",
            Self::PubMed => "pubmed",
            Self::SemanticScholar => "semantic_scholar",
            Self::Crossref => "crossref",
            Self::Core => "core",
            Self::Lens => "lens",
            Self::PatentsView => "patentsview",
            Self::EpoOps => "epo_ops",
            Self::Eia => "eia",
            Self::Nrel => "nrel",
            Self::Ember => "ember",
            Self::Iea => "iea",
        }
    }

    /// The kind of data this source serves.
    pub const fn category(&self) -> SourceCategory {
        match self {
            Self::Arxiv
            | Self::OpenAlex
            | Self::PubMed
            | Self::SemanticScholar
            | Self::Crossref
            | Self::Core => SourceCategory::Literature,
            Self::Lens | Self::PatentsView | Self::EpoOps => SourceCategory::Patent,
            Self::Eia | Self::Nrel | Self::Ember | Self::Iea => SourceCategory::Energy,
        }
    }

    /// The source's published limit.
    pub const fn rate_limit(&self) -> RateLimitConfig {
        match self {
            Self::Arxiv => RateLimitConfig::per_minute(3).with_burst(1),
            Self::OpenAlex => RateLimitConfig::per_minute(60)
                .with_burst(20)
                .with_daily_limit(100_000),
            Self::PubMed => RateLimitConfig::per_minute(12).with_burst(3),
            Self::SemanticScholar => RateLimitConfig::per_minute(20).with_burst(5),
            Self::Crossref => RateLimitConfig::per_minute(50).with_burst(10),
            Self::Core => RateLimitConfig::per_minute(10)
                .with_burst(2)
                .with_daily_limit(1_000),
            Self::Lens => RateLimitConfig::per_minute(10).with_daily_limit(500),
            Self::PatentsView => RateLimitConfig::per_minute(45).with_burst(5),
            Self::EpoOps => RateLimitConfig::per_minute(30)
                .with_burst(5)
                .with_daily_limit(2_000),
            Self::Eia => RateLimitConfig::per_minute(60)
                .with_burst(10)
                .with_daily_limit(5_000),
            Self::Nrel => RateLimitConfig::per_minute(16).with_burst(4),
            Self::Ember => RateLimitConfig::per_minute(30).with_burst(5),
            Self::Iea => RateLimitConfig::per_minute(20).with_burst(2),
        }
    }
}

impl fmt::Display for KnownSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnownSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| format!("unknown source: {}", s))
    }
}

/// Shape of a YAML registry document. Every section is optional and
/// overlays the built-in limits.
///
/// ```yaml
/// global:
///   requests_per_minute: 200
///   requests_per_day: 20000
/// sources:
///   arxiv:
///     requests_per_minute: 6
///     burst_size: 2
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryDocument {
    global: Option<RateLimitConfig>,
    default: Option<RateLimitConfig>,
    #[serde(default)]
    sources: HashMap<String, RateLimitConfig>,
}

/// Resolves source names to their limits.
///
/// ```rust
/// use sourcegate::{RateLimitRegistry, DEFAULT_SOURCE_RATE_LIMIT};
///
/// let registry = RateLimitRegistry::default();
/// assert_eq!(registry.get_config("arxiv").capacity(), 4);
/// assert_eq!(*registry.get_config("not-configured"), DEFAULT_SOURCE_RATE_LIMIT);
/// assert!(registry.explicit_config("not-configured").is_none());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitRegistry {
    global: RateLimitConfig,
    default: RateLimitConfig,
    sources: HashMap<String, RateLimitConfig>,
}

impl Default for RateLimitRegistry {
    /// The built-in global limit, default limit, and every [`KnownSource`].
    fn default() -> Self {
        let sources = KnownSource::ALL
            .iter()
            .map(|source| (source.as_str().to_owned(), source.rate_limit()))
            .collect();

        Self {
            global: GLOBAL_RATE_LIMIT,
            default: DEFAULT_SOURCE_RATE_LIMIT,
            sources,
        }
    }
}

impl RateLimitRegistry {
    /// A registry with no explicit sources; every name resolves to `default`.
    pub fn new(global: RateLimitConfig, default: RateLimitConfig) -> Self {
        Self {
            global,
            default,
            sources: HashMap::new(),
        }
    }

    /// Parses a YAML document and overlays it on the built-in limits.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed YAML and
    /// [`ConfigError::InvalidLimit`] for limits that fail validation.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let document: RegistryDocument = serde_yaml::from_str(yaml)?;
        let mut registry = Self::default();

        if let Some(global) = document.global {
            registry.global = global;
        }
        if let Some(default) = document.default {
            registry.default = default;
        }
        registry.sources.extend(document.sources);

        registry.validate()?;
        Ok(registry)
    }

    /// Reads and parses a YAML file. See [`from_yaml_str`](Self::from_yaml_str).
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Adds or replaces an explicit source entry.
    pub fn with_source(mut self, name: impl Into<String>, config: RateLimitConfig) -> Self {
        self.sources.insert(name.into(), config);
        self
    }

    /// Replaces the global budget.
    pub fn with_global(mut self, config: RateLimitConfig) -> Self {
        self.global = config;
        self
    }

    /// Replaces the fallback for unconfigured sources.
    pub fn with_default(mut self, config: RateLimitConfig) -> Self {
        self.default = config;
        self
    }

    /// The limit for `source`: its explicit entry, or the default.
    #[inline]
    pub fn get_config(&self, source: &str) -> &RateLimitConfig {
        self.sources.get(source).unwrap_or(&self.default)
    }

    /// The explicit entry for `source`, if one exists.
    #[inline]
    pub fn explicit_config(&self, source: &str) -> Option<&RateLimitConfig> {
        self.sources.get(source)
    }

    /// The global budget.
    #[inline]
    pub fn global(&self) -> &RateLimitConfig {
        &self.global
    }

    /// The fallback used for unconfigured sources.
    #[inline]
    pub fn default_config(&self) -> &RateLimitConfig {
        &self.default
    }

    /// Names with an explicit entry.
    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Validates every limit in the registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |scope: &str, message| ConfigError::InvalidLimit {
            scope: scope.to_owned(),
            message,
        };

        self.global.validate().map_err(|m| invalid("global", m))?;
        self.default.validate().map_err(|m| invalid("default", m))?;
        for (name, config) in &self.sources {
            config.validate().map_err(|m| invalid(name, m))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_and_refill_rate() {
        let config = RateLimitConfig::per_minute(12).with_burst(3);
        assert_eq!(config.capacity(), 15);
        assert!((config.refill_rate_per_ms() - 0.0002).abs() < 1e-12);
    }

    #[test]
    fn test_config_validation() {
        assert!(GLOBAL_RATE_LIMIT.validate().is_ok());
        assert!(DEFAULT_SOURCE_RATE_LIMIT.validate().is_ok());
        assert!(RateLimitConfig::per_minute(0).validate().is_err());
        assert!(RateLimitConfig::per_minute(5)
            .with_daily_limit(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_known_source_limits_are_valid() {
        for source in KnownSource::ALL {
            assert!(source.rate_limit().validate().is_ok(), "{}", source);
        }
    }

    #[test]
    fn test_known_source_round_trips_through_name() {
        for source in KnownSource::ALL {
            assert_eq!(source.as_str().parse::<KnownSource>(), Ok(source));
        }
        assert!("myspace".parse::<KnownSource>().is_err());
    }

    #[test]
    fn test_categories() {
        assert_eq!(KnownSource::Arxiv.category(), SourceCategory::Literature);
        assert_eq!(KnownSource::Lens.category(), SourceCategory::Patent);
        assert_eq!(KnownSource::Eia.category(), SourceCategory::Energy);
    }

    #[test]
    fn test_registry_falls_back_to_default() {
        let registry = RateLimitRegistry::default();
        assert_eq!(registry.get_config("arxiv").capacity(), 4);
        assert_eq!(*registry.get_config("pubmed"), KnownSource::PubMed.rate_limit());
        assert_eq!(*registry.get_config("whatever"), DEFAULT_SOURCE_RATE_LIMIT);
        assert_eq!(*registry.get_config(""), DEFAULT_SOURCE_RATE_LIMIT);
        assert_eq!(*registry.global(), GLOBAL_RATE_LIMIT);
    }

    #[test]
    fn test_registry_builders() {
        let registry = RateLimitRegistry::new(
            RateLimitConfig::per_minute(10),
            RateLimitConfig::per_minute(2),
        )
        .with_source("custom", RateLimitConfig::per_minute(7));

        assert_eq!(registry.get_config("custom").requests_per_minute, 7);
        assert_eq!(registry.get_config("arxiv").requests_per_minute, 2);
        assert_eq!(registry.source_names().count(), 1);
    }

    #[test]
    fn test_yaml_overlay() {
        let yaml = r#"
global:
  requests_per_minute: 200
  requests_per_day: 20000
sources:
  arxiv:
    requests_per_minute: 6
    burst_size: 2
  internal_mirror:
    requests_per_minute: 500
"#;
        let registry = RateLimitRegistry::from_yaml_str(yaml).unwrap();
        assert_eq!(registry.global().requests_per_minute, 200);
        assert_eq!(registry.global().requests_per_day, Some(20_000));
        assert_eq!(registry.get_config("arxiv").capacity(), 8);
        assert_eq!(registry.get_config("internal_mirror").requests_per_minute, 500);
        // untouched entries keep their built-in limits
        assert_eq!(*registry.get_config("pubmed"), KnownSource::PubMed.rate_limit());
    }

    #[test]
    fn test_yaml_rejects_invalid_limits() {
        let yaml = "sources:\n  broken:\n    requests_per_minute: 0\n";
        match RateLimitRegistry::from_yaml_str(yaml) {
            Err(ConfigError::InvalidLimit { scope, .. }) => assert_eq!(scope, "broken"),
            other => panic!("expected InvalidLimit, got {:?}", other),
        }
    }

    #[test]
    fn test_yaml_rejects_unknown_fields() {
        let yaml = "global:\n  requests_per_minute: 10\n  per_hour: 5\n";
        assert!(matches!(
            RateLimitRegistry::from_yaml_str(yaml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_yaml_file_missing() {
        let err = RateLimitRegistry::from_yaml_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_display() {
        let text = KnownSource::OpenAlex.rate_limit().to_string();
        assert_eq!(text, "60/min +20 burst, 100000/day");
    }
}
