//! Cache configuration.
//!
//! Per-family capacity and read-through TTL, plus the fan-out policy, via the
//! `[cache]` section of `folio.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use super::family::CacheFamily;

// Default values for cache configuration
const DEFAULT_PROJECTS_CAPACITY: usize = 512;
const DEFAULT_CHAPTERS_CAPACITY: usize = 1024;
const DEFAULT_COVERS_CAPACITY: usize = 1024;
const DEFAULT_PAGES_CAPACITY: usize = 128;
const DEFAULT_STATS_CAPACITY: usize = 4096;
const DEFAULT_RENDERED_CAPACITY: usize = 512;
const DEFAULT_LOOKUP_TTL_SECS: u64 = 60 * 60;
const DEFAULT_RENDERED_TTL_SECS: u64 = 5 * 60;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_BACKGROUND_CONCURRENCY: usize = 8;

/// What the fan-out does with keys it invalidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutPolicy {
    /// Drop the affected keys; the next reader repopulates them.
    PurgeOnly,
    /// Drop the affected keys and immediately re-issue the lookups that were cached.
    #[default]
    PurgeAndRewarm,
}

impl FanoutPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FanoutPolicy::PurgeOnly => "purge_only",
            FanoutPolicy::PurgeAndRewarm => "purge_and_rewarm",
        }
    }

    pub fn rewarms(self) -> bool {
        matches!(self, FanoutPolicy::PurgeAndRewarm)
    }
}

/// Capacity and TTL resolved for one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyLimits {
    pub capacity: NonZeroUsize,
    /// `Duration::ZERO` keeps entries until they are invalidated or evicted.
    pub ttl: Duration,
}

/// Cache configuration from `folio.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve every lookup straight from the backing store when false.
    pub enabled: bool,
    pub fanout_policy: FanoutPolicy,
    /// Maximum events merged into one fan-out plan.
    pub consume_batch_limit: usize,
    /// Maximum concurrently running background tasks.
    pub background_concurrency: usize,
    pub projects_capacity: usize,
    pub projects_ttl_secs: u64,
    pub chapters_capacity: usize,
    pub chapters_ttl_secs: u64,
    pub covers_capacity: usize,
    pub covers_ttl_secs: u64,
    pub pages_capacity: usize,
    pub pages_ttl_secs: u64,
    pub stats_capacity: usize,
    pub stats_ttl_secs: u64,
    pub rendered_capacity: usize,
    pub rendered_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fanout_policy: FanoutPolicy::default(),
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
            background_concurrency: DEFAULT_BACKGROUND_CONCURRENCY,
            projects_capacity: DEFAULT_PROJECTS_CAPACITY,
            projects_ttl_secs: DEFAULT_LOOKUP_TTL_SECS,
            chapters_capacity: DEFAULT_CHAPTERS_CAPACITY,
            chapters_ttl_secs: DEFAULT_LOOKUP_TTL_SECS,
            covers_capacity: DEFAULT_COVERS_CAPACITY,
            covers_ttl_secs: 0,
            pages_capacity: DEFAULT_PAGES_CAPACITY,
            pages_ttl_secs: DEFAULT_LOOKUP_TTL_SECS,
            stats_capacity: DEFAULT_STATS_CAPACITY,
            stats_ttl_secs: 0,
            rendered_capacity: DEFAULT_RENDERED_CAPACITY,
            rendered_ttl_secs: DEFAULT_RENDERED_TTL_SECS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            fanout_policy: settings.fanout_policy,
            consume_batch_limit: settings.consume_batch_limit.get(),
            background_concurrency: settings.background_concurrency.get(),
            projects_capacity: settings.projects.capacity.get(),
            projects_ttl_secs: settings.projects.ttl.as_secs(),
            chapters_capacity: settings.chapters.capacity.get(),
            chapters_ttl_secs: settings.chapters.ttl.as_secs(),
            covers_capacity: settings.covers.capacity.get(),
            covers_ttl_secs: settings.covers.ttl.as_secs(),
            pages_capacity: settings.pages.capacity.get(),
            pages_ttl_secs: settings.pages.ttl.as_secs(),
            stats_capacity: settings.stats.capacity.get(),
            stats_ttl_secs: settings.stats.ttl.as_secs(),
            rendered_capacity: settings.rendered.capacity.get(),
            rendered_ttl_secs: settings.rendered.ttl.as_secs(),
        }
    }
}

impl CacheConfig {
    /// Returns true if lookups go through the cache.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Capacity and TTL for `family`, clamping a zero capacity to 1.
    pub fn limits(&self, family: CacheFamily) -> FamilyLimits {
        let (capacity, ttl_secs) = match family {
            CacheFamily::Projects => (self.projects_capacity, self.projects_ttl_secs),
            CacheFamily::Chapters => (self.chapters_capacity, self.chapters_ttl_secs),
            CacheFamily::Covers => (self.covers_capacity, self.covers_ttl_secs),
            CacheFamily::Pages => (self.pages_capacity, self.pages_ttl_secs),
            CacheFamily::Stats => (self.stats_capacity, self.stats_ttl_secs),
            CacheFamily::Rendered => (self.rendered_capacity, self.rendered_ttl_secs),
        };

        FamilyLimits {
            capacity: NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Returns the batch limit, never below one event.
    pub fn consume_batch_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.consume_batch_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the background concurrency, never below one task.
    pub fn background_concurrency_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.background_concurrency).unwrap_or(NonZeroUsize::MIN)
    }
}
