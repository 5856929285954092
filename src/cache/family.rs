//! Per-family read-through caches.
//!
//! Each entity family owns one [`KeyedLruStore`] holding result envelopes
//! (`Result<payload, CatalogError>`), so a not-found answer is cached like a
//! found one. Families that cache more than one shape (a project detail and
//! a project listing) store a payload enum; [`CacheSlot`] converts between
//! the typed value a caller asked for and the family payload.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::entities::{ChapterRecord, CoverRecord, Listing, ProjectRecord, StatsRecord};
use crate::domain::error::CatalogError;

use super::config::CacheConfig;
use super::keys::{CompositeKey, Scope};
use super::store::{CacheStats, KeyedLruStore};

/// Cached result: the payload or the error the backing store answered with.
pub type Envelope<T> = Result<T, CatalogError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheFamily {
    Projects,
    Chapters,
    Covers,
    Pages,
    Stats,
    Rendered,
}

impl CacheFamily {
    pub const ALL: [CacheFamily; 6] = [
        CacheFamily::Projects,
        CacheFamily::Chapters,
        CacheFamily::Covers,
        CacheFamily::Pages,
        CacheFamily::Stats,
        CacheFamily::Rendered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheFamily::Projects => "projects",
            CacheFamily::Chapters => "chapters",
            CacheFamily::Covers => "covers",
            CacheFamily::Pages => "pages",
            CacheFamily::Stats => "stats",
            CacheFamily::Rendered => "rendered",
        }
    }
}

/// A typed value that can live in a family whose payload is `P`.
pub trait CacheSlot<P>: Sized {
    fn into_payload(self) -> P;
    fn from_payload(payload: P) -> Option<Self>;
    /// Whether a successful result carries something worth caching.
    fn is_populated(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectPayload {
    Detail(ProjectRecord),
    List(Listing<ProjectRecord>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChapterPayload {
    Detail(ChapterRecord),
    List(Listing<ChapterRecord>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoverPayload {
    Main(CoverRecord),
    List(Vec<CoverRecord>),
}

impl CacheSlot<ProjectPayload> for ProjectRecord {
    fn into_payload(self) -> ProjectPayload {
        ProjectPayload::Detail(self)
    }

    fn from_payload(payload: ProjectPayload) -> Option<Self> {
        match payload {
            ProjectPayload::Detail(record) => Some(record),
            ProjectPayload::List(_) => None,
        }
    }
}

impl CacheSlot<ProjectPayload> for Listing<ProjectRecord> {
    fn into_payload(self) -> ProjectPayload {
        ProjectPayload::List(self)
    }

    fn from_payload(payload: ProjectPayload) -> Option<Self> {
        match payload {
            ProjectPayload::List(listing) => Some(listing),
            ProjectPayload::Detail(_) => None,
        }
    }
}

impl CacheSlot<ChapterPayload> for ChapterRecord {
    fn into_payload(self) -> ChapterPayload {
        ChapterPayload::Detail(self)
    }

    fn from_payload(payload: ChapterPayload) -> Option<Self> {
        match payload {
            ChapterPayload::Detail(record) => Some(record),
            ChapterPayload::List(_) => None,
        }
    }
}

impl CacheSlot<ChapterPayload> for Listing<ChapterRecord> {
    fn into_payload(self) -> ChapterPayload {
        ChapterPayload::List(self)
    }

    fn from_payload(payload: ChapterPayload) -> Option<Self> {
        match payload {
            ChapterPayload::List(listing) => Some(listing),
            ChapterPayload::Detail(_) => None,
        }
    }
}

impl CacheSlot<CoverPayload> for CoverRecord {
    fn into_payload(self) -> CoverPayload {
        CoverPayload::Main(self)
    }

    fn from_payload(payload: CoverPayload) -> Option<Self> {
        match payload {
            CoverPayload::Main(record) => Some(record),
            CoverPayload::List(_) => None,
        }
    }
}

impl CacheSlot<CoverPayload> for Vec<CoverRecord> {
    fn into_payload(self) -> CoverPayload {
        CoverPayload::List(self)
    }

    fn from_payload(payload: CoverPayload) -> Option<Self> {
        match payload {
            CoverPayload::List(covers) => Some(covers),
            CoverPayload::Main(_) => None,
        }
    }
}

impl CacheSlot<Vec<String>> for Vec<String> {
    fn into_payload(self) -> Vec<String> {
        self
    }

    fn from_payload(payload: Vec<String>) -> Option<Self> {
        Some(payload)
    }
}

impl CacheSlot<StatsRecord> for StatsRecord {
    fn into_payload(self) -> StatsRecord {
        self
    }

    fn from_payload(payload: StatsRecord) -> Option<Self> {
        Some(payload)
    }
}

impl CacheSlot<String> for String {
    fn into_payload(self) -> String {
        self
    }

    fn from_payload(payload: String) -> Option<Self> {
        Some(payload)
    }

    fn is_populated(&self) -> bool {
        !self.is_empty()
    }
}

/// Read-through cache for one entity family.
pub struct EntityCache<P> {
    family: CacheFamily,
    enabled: bool,
    ttl: Duration,
    store: KeyedLruStore<Envelope<P>>,
}

impl<P: Clone> EntityCache<P> {
    pub fn new(family: CacheFamily, config: &CacheConfig) -> Self {
        let limits = config.limits(family);
        Self {
            family,
            enabled: config.is_enabled(),
            ttl: limits.ttl,
            store: KeyedLruStore::new(family.as_str(), limits.capacity),
        }
    }

    pub fn family(&self) -> CacheFamily {
        self.family
    }

    /// TTL applied to entries stored by [`Self::read_through`].
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached envelope for `key`, if any.
    ///
    /// A payload of the wrong shape for `T` is treated as a miss.
    pub fn lookup<T: CacheSlot<P>>(&self, key: &CompositeKey) -> Option<Envelope<T>> {
        if !self.enabled {
            return None;
        }

        match self.store.get(key.as_str())? {
            Ok(payload) => match T::from_payload(payload) {
                Some(value) => Some(Ok(value)),
                None => {
                    warn!(
                        op = "cache::lookup",
                        family = self.family.as_str(),
                        key = %key,
                        result = "shape_mismatch",
                        "Cached payload has an unexpected shape; reloading"
                    );
                    None
                }
            },
            Err(err) => Some(Err(err)),
        }
    }

    /// Store `envelope` under `key` when it is worth caching.
    ///
    /// Errors are always stored; successful results only when populated.
    /// The key is removed first so the entry starts a fresh TTL window.
    pub fn store<T: CacheSlot<P> + Clone>(&self, key: &CompositeKey, envelope: &Envelope<T>) -> bool {
        if !self.enabled {
            return false;
        }

        let payload = match envelope {
            Ok(value) if value.is_populated() => Ok(value.clone().into_payload()),
            Ok(_) => return false,
            Err(err) => Err(err.clone()),
        };

        self.store.remove(key.as_str());
        self.store.set(key.as_str(), payload, self.ttl);
        true
    }

    /// Replace the entry for `key` with `value`, using the family TTL.
    pub fn replace<T: CacheSlot<P>>(&self, key: &CompositeKey, value: T) {
        if !self.enabled {
            return;
        }
        self.store.remove(key.as_str());
        self.store.set(key.as_str(), Ok(value.into_payload()), self.ttl);
    }

    /// Serve `key` from cache or populate it from `load`.
    pub async fn read_through<T, F, Fut>(&self, key: &CompositeKey, load: F) -> Envelope<T>
    where
        T: CacheSlot<P> + Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Envelope<T>>,
    {
        if let Some(cached) = self.lookup::<T>(key) {
            return cached;
        }

        let envelope = load().await;
        let stored = self.store(key, &envelope);
        debug!(
            op = "cache::read_through",
            family = self.family.as_str(),
            key = %key,
            stored,
            negative = envelope.is_err(),
            "Cache miss resolved from backing store"
        );
        envelope
    }

    pub fn has(&self, key: &CompositeKey) -> bool {
        self.enabled && self.store.has(key.as_str())
    }

    pub fn remove(&self, key: &CompositeKey) -> bool {
        self.store.remove(key.as_str())
    }

    /// Live keys filed under `scope`.
    pub fn keys_in(&self, scope: Scope) -> Vec<CompositeKey> {
        self.store
            .keys_with_prefix(&scope.prefix())
            .into_iter()
            .map(CompositeKey::from)
            .collect()
    }

    /// Remove every key filed under `scope`; returns what was removed.
    pub fn purge(&self, scope: Scope) -> Vec<CompositeKey> {
        self.store
            .purge_with_prefix(&scope.prefix())
            .into_iter()
            .map(CompositeKey::from)
            .collect()
    }

    /// Remove everything; returns the keys that were live.
    pub fn purge_all(&self) -> Vec<CompositeKey> {
        self.store
            .purge_with_prefix("")
            .into_iter()
            .map(CompositeKey::from)
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

/// The full set of catalog caches, one per family.
pub struct CatalogCaches {
    pub projects: EntityCache<ProjectPayload>,
    pub chapters: EntityCache<ChapterPayload>,
    pub covers: EntityCache<CoverPayload>,
    pub pages: EntityCache<Vec<String>>,
    pub stats: EntityCache<StatsRecord>,
    pub rendered: EntityCache<String>,
}

impl CatalogCaches {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            projects: EntityCache::new(CacheFamily::Projects, config),
            chapters: EntityCache::new(CacheFamily::Chapters, config),
            covers: EntityCache::new(CacheFamily::Covers, config),
            pages: EntityCache::new(CacheFamily::Pages, config),
            stats: EntityCache::new(CacheFamily::Stats, config),
            rendered: EntityCache::new(CacheFamily::Rendered, config),
        }
    }

    /// Counters for every family, keyed by family name.
    pub fn stats(&self) -> BTreeMap<&'static str, CacheStats> {
        CacheFamily::ALL
            .into_iter()
            .map(|family| (family.as_str(), self.family_stats(family)))
            .collect()
    }

    /// Purge `scope` in `family`; returns the keys that were live.
    pub fn purge(&self, family: CacheFamily, scope: Scope) -> Vec<CompositeKey> {
        match family {
            CacheFamily::Projects => self.projects.purge(scope),
            CacheFamily::Chapters => self.chapters.purge(scope),
            CacheFamily::Covers => self.covers.purge(scope),
            CacheFamily::Pages => self.pages.purge(scope),
            CacheFamily::Stats => self.stats.purge(scope),
            CacheFamily::Rendered => self.rendered.purge(scope),
        }
    }

    pub fn has(&self, family: CacheFamily, key: &CompositeKey) -> bool {
        match family {
            CacheFamily::Projects => self.projects.has(key),
            CacheFamily::Chapters => self.chapters.has(key),
            CacheFamily::Covers => self.covers.has(key),
            CacheFamily::Pages => self.pages.has(key),
            CacheFamily::Stats => self.stats.has(key),
            CacheFamily::Rendered => self.rendered.has(key),
        }
    }

    pub fn remove(&self, family: CacheFamily, key: &CompositeKey) -> bool {
        match family {
            CacheFamily::Projects => self.projects.remove(key),
            CacheFamily::Chapters => self.chapters.remove(key),
            CacheFamily::Covers => self.covers.remove(key),
            CacheFamily::Pages => self.pages.remove(key),
            CacheFamily::Stats => self.stats.remove(key),
            CacheFamily::Rendered => self.rendered.remove(key),
        }
    }

    pub fn family_stats(&self, family: CacheFamily) -> CacheStats {
        match family {
            CacheFamily::Projects => self.projects.stats(),
            CacheFamily::Chapters => self.chapters.stats(),
            CacheFamily::Covers => self.covers.stats(),
            CacheFamily::Pages => self.pages.stats(),
            CacheFamily::Stats => self.stats.stats(),
            CacheFamily::Rendered => self.rendered.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::keys::key_for;

    fn cache() -> EntityCache<Vec<String>> {
        EntityCache::new(CacheFamily::Pages, &CacheConfig::default())
    }

    #[tokio::test]
    async fn read_through_caches_negative_results() {
        let cache = cache();
        let key = key_for(Scope::Id(9), &()).expect("key");
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let result: Envelope<Vec<String>> = cache
                .read_through(&key, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(CatalogError::not_found("chapter"))
                })
                .await;
            assert_eq!(result, Err(CatalogError::not_found("chapter")));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unpopulated_results_are_not_stored() {
        let cache: EntityCache<String> =
            EntityCache::new(CacheFamily::Rendered, &CacheConfig::default());
        let key = key_for(Scope::Global, &"/").expect("key");

        let result: Envelope<String> = cache.read_through(&key, || async { Ok(String::new()) }).await;

        assert_eq!(result, Ok(String::new()));
        assert!(!cache.has(&key));
    }

    #[tokio::test]
    async fn disabled_cache_always_loads() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        let cache: EntityCache<Vec<String>> = EntityCache::new(CacheFamily::Pages, &config);
        let key = key_for(Scope::Id(1), &()).expect("key");
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let _: Envelope<Vec<String>> = cache
                .read_through(&key, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["1-a.png".to_string()])
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn shape_mismatch_is_a_miss() {
        let cache: EntityCache<CoverPayload> =
            EntityCache::new(CacheFamily::Covers, &CacheConfig::default());
        let key = key_for(Scope::Id(1), &()).expect("key");
        cache.replace(&key, Vec::<CoverRecord>::new());

        assert!(cache.lookup::<CoverRecord>(&key).is_none());
        assert_eq!(cache.lookup::<Vec<CoverRecord>>(&key), Some(Ok(Vec::new())));
    }
}
