//! Fan-out consumer.
//!
//! Drains events from the queue, merges them into a [`FanoutPlan`] and
//! executes it against the catalog caches.

use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::config::{CacheConfig, FanoutPolicy};
use super::events::EventQueue;
use super::family::{CacheFamily, CatalogCaches};
use super::keys::{CompositeKey, Scope, unit_key};
use super::planner::FanoutPlan;

const METRIC_CACHE_FANOUT_MS: &str = "folio_cache_fanout_ms";
const METRIC_CACHE_REWARM: &str = "folio_cache_rewarm_total";

/// Re-issues a lookup from a key that was cached before a purge.
#[async_trait]
pub trait Rewarm: Send + Sync {
    /// Returns whether the lookup was re-issued.
    async fn rewarm(&self, family: CacheFamily, key: &CompositeKey) -> bool;
}

/// Consumes cache events and keeps the catalog caches consistent.
pub struct FanoutConsumer {
    config: CacheConfig,
    caches: Arc<CatalogCaches>,
    queue: Arc<EventQueue>,
    rewarmer: Option<Arc<dyn Rewarm>>,
    #[cfg(test)]
    rewarm_invocations: Arc<AtomicUsize>,
}

impl FanoutConsumer {
    /// Create a consumer that only purges until a rewarmer is attached.
    pub fn new(config: CacheConfig, caches: Arc<CatalogCaches>, queue: Arc<EventQueue>) -> Self {
        Self {
            config,
            caches,
            queue,
            rewarmer: None,
            #[cfg(test)]
            rewarm_invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_rewarmer(mut self, rewarmer: Arc<dyn Rewarm>) -> Self {
        self.rewarmer = Some(rewarmer);
        self
    }

    /// Consume pending events under the configured policy.
    ///
    /// Returns true if any events were processed.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> bool {
        self.consume_with_policy(self.config.fanout_policy).await
    }

    /// Consume pending events, purging without rewarming.
    #[instrument(skip(self))]
    pub async fn consume_purge_only(&self) -> bool {
        self.consume_with_policy(FanoutPolicy::PurgeOnly).await
    }

    async fn consume_with_policy(&self, policy: FanoutPolicy) -> bool {
        let started_at = Instant::now();
        let events = self
            .queue
            .drain(self.config.consume_batch_limit_non_zero().get());
        if events.is_empty() {
            return false;
        }

        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let plan = FanoutPlan::from_events(events);

        info!(
            event_count,
            event_ids = ?event_ids,
            plan = %plan,
            policy = policy.as_str(),
            "Cache fan-out starting"
        );

        self.replace_pages(&plan);
        let mut stale = self.purge(&plan);
        let rendered = if plan.rendered {
            self.caches.rendered.purge_all()
        } else {
            Vec::new()
        };

        let purged = stale.len() + rendered.len();
        let mut rewarmed = 0;
        if policy.rewarms() {
            // Rendered output is rebuilt last so it reads the rewarmed entries.
            stale.extend(rendered.into_iter().map(|key| (CacheFamily::Rendered, key)));
            rewarmed = self.rewarm(&stale).await;
        }

        info!(
            event_count,
            purged,
            rewarmed,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Cache fan-out complete"
        );

        histogram!(METRIC_CACHE_FANOUT_MS, "policy" => policy.as_str())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        true
    }

    /// Swap new page lists into chapters whose pages are already cached.
    fn replace_pages(&self, plan: &FanoutPlan) {
        for (chapter_id, pages) in &plan.replace_pages {
            let key = unit_key(Scope::Id(*chapter_id));
            if self.caches.pages.has(&key) {
                self.caches.pages.replace(&key, pages.clone());
                debug!(chapter_id, count = pages.len(), "Replaced cached page list");
            }
        }
    }

    /// Drop every planned scope; returns the keys that may be rewarmed.
    fn purge(&self, plan: &FanoutPlan) -> Vec<(CacheFamily, CompositeKey)> {
        for (family, scope) in &plan.purge {
            self.caches.purge(*family, *scope);
        }

        let mut stale = Vec::new();
        for (family, scope) in &plan.refresh_if_present {
            if !self.caches.has(*family, &unit_key(*scope)) {
                debug!(
                    family = family.as_str(),
                    scope = %scope,
                    result = "skipped",
                    "Scope never populated"
                );
                continue;
            }
            stale.extend(
                self.caches
                    .purge(*family, *scope)
                    .into_iter()
                    .map(|key| (*family, key)),
            );
        }

        for (family, scope) in &plan.refresh {
            stale.extend(
                self.caches
                    .purge(*family, *scope)
                    .into_iter()
                    .map(|key| (*family, key)),
            );
        }
        stale
    }

    async fn rewarm(&self, stale: &[(CacheFamily, CompositeKey)]) -> usize {
        let Some(rewarmer) = &self.rewarmer else {
            debug!("Rewarm skipped: no rewarmer attached");
            return 0;
        };
        #[cfg(test)]
        self.rewarm_invocations.fetch_add(1, Ordering::Relaxed);

        let mut rewarmed = 0;
        for (family, key) in stale {
            if rewarmer.rewarm(*family, key).await {
                rewarmed += 1;
                counter!(METRIC_CACHE_REWARM, "family" => family.as_str()).increment(1);
            }
        }
        rewarmed
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn caches(&self) -> &Arc<CatalogCaches> {
        &self.caches
    }

    #[cfg(test)]
    fn rewarm_invocation_count(&self) -> usize {
        self.rewarm_invocations.load(Ordering::Relaxed)
    }
}
