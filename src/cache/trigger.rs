//! Post-commit invalidation entry points.
//!
//! Writers call one typed method per mutation. The event is queued and the
//! fan-out runs on [`BackgroundTasks`], or in place for `invalidate_now`.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::domain::entities::{EntityId, StatsOwner};

use super::config::CacheConfig;
use super::consumer::FanoutConsumer;
use super::events::{EventKind, EventQueue};
use super::executor::BackgroundTasks;

/// ```ignore
/// // After a chapter update commits:
/// trigger.chapter_updated(chapter.id, chapter.project_id).await;
/// ```
pub struct CacheTrigger {
    config: CacheConfig,
    queue: Arc<EventQueue>,
    consumer: Arc<FanoutConsumer>,
    tasks: BackgroundTasks,
}

impl CacheTrigger {
    pub fn new(
        config: CacheConfig,
        queue: Arc<EventQueue>,
        consumer: Arc<FanoutConsumer>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            config,
            queue,
            consumer,
            tasks,
        }
    }

    /// Queue `kind` and submit a fan-out to the background executor.
    #[instrument(skip(self), fields(event_kind = kind.label()))]
    pub async fn invalidate(&self, kind: EventKind) {
        if !self.enqueue(kind) {
            return;
        }
        let consumer = Arc::clone(&self.consumer);
        self.tasks
            .submit("cache::fanout", async move {
                consumer.consume().await;
            })
            .await;
    }

    /// Queue `kind` and run the fan-out before returning.
    #[instrument(skip(self), fields(event_kind = kind.label()))]
    pub async fn invalidate_now(&self, kind: EventKind) {
        if self.enqueue(kind) {
            self.consumer.consume().await;
        }
    }

    /// False when caching is off and nothing was queued.
    fn enqueue(&self, kind: EventKind) -> bool {
        if !self.config.is_enabled() {
            debug!(event_kind = kind.label(), "Invalidation skipped: cache disabled");
            return false;
        }
        self.queue.publish(kind);
        true
    }

    pub async fn project_created(&self, id: EntityId) {
        self.invalidate(EventKind::ProjectCreated { id }).await;
    }

    pub async fn project_updated(&self, id: EntityId) {
        self.invalidate(EventKind::ProjectUpdated { id }).await;
    }

    pub async fn project_publish_state_changed(&self, id: EntityId) {
        self.invalidate(EventKind::ProjectPublishStateChanged { id })
            .await;
    }

    pub async fn project_deleted(&self, id: EntityId, chapter_ids: Vec<EntityId>) {
        self.invalidate(EventKind::ProjectDeleted { id, chapter_ids })
            .await;
    }

    pub async fn chapter_created(&self, id: EntityId, project_id: EntityId) {
        self.invalidate(EventKind::ChapterCreated { id, project_id })
            .await;
    }

    pub async fn chapter_updated(&self, id: EntityId, project_id: EntityId) {
        self.invalidate(EventKind::ChapterUpdated { id, project_id })
            .await;
    }

    pub async fn chapter_deleted(&self, id: EntityId, project_id: EntityId) {
        self.invalidate(EventKind::ChapterDeleted { id, project_id })
            .await;
    }

    pub async fn cover_selected(&self, project_id: EntityId) {
        self.invalidate(EventKind::CoverSelected { project_id }).await;
    }

    pub async fn covers_changed(&self, project_id: EntityId) {
        self.invalidate(EventKind::CoversChanged { project_id }).await;
    }

    pub async fn pages_changed(&self, chapter_id: EntityId, project_id: EntityId, pages: Vec<String>) {
        self.invalidate(EventKind::PagesChanged {
            chapter_id,
            project_id,
            pages,
        })
        .await;
    }

    pub async fn stats_changed(&self, owner: StatsOwner) {
        self.invalidate(EventKind::StatsChanged { owner }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::family::CatalogCaches;

    fn create_trigger(config: CacheConfig, tasks: BackgroundTasks) -> CacheTrigger {
        let caches = Arc::new(CatalogCaches::new(&config));
        let queue = Arc::new(EventQueue::new());
        let consumer = Arc::new(FanoutConsumer::new(config.clone(), caches, queue.clone()));
        CacheTrigger::new(config, queue, consumer, tasks)
    }

    #[test]
    fn enqueue_leaves_event_for_next_batch() {
        let trigger = create_trigger(CacheConfig::default(), BackgroundTasks::inline());

        assert!(trigger.enqueue(EventKind::ProjectUpdated { id: 1 }));

        assert_eq!(trigger.queue.len(), 1);
    }

    #[tokio::test]
    async fn disabled_cache_queues_nothing() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        let trigger = create_trigger(config, BackgroundTasks::inline());

        trigger.project_created(1).await;
        trigger
            .invalidate_now(EventKind::ProjectDeleted {
                id: 1,
                chapter_ids: vec![10],
            })
            .await;

        assert!(trigger.queue.is_empty());
    }

    #[tokio::test]
    async fn inline_invalidate_consumes_before_returning() {
        let trigger = create_trigger(CacheConfig::default(), BackgroundTasks::inline());

        trigger.chapter_updated(10, 1).await;
        trigger.stats_changed(StatsOwner::Project(1)).await;

        assert!(trigger.queue.is_empty());
    }

    #[tokio::test]
    async fn invalidate_now_consumes_immediately() {
        let trigger = create_trigger(
            CacheConfig::default(),
            BackgroundTasks::spawned(std::num::NonZeroUsize::MIN),
        );

        trigger
            .invalidate_now(EventKind::CoversChanged { project_id: 2 })
            .await;

        assert!(trigger.queue.is_empty());
    }
}
