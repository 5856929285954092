//! Invalidation events published after catalog mutations.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::gauge;
use tracing::info;
use uuid::Uuid;

use crate::domain::entities::{EntityId, StatsOwner};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const METRIC_QUEUE_LEN: &str = "folio_cache_event_queue_len";

/// Publication order within this process.
///
/// When several events in one batch touch the same entity, the one with the
/// highest epoch decides whether the entity is treated as deleted.
pub type Epoch = u64;

/// A published [`EventKind`]. `id` lets a batch drop duplicates.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub id: Uuid,
    pub epoch: Epoch,
    pub kind: EventKind,
}

impl CacheEvent {
    pub fn new(kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
        }
    }
}

/// Committed catalog mutations that affect cached lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    // Projects
    ProjectCreated { id: EntityId },
    ProjectUpdated { id: EntityId },
    /// Publishing a project changes which of its chapters are listed.
    ProjectPublishStateChanged { id: EntityId },
    /// Carries the chapters removed along with the project.
    ProjectDeleted {
        id: EntityId,
        chapter_ids: Vec<EntityId>,
    },

    // Chapters
    ChapterCreated { id: EntityId, project_id: EntityId },
    ChapterUpdated { id: EntityId, project_id: EntityId },
    ChapterDeleted { id: EntityId, project_id: EntityId },

    // Assets
    /// The main cover of a project changed.
    CoverSelected { project_id: EntityId },
    /// A cover was added to or removed from a project.
    CoversChanged { project_id: EntityId },
    /// The page list of a chapter was replaced.
    PagesChanged {
        chapter_id: EntityId,
        project_id: EntityId,
        pages: Vec<String>,
    },

    // Counters
    StatsChanged { owner: StatsOwner },
}

impl EventKind {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::ProjectCreated { .. } => "project_created",
            EventKind::ProjectUpdated { .. } => "project_updated",
            EventKind::ProjectPublishStateChanged { .. } => "project_publish_state_changed",
            EventKind::ProjectDeleted { .. } => "project_deleted",
            EventKind::ChapterCreated { .. } => "chapter_created",
            EventKind::ChapterUpdated { .. } => "chapter_updated",
            EventKind::ChapterDeleted { .. } => "chapter_deleted",
            EventKind::CoverSelected { .. } => "cover_selected",
            EventKind::CoversChanged { .. } => "covers_changed",
            EventKind::PagesChanged { .. } => "pages_changed",
            EventKind::StatsChanged { .. } => "stats_changed",
        }
    }
}

/// Pending invalidations. Writers publish after a commit; the fan-out
/// consumer drains in batches.
#[derive(Default)]
pub struct EventQueue {
    pending: Mutex<VecDeque<CacheEvent>>,
    epochs: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `kind` and return the epoch it was stamped with.
    pub fn publish(&self, kind: EventKind) -> Epoch {
        let event = CacheEvent::new(kind, self.epochs.fetch_add(1, Ordering::SeqCst));
        let epoch = event.epoch;
        info!(
            target = SOURCE,
            op = "events::publish",
            event_id = %event.id,
            event_epoch = epoch,
            event_kind = event.kind.label(),
            "Cache event enqueued"
        );

        let mut pending = mutex_lock(&self.pending, SOURCE, "publish");
        pending.push_back(event);
        gauge!(METRIC_QUEUE_LEN).set(pending.len() as f64);
        epoch
    }

    /// Up to `limit` of the oldest events.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut pending = mutex_lock(&self.pending, SOURCE, "drain");
        let take = limit.min(pending.len());
        let batch = pending.drain(..take).collect();
        gauge!(METRIC_QUEUE_LEN).set(pending.len() as f64);
        batch
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.pending, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
