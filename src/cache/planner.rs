//! Fan-out plan generation.
//!
//! Merges a batch of cache events into the set of cache scopes to purge,
//! rewarm, or patch in place.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use crate::domain::entities::{EntityId, StatsOwner};

use super::events::{CacheEvent, EventKind};
use super::family::CacheFamily;
use super::keys::Scope;

/// A family and the scope within it an action applies to.
pub type Target = (CacheFamily, Scope);

/// Actions to execute for cache consistency.
///
/// Scopes in `purge` are dropped without rewarming. Scopes in `refresh` are
/// dropped and, when the policy allows, every key that was cached under them
/// is looked up again. `refresh_if_present` does the same but only when the
/// scope's unit key was populated.
#[derive(Debug, Default, PartialEq)]
pub struct FanoutPlan {
    pub purge: BTreeSet<Target>,
    pub refresh: BTreeSet<Target>,
    pub refresh_if_present: BTreeSet<Target>,
    /// Page lists to swap in directly, by chapter id.
    pub replace_pages: BTreeMap<EntityId, Vec<String>>,
    /// Whether the rendered family is dropped and re-rendered.
    pub rendered: bool,
}

#[derive(Debug, Default)]
struct ProjectChange {
    deleted: bool,
    publish_changed: bool,
}

#[derive(Debug)]
struct ChapterChange {
    project_id: EntityId,
    deleted: bool,
    pages: Option<Vec<String>>,
}

impl fmt::Display for FanoutPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FanoutPlan {{ purge: {}, refresh: {}, refresh_if_present: {}, replace_pages: {}, rendered: {} }}",
            self.purge.len(),
            self.refresh.len(),
            self.refresh_if_present.len(),
            self.replace_pages.len(),
            self.rendered,
        )
    }
}

impl FanoutPlan {
    /// Merge a batch of events into one plan.
    ///
    /// - Deduplicates by event id
    /// - Orders by epoch; the latest event decides whether an entity is deleted
    /// - A deleted entity's scopes are purged, never rewarmed
    pub fn from_events(events: Vec<CacheEvent>) -> Self {
        let mut seen_ids = HashSet::new();
        let mut events: Vec<_> = events
            .into_iter()
            .filter(|e| seen_ids.insert(e.id))
            .collect();
        events.sort_by_key(|e| e.epoch);

        let mut plan = Self::default();
        let mut projects: BTreeMap<EntityId, ProjectChange> = BTreeMap::new();
        let mut chapters: BTreeMap<EntityId, ChapterChange> = BTreeMap::new();

        for event in events {
            match event.kind {
                EventKind::ProjectCreated { id } | EventKind::ProjectUpdated { id } => {
                    projects.entry(id).or_default().deleted = false;
                }
                EventKind::ProjectPublishStateChanged { id } => {
                    let change = projects.entry(id).or_default();
                    change.deleted = false;
                    change.publish_changed = true;
                }
                EventKind::ProjectDeleted { id, chapter_ids } => {
                    projects.entry(id).or_default().deleted = true;
                    for chapter_id in chapter_ids {
                        chapter_entry(&mut chapters, chapter_id, id).deleted = true;
                    }
                }
                EventKind::ChapterCreated { id, project_id }
                | EventKind::ChapterUpdated { id, project_id } => {
                    chapter_entry(&mut chapters, id, project_id).deleted = false;
                }
                EventKind::ChapterDeleted { id, project_id } => {
                    chapter_entry(&mut chapters, id, project_id).deleted = true;
                }
                EventKind::PagesChanged {
                    chapter_id,
                    project_id,
                    pages,
                } => {
                    let change = chapter_entry(&mut chapters, chapter_id, project_id);
                    change.deleted = false;
                    change.pages = Some(pages);
                }
                EventKind::CoverSelected { project_id } => {
                    plan.refresh
                        .insert((CacheFamily::Projects, Scope::Id(project_id)));
                    plan.refresh.insert((CacheFamily::Projects, Scope::Global));
                    plan.refresh_if_present
                        .insert((CacheFamily::Covers, Scope::Id(project_id)));
                }
                EventKind::CoversChanged { project_id } => {
                    plan.refresh_if_present
                        .insert((CacheFamily::Covers, Scope::Project(project_id)));
                    plan.refresh_if_present
                        .insert((CacheFamily::Covers, Scope::Id(project_id)));
                }
                EventKind::StatsChanged { owner } => {
                    plan.purge.insert((CacheFamily::Stats, stats_scope(owner)));
                }
            }
        }

        for (id, change) in projects {
            plan.rendered = true;
            if change.deleted {
                plan.purge.insert((CacheFamily::Projects, Scope::Id(id)));
                plan.purge.insert((CacheFamily::Covers, Scope::Id(id)));
                plan.purge.insert((CacheFamily::Covers, Scope::Project(id)));
                plan.purge.insert((CacheFamily::Chapters, Scope::Project(id)));
                plan.purge.insert((CacheFamily::Stats, Scope::Project(id)));
                plan.refresh.insert((CacheFamily::Projects, Scope::Global));
                plan.refresh.insert((CacheFamily::Chapters, Scope::Global));
                continue;
            }

            // The id scope is refreshed on create too, so a cached not-found
            // from before the project existed does not linger.
            plan.refresh.insert((CacheFamily::Projects, Scope::Id(id)));
            plan.refresh.insert((CacheFamily::Projects, Scope::Global));
            if change.publish_changed {
                plan.refresh.insert((CacheFamily::Chapters, Scope::Project(id)));
                plan.refresh.insert((CacheFamily::Chapters, Scope::Global));
            }
        }

        for (id, change) in chapters {
            plan.rendered = true;
            plan.refresh
                .insert((CacheFamily::Chapters, Scope::Project(change.project_id)));
            plan.refresh.insert((CacheFamily::Chapters, Scope::Global));
            plan.refresh
                .insert((CacheFamily::Projects, Scope::Id(change.project_id)));

            if change.deleted {
                plan.purge.insert((CacheFamily::Chapters, Scope::Id(id)));
                plan.purge.insert((CacheFamily::Pages, Scope::Id(id)));
                plan.purge.insert((CacheFamily::Stats, Scope::Chapter(id)));
                continue;
            }

            plan.refresh.insert((CacheFamily::Chapters, Scope::Id(id)));
            if let Some(pages) = change.pages {
                plan.replace_pages.insert(id, pages);
            }
        }

        let purged = &plan.purge;
        plan.refresh.retain(|target| !purged.contains(target));
        plan.refresh_if_present
            .retain(|target| !purged.contains(target));
        plan
    }

    /// Check if the plan has any actions to execute.
    pub fn is_empty(&self) -> bool {
        self.purge.is_empty()
            && self.refresh.is_empty()
            && self.refresh_if_present.is_empty()
            && self.replace_pages.is_empty()
            && !self.rendered
    }
}

fn chapter_entry(
    chapters: &mut BTreeMap<EntityId, ChapterChange>,
    id: EntityId,
    project_id: EntityId,
) -> &mut ChapterChange {
    chapters.entry(id).or_insert_with(|| ChapterChange {
        project_id,
        deleted: false,
        pages: None,
    })
}

fn stats_scope(owner: StatsOwner) -> Scope {
    match owner {
        StatsOwner::Project(id) => Scope::Project(id),
        StatsOwner::Chapter(id) => Scope::Chapter(id),
    }
}
