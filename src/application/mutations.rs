//! Write façade: commit against the backing store, then hand storage and
//! cache side effects to the background executor.
//!
//! A failed directory move or link update never undoes a committed
//! mutation; it is logged and left for `remap` to repair.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{error, info, warn};

use crate::application::options::ChapterOptions;
use crate::application::repos::{
    CatalogRepo, ChapterDraft, Committed, Mutation, ProjectDraft, RepoError,
};
use crate::cache::{BackgroundTasks, CacheTrigger};
use crate::domain::entities::{
    ChapterRecord, CoverRecord, EntityId, ProjectRecord, StatsOwner, StatsRecord,
};
use crate::domain::error::CatalogError;
use crate::domain::slug::{derive_slug, page_number};
use crate::infra::storage::{
    ProjectLayout, RESERVED_SLUGS, RemapOutcome, StorageError, StorageLayout,
};

const SOURCE: &str = "application::mutations";

#[derive(Clone)]
pub struct CatalogWriter {
    repo: Arc<dyn CatalogRepo>,
    storage: Arc<StorageLayout>,
    trigger: Arc<CacheTrigger>,
    tasks: BackgroundTasks,
}

impl CatalogWriter {
    pub fn new(
        repo: Arc<dyn CatalogRepo>,
        storage: Arc<StorageLayout>,
        trigger: Arc<CacheTrigger>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            repo,
            storage,
            trigger,
            tasks,
        }
    }

    pub fn storage(&self) -> &Arc<StorageLayout> {
        &self.storage
    }

    /// Create a project; its slug is derived from the title.
    pub async fn create_project(&self, mut draft: ProjectDraft) -> Result<ProjectRecord, CatalogError> {
        draft.slug = project_slug(&draft.title)?;
        let record = match self.commit(Mutation::CreateProject(draft), "project").await? {
            Committed::Project { record, .. } => record,
            other => return Err(unexpected_commit("catalog::create_project", &other)),
        };

        let (storage, trigger) = self.handles();
        let (id, slug) = (record.id, record.slug.clone());
        self.after_commit("catalog::create_project", async move {
            if let Err(err) = storage.create_project_dir(id, &slug).await {
                report_storage_failure("catalog::create_project", id, &err);
            }
            trigger.project_created(id).await;
        })
        .await;

        Ok(record)
    }

    /// Update a project. A changed title moves its directory.
    pub async fn update_project(
        &self,
        id: EntityId,
        mut draft: ProjectDraft,
    ) -> Result<ProjectRecord, CatalogError> {
        draft.slug = project_slug(&draft.title)?;
        let (record, previous_slug) = match self
            .commit(Mutation::UpdateProject { id, draft }, "project")
            .await?
        {
            Committed::Project {
                record,
                previous_slug,
            } => (record, previous_slug),
            other => return Err(unexpected_commit("catalog::update_project", &other)),
        };

        let (storage, trigger) = self.handles();
        let slug = record.slug.clone();
        let renamed = previous_slug.as_deref() != Some(slug.as_str());
        self.after_commit("catalog::update_project", async move {
            if renamed && let Err(err) = storage.rename_project_dir(id, &slug).await {
                report_storage_failure("catalog::update_project", id, &err);
            }
            trigger.project_updated(id).await;
        })
        .await;

        Ok(record)
    }

    pub async fn set_project_published(
        &self,
        id: EntityId,
        published: bool,
    ) -> Result<ProjectRecord, CatalogError> {
        let record = match self
            .commit(Mutation::SetProjectPublished { id, published }, "project")
            .await?
        {
            Committed::Project { record, .. } => record,
            other => return Err(unexpected_commit("catalog::set_project_published", &other)),
        };

        let trigger = Arc::clone(&self.trigger);
        self.after_commit("catalog::set_project_published", async move {
            trigger.project_publish_state_changed(id).await;
        })
        .await;

        Ok(record)
    }

    /// Delete a project with its chapters, covers and directory tree.
    pub async fn delete_project(&self, id: EntityId) -> Result<ProjectRecord, CatalogError> {
        let (record, chapter_ids) = match self
            .commit(Mutation::DeleteProject { id }, "project")
            .await?
        {
            Committed::ProjectDeleted {
                record,
                chapter_ids,
            } => (record, chapter_ids),
            other => return Err(unexpected_commit("catalog::delete_project", &other)),
        };

        let (storage, trigger) = self.handles();
        self.after_commit("catalog::delete_project", async move {
            if let Err(err) = storage.remove_project_dir(id).await {
                report_storage_failure("catalog::delete_project", id, &err);
            }
            trigger.project_deleted(id, chapter_ids).await;
        })
        .await;

        Ok(record)
    }

    pub async fn create_chapter(&self, draft: ChapterDraft) -> Result<ChapterRecord, CatalogError> {
        check_chapter(&draft)?;
        let record = match self.commit(Mutation::CreateChapter(draft), "chapter").await? {
            Committed::Chapter { record, .. } => record,
            other => return Err(unexpected_commit("catalog::create_chapter", &other)),
        };

        let (storage, trigger) = self.handles();
        let chapter = record.clone();
        self.after_commit("catalog::create_chapter", async move {
            if let Err(err) = storage.create_chapter_dir(&chapter).await {
                report_storage_failure("catalog::create_chapter", chapter.id, &err);
            }
            trigger.chapter_created(chapter.id, chapter.project_id).await;
        })
        .await;

        Ok(record)
    }

    /// Update a chapter. A changed volume, number or title moves its directory;
    /// the owning project is fixed at creation.
    pub async fn update_chapter(
        &self,
        id: EntityId,
        draft: ChapterDraft,
    ) -> Result<ChapterRecord, CatalogError> {
        check_chapter(&draft)?;
        let current = self.stored_chapter(id, "catalog::update_chapter").await?;
        if current.project_id != draft.project_id {
            return Err(CatalogError::validation(
                "chapter cannot move to another project",
            ));
        }
        let (record, previous_dir_name) = match self
            .commit(Mutation::UpdateChapter { id, draft }, "chapter")
            .await?
        {
            Committed::Chapter {
                record,
                previous_dir_name,
            } => (record, previous_dir_name),
            other => return Err(unexpected_commit("catalog::update_chapter", &other)),
        };

        let (storage, trigger) = self.handles();
        let renamed = record.dir_name().ok() != previous_dir_name;
        let chapter = record.clone();
        self.after_commit("catalog::update_chapter", async move {
            if renamed && let Err(err) = storage.rename_chapter_dir(&chapter).await {
                report_storage_failure("catalog::update_chapter", chapter.id, &err);
            }
            trigger.chapter_updated(chapter.id, chapter.project_id).await;
        })
        .await;

        Ok(record)
    }

    pub async fn set_chapter_published(
        &self,
        id: EntityId,
        published: bool,
    ) -> Result<ChapterRecord, CatalogError> {
        let record = match self
            .commit(Mutation::SetChapterPublished { id, published }, "chapter")
            .await?
        {
            Committed::Chapter { record, .. } => record,
            other => return Err(unexpected_commit("catalog::set_chapter_published", &other)),
        };

        let trigger = Arc::clone(&self.trigger);
        let project_id = record.project_id;
        self.after_commit("catalog::set_chapter_published", async move {
            trigger.chapter_updated(id, project_id).await;
        })
        .await;

        Ok(record)
    }

    pub async fn delete_chapter(&self, id: EntityId) -> Result<ChapterRecord, CatalogError> {
        let record = match self.commit(Mutation::DeleteChapter { id }, "chapter").await? {
            Committed::ChapterDeleted { record } => record,
            other => return Err(unexpected_commit("catalog::delete_chapter", &other)),
        };

        let (storage, trigger) = self.handles();
        let project_id = record.project_id;
        self.after_commit("catalog::delete_chapter", async move {
            if let Err(err) = storage.remove_chapter_dir(id).await {
                report_storage_failure("catalog::delete_chapter", id, &err);
            }
            trigger.chapter_deleted(id, project_id).await;
        })
        .await;

        Ok(record)
    }

    /// Store a cover image and register it.
    ///
    /// The cover becomes the project's main cover when `select` is set or
    /// when the project has none yet.
    pub async fn upload_cover(
        &self,
        project_id: EntityId,
        file_name: &str,
        data: Bytes,
        select: bool,
    ) -> Result<CoverRecord, CatalogError> {
        if data.is_empty() {
            return Err(CatalogError::validation("cover upload is empty"));
        }
        let started_at = Instant::now();
        let stored = self
            .storage
            .store_cover(project_id, file_name, data)
            .await
            .map_err(|err| err.into_catalog("catalog::upload_cover"))?;

        let (record, selected) = match self
            .commit(
                Mutation::AddCover {
                    project_id,
                    file_name: stored,
                },
                "cover",
            )
            .await?
        {
            Committed::Cover { record, selected } => (record, selected),
            other => return Err(unexpected_commit("catalog::upload_cover", &other)),
        };

        info!(
            target = SOURCE,
            op = "catalog::upload_cover",
            result = "ok",
            project_id,
            cover_id = record.id,
            file_name = %record.file_name,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Cover stored"
        );

        if select || selected.is_none() {
            return self.select_cover(project_id, record.id).await;
        }

        let trigger = Arc::clone(&self.trigger);
        self.after_commit("catalog::upload_cover", async move {
            trigger.covers_changed(project_id).await;
        })
        .await;

        Ok(record)
    }

    pub async fn select_cover(
        &self,
        project_id: EntityId,
        cover_id: EntityId,
    ) -> Result<CoverRecord, CatalogError> {
        let record = match self
            .commit(
                Mutation::SelectCover {
                    project_id,
                    cover_id,
                },
                "cover",
            )
            .await?
        {
            Committed::Cover { record, .. } => record,
            other => return Err(unexpected_commit("catalog::select_cover", &other)),
        };

        let trigger = Arc::clone(&self.trigger);
        self.after_commit("catalog::select_cover", async move {
            trigger.cover_selected(project_id).await;
            trigger.covers_changed(project_id).await;
        })
        .await;

        Ok(record)
    }

    /// Remove a cover and its resized copies. Deleting the main cover
    /// leaves the project without one.
    pub async fn delete_cover(
        &self,
        project_id: EntityId,
        cover_id: EntityId,
    ) -> Result<CoverRecord, CatalogError> {
        let (record, selected) = match self
            .commit(
                Mutation::DeleteCover {
                    project_id,
                    cover_id,
                },
                "cover",
            )
            .await?
        {
            Committed::CoverDeleted { record, selected } => (record, selected),
            other => return Err(unexpected_commit("catalog::delete_cover", &other)),
        };

        let (storage, trigger) = self.handles();
        let file_name = record.file_name.clone();
        self.after_commit("catalog::delete_cover", async move {
            if let Err(err) = storage.remove_cover_files(project_id, &file_name).await {
                report_storage_failure("catalog::delete_cover", project_id, &err);
            }
            if selected.is_none() {
                trigger.cover_selected(project_id).await;
            }
            trigger.covers_changed(project_id).await;
        })
        .await;

        Ok(record)
    }

    /// Store a page image and add it to the chapter, ordered by page number.
    ///
    /// Returns the chapter's page list after the upload.
    pub async fn upload_page(
        &self,
        chapter_id: EntityId,
        file_name: &str,
        data: Bytes,
    ) -> Result<Vec<String>, CatalogError> {
        if data.is_empty() {
            return Err(CatalogError::validation("page upload is empty"));
        }
        let chapter = self.editable_chapter(chapter_id).await?;
        let stored = self
            .storage
            .store_page(chapter_id, file_name, data, chapter.pages.len())
            .await
            .map_err(|err| err.into_catalog("catalog::upload_page"))?;

        if chapter.pages.contains(&stored) {
            return Ok(chapter.pages);
        }

        let mut pages = chapter.pages;
        pages.push(stored);
        pages.sort_by_key(|page| page_number(page).unwrap_or(0));
        self.set_pages(&chapter.project_id, chapter_id, pages, None)
            .await
    }

    /// Drop a page from the chapter and delete its files.
    pub async fn delete_page(
        &self,
        chapter_id: EntityId,
        file_name: &str,
    ) -> Result<Vec<String>, CatalogError> {
        let chapter = self.editable_chapter(chapter_id).await?;
        let Some(position) = chapter
            .pages
            .iter()
            .position(|page| page.eq_ignore_ascii_case(file_name))
        else {
            return Err(CatalogError::not_found("page"));
        };

        let mut pages = chapter.pages;
        let removed = pages.remove(position);
        self.set_pages(&chapter.project_id, chapter_id, pages, Some(removed))
            .await
    }

    /// Count a view. Statistics are read-through, so only the key is purged.
    pub async fn record_view(
        &self,
        owner: StatsOwner,
        unique: bool,
    ) -> Result<StatsRecord, CatalogError> {
        let entity = match owner {
            StatsOwner::Project(_) => "project",
            StatsOwner::Chapter(_) => "chapter",
        };
        let stats = match self.commit(Mutation::RecordView { owner, unique }, entity).await? {
            Committed::Stats { stats, .. } => stats,
            other => return Err(unexpected_commit("catalog::record_view", &other)),
        };

        let trigger = Arc::clone(&self.trigger);
        self.after_commit("catalog::record_view", async move {
            trigger.stats_changed(owner).await;
        })
        .await;

        Ok(stats)
    }

    /// Rebuild every storage link from the backing store and wait for it.
    pub async fn remap_storage(&self) -> Result<RemapOutcome, CatalogError> {
        remap_from(self.repo.as_ref(), &self.storage).await
    }

    /// Queue a remap on the background executor; the report is logged.
    pub async fn schedule_remap(&self) {
        let repo = Arc::clone(&self.repo);
        let storage = Arc::clone(&self.storage);
        self.tasks
            .submit("catalog::remap", async move {
                if let Err(err) = remap_from(repo.as_ref(), &storage).await {
                    warn!(
                        target = SOURCE,
                        op = "catalog::remap",
                        result = "error",
                        error = %err,
                        "Scheduled remap failed"
                    );
                }
            })
            .await;
    }

    async fn set_pages(
        &self,
        project_id: &EntityId,
        chapter_id: EntityId,
        pages: Vec<String>,
        removed: Option<String>,
    ) -> Result<Vec<String>, CatalogError> {
        let record = match self
            .commit(Mutation::SetPages { chapter_id, pages }, "chapter")
            .await?
        {
            Committed::Pages { record } => record,
            other => return Err(unexpected_commit("catalog::set_pages", &other)),
        };

        let (storage, trigger) = self.handles();
        let project_id = *project_id;
        let pages = record.pages.clone();
        self.after_commit("catalog::set_pages", async move {
            if let Some(file_name) = removed
                && let Err(err) = storage.remove_page_files(chapter_id, &file_name).await
            {
                report_storage_failure("catalog::delete_page", chapter_id, &err);
            }
            trigger.pages_changed(chapter_id, project_id, pages).await;
        })
        .await;

        Ok(record.pages)
    }

    /// The chapter as stored, drafts included.
    async fn stored_chapter(
        &self,
        chapter_id: EntityId,
        op: &'static str,
    ) -> Result<ChapterRecord, CatalogError> {
        let options = ChapterOptions {
            include_drafts: true,
            ..ChapterOptions::default()
        };
        self.repo
            .fetch_chapter(chapter_id, &options)
            .await
            .map_err(|err| err.into_catalog("chapter", op))
    }

    async fn editable_chapter(&self, chapter_id: EntityId) -> Result<ChapterRecord, CatalogError> {
        let chapter = self
            .stored_chapter(chapter_id, "catalog::editable_chapter")
            .await?;
        if chapter.locked {
            return Err(CatalogError::validation("chapter is locked"));
        }
        Ok(chapter)
    }

    async fn commit(
        &self,
        mutation: Mutation,
        entity: &'static str,
    ) -> Result<Committed, CatalogError> {
        self.repo
            .commit(mutation)
            .await
            .map_err(|err: RepoError| err.into_catalog(entity, "catalog::commit"))
    }

    fn handles(&self) -> (Arc<StorageLayout>, Arc<CacheTrigger>) {
        (Arc::clone(&self.storage), Arc::clone(&self.trigger))
    }

    async fn after_commit<F>(&self, op: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.submit(op, task).await;
    }
}

async fn remap_from(
    repo: &dyn CatalogRepo,
    storage: &StorageLayout,
) -> Result<RemapOutcome, CatalogError> {
    let trees = repo
        .fetch_trees()
        .await
        .map_err(|err| err.into_catalog("project", "catalog::remap"))?;
    let layouts: Vec<ProjectLayout> = trees
        .iter()
        .map(|tree| ProjectLayout::from_records(&tree.project, &tree.chapters))
        .collect();
    storage
        .remap(&layouts)
        .await
        .map_err(|err| err.into_catalog("catalog::remap"))
}

fn project_slug(title: &str) -> Result<String, CatalogError> {
    let slug = derive_slug(title).map_err(|err| CatalogError::validation(err.to_string()))?;
    if RESERVED_SLUGS.contains(&slug.as_str()) {
        return Err(CatalogError::validation(format!("slug `{slug}` is reserved")));
    }
    Ok(slug)
}

fn check_chapter(draft: &ChapterDraft) -> Result<(), CatalogError> {
    if draft.chapter.trim().is_empty() {
        return Err(CatalogError::validation("chapter number must not be empty"));
    }
    Ok(())
}

fn report_storage_failure(op: &'static str, id: EntityId, err: &StorageError) {
    error!(
        target = SOURCE,
        op,
        result = "error",
        entity_id = id,
        error = %err,
        "Storage side effect failed after commit"
    );
}

fn unexpected_commit(op: &'static str, committed: &Committed) -> CatalogError {
    error!(
        target = SOURCE,
        op,
        result = "error",
        committed = ?committed,
        "Backing store returned a mismatched commit result"
    );
    CatalogError::Unknown
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::cache::{CacheConfig, CatalogCaches, EventQueue, FanoutConsumer};
    use crate::domain::types::{Demographic, ProjectStatus, Rating, SeriesStatus};
    use crate::infra::memory::InMemoryCatalog;

    struct Harness {
        _dir: TempDir,
        repo: Arc<InMemoryCatalog>,
        writer: CatalogWriter,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().expect("tempdir");
        let repo = Arc::new(InMemoryCatalog::new());
        let storage =
            Arc::new(StorageLayout::new(dir.path().join("data"), None).expect("storage layout"));
        let config = CacheConfig::default();
        let caches = Arc::new(CatalogCaches::new(&config));
        let queue = Arc::new(EventQueue::new());
        let consumer = Arc::new(FanoutConsumer::new(config.clone(), caches, Arc::clone(&queue)));
        let tasks = BackgroundTasks::inline();
        let trigger = Arc::new(CacheTrigger::new(config, queue, consumer, tasks.clone()));
        let writer = CatalogWriter::new(repo.clone(), storage, trigger, tasks);
        Harness {
            _dir: dir,
            repo,
            writer,
        }
    }

    fn project(title: &str) -> ProjectDraft {
        ProjectDraft {
            slug: String::new(),
            title: title.to_string(),
            description: None,
            project_status: ProjectStatus::Ongoing,
            series_status: SeriesStatus::Ongoing,
            demographic: Demographic::None,
            rating: Rating::None,
            authors: Vec::new(),
            artists: Vec::new(),
            tags: Vec::new(),
        }
    }

    fn chapter(project_id: EntityId, number: &str, title: Option<&str>) -> ChapterDraft {
        ChapterDraft {
            project_id,
            chapter: number.to_string(),
            volume: None,
            title: title.map(str::to_string),
            uploader: None,
            scanlation_groups: Vec::new(),
            locked: false,
        }
    }

    #[tokio::test]
    async fn reserved_titles_are_rejected_before_commit() {
        let h = harness();

        let err = h.writer.create_project(project("Symlinks")).await.unwrap_err();

        assert!(matches!(err, CatalogError::Validation { .. }));
        assert_eq!(h.repo.calls("commit"), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn project_rename_follows_title() {
        let h = harness();
        let created = h.writer.create_project(project("Foo Bar")).await.expect("create");
        let storage = h.writer.storage();
        let before = storage.resolve_project(created.id).await.expect("resolve");
        assert!(before.ends_with("foo-bar"));

        h.writer
            .update_project(created.id, project("Foo Baz"))
            .await
            .expect("update");

        let after = storage.resolve_project(created.id).await.expect("resolve");
        assert!(after.ends_with("foo-baz"));
        assert!(!before.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chapter_title_change_moves_directory() {
        let h = harness();
        let project = h.writer.create_project(project("Series")).await.expect("project");
        let created = h
            .writer
            .create_chapter(chapter(project.id, "1", None))
            .await
            .expect("chapter");

        h.writer
            .update_chapter(created.id, chapter(project.id, "1", Some("Start")))
            .await
            .expect("update");

        let dir = h.writer.storage().resolve_chapter(created.id).await.expect("resolve");
        assert!(dir.ends_with("ch-1-start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pages_are_ordered_by_number_and_deletable() {
        let h = harness();
        let project = h.writer.create_project(project("Pages")).await.expect("project");
        let chapter = h
            .writer
            .create_chapter(chapter(project.id, "1", None))
            .await
            .expect("chapter");

        h.writer
            .upload_page(chapter.id, "002.png", Bytes::from_static(b"two"))
            .await
            .expect("page 2");
        let pages = h
            .writer
            .upload_page(chapter.id, "001.png", Bytes::from_static(b"one"))
            .await
            .expect("page 1");

        assert_eq!(pages.len(), 2);
        assert!(pages[0].starts_with("1-"));
        assert!(pages[1].starts_with("2-"));

        let remaining = h
            .writer
            .delete_page(chapter.id, &pages[0])
            .await
            .expect("delete");
        assert_eq!(remaining, vec![pages[1].clone()]);
        let dir = h.writer.storage().resolve_chapter(chapter.id).await.expect("resolve");
        assert!(!dir.join(&pages[0]).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn locked_chapters_reject_uploads() {
        let h = harness();
        let project = h.writer.create_project(project("Locked")).await.expect("project");
        let mut draft = chapter(project.id, "1", None);
        draft.locked = true;
        let chapter = h.writer.create_chapter(draft).await.expect("chapter");

        let err = h
            .writer
            .upload_page(chapter.id, "001.png", Bytes::from_static(b"one"))
            .await
            .unwrap_err();

        assert_eq!(err, CatalogError::validation("chapter is locked"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn first_cover_becomes_main_cover() {
        let h = harness();
        let project = h.writer.create_project(project("Covers")).await.expect("project");

        let first = h
            .writer
            .upload_cover(project.id, "a.png", Bytes::from_static(b"a"), false)
            .await
            .expect("first cover");
        h.writer
            .upload_cover(project.id, "b.png", Bytes::from_static(b"b"), false)
            .await
            .expect("second cover");

        let cover = h.repo.fetch_cover(project.id).await.expect("fetch cover");
        assert_eq!(cover.map(|c| c.id), Some(first.id));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn remap_relinks_created_projects() {
        let h = harness();
        let project = h.writer.create_project(project("Remap Me")).await.expect("project");
        let storage = h.writer.storage();
        tokio::fs::remove_file(storage.project_link(project.id))
            .await
            .expect("drop link");

        let outcome = h.writer.remap_storage().await.expect("remap");

        let RemapOutcome::Completed(report) = outcome else {
            panic!("remap did not run");
        };
        assert_eq!(report.projects_linked, 1);
        assert!(storage.resolve_project(project.id).await.is_ok());
    }

    #[tokio::test]
    async fn views_update_stats() {
        let h = harness();
        let project = h.writer.create_project(project("Viewed")).await.expect("project");

        h.writer
            .record_view(StatsOwner::Project(project.id), true)
            .await
            .expect("view");
        let stats = h
            .writer
            .record_view(StatsOwner::Project(project.id), false)
            .await
            .expect("view");

        assert_eq!(stats.view_count, 2);
        assert_eq!(stats.unique_view_count, 1);
    }
}
