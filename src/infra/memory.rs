//! In-memory catalog backing store.
//!
//! Serves the operator binary (seeded from a snapshot) and the test suites,
//! which read the per-operation call counters to observe cache behavior.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use crate::application::options::{
    ChapterListOptions, ChapterOptions, ChapterSort, ProjectListOptions, ProjectOptions,
    ProjectPreload, ProjectSort, SortOrder,
};
use crate::application::repos::{
    CatalogRepo, ChapterDraft, Committed, Mutation, ProjectDraft, ProjectTree, RepoError,
};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::entities::{
    ChapterRecord, CoverRecord, EntityId, Listing, ProjectRecord, StatsOwner, StatsRecord,
};
use crate::domain::slug::{derive_slug, normalize_filter};
use crate::infra::snapshot::CatalogSnapshot;

const SOURCE: &str = "infra::memory";

#[derive(Debug, Default)]
struct CatalogState {
    projects: BTreeMap<EntityId, ProjectRecord>,
    chapters: BTreeMap<EntityId, ChapterRecord>,
    covers: BTreeMap<EntityId, CoverRecord>,
    stats: HashMap<StatsOwner, StatsRecord>,
    last_id: EntityId,
}

impl CatalogState {
    fn next_id(&mut self) -> EntityId {
        self.last_id += 1;
        self.last_id
    }

    fn visible_project(&self, id: EntityId, include_drafts: bool) -> Option<&ProjectRecord> {
        self.projects
            .get(&id)
            .filter(|project| include_drafts || project.is_published())
    }

    fn owner_exists(&self, owner: StatsOwner) -> bool {
        match owner {
            StatsOwner::Project(id) => self.projects.contains_key(&id),
            StatsOwner::Chapter(id) => self.chapters.contains_key(&id),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
    calls: DashMap<&'static str, usize>,
    unavailable: AtomicBool,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let mut state = CatalogState::default();
        for project in snapshot.projects {
            state.last_id = state.last_id.max(project.id);
            state.projects.insert(project.id, project);
        }
        for chapter in snapshot.chapters {
            state.last_id = state.last_id.max(chapter.id);
            state.chapters.insert(chapter.id, chapter);
        }
        for cover in snapshot.covers {
            state.last_id = state.last_id.max(cover.id);
            state.covers.insert(cover.id, cover);
        }

        Self {
            state: RwLock::new(state),
            ..Self::default()
        }
    }

    /// Number of times `op` (e.g. `"fetch_project"`) reached the store.
    pub fn calls(&self, op: &str) -> usize {
        self.calls.get(op).map_or(0, |count| *count)
    }

    pub fn reset_calls(&self) {
        self.calls.clear();
    }

    /// Make every fetch fail with a timeout until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    fn enter(&self, op: &'static str) -> Result<(), RepoError> {
        *self.calls.entry(op).or_default() += 1;
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        Ok(())
    }

    fn commit_sync(&self, mutation: Mutation) -> Result<Committed, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "commit");
        let now = OffsetDateTime::now_utc();

        match mutation {
            Mutation::CreateProject(draft) => {
                ensure_unique_slug(&state, &draft.slug, None)?;
                let id = state.next_id();
                let record = project_from_draft(id, draft, now);
                state.projects.insert(id, record.clone());
                Ok(Committed::Project {
                    record,
                    previous_slug: None,
                })
            }
            Mutation::UpdateProject { id, draft } => {
                ensure_unique_slug(&state, &draft.slug, Some(id))?;
                let project = state.projects.get_mut(&id).ok_or(RepoError::NotFound)?;
                let previous_slug = Some(project.slug.clone());
                apply_project_draft(project, draft, now);
                Ok(Committed::Project {
                    record: project.clone(),
                    previous_slug,
                })
            }
            Mutation::SetProjectPublished { id, published } => {
                let project = state.projects.get_mut(&id).ok_or(RepoError::NotFound)?;
                project.published_at = published.then_some(project.published_at.unwrap_or(now));
                project.updated_at = now;
                Ok(Committed::Project {
                    previous_slug: Some(project.slug.clone()),
                    record: project.clone(),
                })
            }
            Mutation::DeleteProject { id } => {
                let record = state.projects.remove(&id).ok_or(RepoError::NotFound)?;
                let chapter_ids: Vec<EntityId> = state
                    .chapters
                    .values()
                    .filter(|chapter| chapter.project_id == id)
                    .map(|chapter| chapter.id)
                    .collect();
                for chapter_id in &chapter_ids {
                    state.chapters.remove(chapter_id);
                    state.stats.remove(&StatsOwner::Chapter(*chapter_id));
                }
                state.covers.retain(|_, cover| cover.project_id != id);
                state.stats.remove(&StatsOwner::Project(id));
                Ok(Committed::ProjectDeleted {
                    record,
                    chapter_ids,
                })
            }
            Mutation::CreateChapter(draft) => {
                if !state.projects.contains_key(&draft.project_id) {
                    return Err(RepoError::invalid_input("chapter references an unknown project"));
                }
                let id = state.next_id();
                let record = chapter_from_draft(id, draft, now);
                state.chapters.insert(id, record.clone());
                Ok(Committed::Chapter {
                    record,
                    previous_dir_name: None,
                })
            }
            Mutation::UpdateChapter { id, draft } => {
                if !state.projects.contains_key(&draft.project_id) {
                    return Err(RepoError::invalid_input("chapter references an unknown project"));
                }
                let chapter = state.chapters.get_mut(&id).ok_or(RepoError::NotFound)?;
                if chapter.project_id != draft.project_id {
                    return Err(RepoError::invalid_input("chapter cannot change project"));
                }
                let previous_dir_name = chapter.dir_name().ok();
                apply_chapter_draft(chapter, draft, now);
                Ok(Committed::Chapter {
                    record: chapter.clone(),
                    previous_dir_name,
                })
            }
            Mutation::SetChapterPublished { id, published } => {
                let chapter = state.chapters.get_mut(&id).ok_or(RepoError::NotFound)?;
                chapter.published_at = published.then_some(chapter.published_at.unwrap_or(now));
                chapter.updated_at = now;
                Ok(Committed::Chapter {
                    previous_dir_name: chapter.dir_name().ok(),
                    record: chapter.clone(),
                })
            }
            Mutation::DeleteChapter { id } => {
                let record = state.chapters.remove(&id).ok_or(RepoError::NotFound)?;
                state.stats.remove(&StatsOwner::Chapter(id));
                Ok(Committed::ChapterDeleted { record })
            }
            Mutation::AddCover {
                project_id,
                file_name,
            } => {
                let selected = state
                    .projects
                    .get(&project_id)
                    .ok_or(RepoError::NotFound)?
                    .cover_file
                    .clone();
                if let Some(existing) = state
                    .covers
                    .values()
                    .find(|cover| cover.project_id == project_id && cover.file_name == file_name)
                {
                    return Ok(Committed::Cover {
                        record: existing.clone(),
                        selected,
                    });
                }
                let id = state.next_id();
                let record = CoverRecord {
                    id,
                    project_id,
                    file_name,
                };
                state.covers.insert(id, record.clone());
                Ok(Committed::Cover { record, selected })
            }
            Mutation::SelectCover {
                project_id,
                cover_id,
            } => {
                let record = state
                    .covers
                    .get(&cover_id)
                    .filter(|cover| cover.project_id == project_id)
                    .cloned()
                    .ok_or(RepoError::NotFound)?;
                let project = state.projects.get_mut(&project_id).ok_or(RepoError::NotFound)?;
                project.cover_file = Some(record.file_name.clone());
                project.updated_at = now;
                Ok(Committed::Cover {
                    selected: project.cover_file.clone(),
                    record,
                })
            }
            Mutation::DeleteCover {
                project_id,
                cover_id,
            } => {
                if state
                    .covers
                    .get(&cover_id)
                    .is_none_or(|cover| cover.project_id != project_id)
                {
                    return Err(RepoError::NotFound);
                }
                let record = state.covers.remove(&cover_id).ok_or(RepoError::NotFound)?;
                let project = state.projects.get_mut(&project_id).ok_or(RepoError::NotFound)?;
                if project.cover_file.as_deref() == Some(record.file_name.as_str()) {
                    project.cover_file = None;
                }
                Ok(Committed::CoverDeleted {
                    selected: project.cover_file.clone(),
                    record,
                })
            }
            Mutation::SetPages { chapter_id, pages } => {
                let chapter = state.chapters.get_mut(&chapter_id).ok_or(RepoError::NotFound)?;
                chapter.pages = pages;
                chapter.updated_at = now;
                Ok(Committed::Pages {
                    record: chapter.clone(),
                })
            }
            Mutation::RecordView { owner, unique } => {
                if !state.owner_exists(owner) {
                    return Err(RepoError::NotFound);
                }
                let stats = state.stats.entry(owner).or_default();
                stats.view_count += 1;
                if unique {
                    stats.unique_view_count += 1;
                }
                Ok(Committed::Stats {
                    owner,
                    stats: *stats,
                })
            }
        }
    }
}

#[async_trait]
impl CatalogRepo for InMemoryCatalog {
    async fn fetch_project(
        &self,
        id: EntityId,
        options: &ProjectOptions,
    ) -> Result<ProjectRecord, RepoError> {
        self.enter("fetch_project")?;
        let state = rw_read(&self.state, SOURCE, "fetch_project");
        let project = state
            .visible_project(id, options.include_drafts)
            .ok_or(RepoError::NotFound)?;
        Ok(with_preloads(project.clone(), &options.preloads))
    }

    async fn fetch_projects(
        &self,
        options: &ProjectListOptions,
    ) -> Result<Listing<ProjectRecord>, RepoError> {
        self.enter("fetch_projects")?;
        let state = rw_read(&self.state, SOURCE, "fetch_projects");
        let mut matched: Vec<&ProjectRecord> = state
            .projects
            .values()
            .filter(|project| options.include_drafts || project.is_published())
            .filter(|project| project_matches(project, options))
            .collect();
        matched.sort_by(|a, b| directed(compare_projects(a, b, options.sort), options.order));

        let total = matched.len() as u64;
        let items = page(matched, options.offset, options.limit)
            .map(|project| with_preloads(project.clone(), &options.preloads))
            .collect();
        Ok(Listing::new(items, total))
    }

    async fn fetch_chapter(
        &self,
        id: EntityId,
        options: &ChapterOptions,
    ) -> Result<ChapterRecord, RepoError> {
        self.enter("fetch_chapter")?;
        let state = rw_read(&self.state, SOURCE, "fetch_chapter");
        state
            .chapters
            .get(&id)
            .filter(|chapter| options.include_drafts || chapter.is_published())
            .filter(|chapter| {
                state
                    .visible_project(chapter.project_id, options.include_drafts)
                    .is_some()
            })
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn fetch_chapters(
        &self,
        options: &ChapterListOptions,
    ) -> Result<Listing<ChapterRecord>, RepoError> {
        self.enter("fetch_chapters")?;
        let state = rw_read(&self.state, SOURCE, "fetch_chapters");
        let mut matched: Vec<&ChapterRecord> = state
            .chapters
            .values()
            .filter(|chapter| options.include_drafts || chapter.is_published())
            .filter(|chapter| {
                state
                    .visible_project(chapter.project_id, options.include_drafts)
                    .is_some()
            })
            .filter(|chapter| chapter_matches(chapter, options))
            .collect();
        matched.sort_by(|a, b| directed(compare_chapters(a, b, options.sort), options.order));

        let total = matched.len() as u64;
        let items = page(matched, options.offset, options.limit)
            .cloned()
            .collect();
        Ok(Listing::new(items, total))
    }

    async fn fetch_cover(&self, project_id: EntityId) -> Result<Option<CoverRecord>, RepoError> {
        self.enter("fetch_cover")?;
        let state = rw_read(&self.state, SOURCE, "fetch_cover");
        let project = state.projects.get(&project_id).ok_or(RepoError::NotFound)?;
        let Some(file_name) = project.cover_file.as_deref() else {
            return Ok(None);
        };
        Ok(state
            .covers
            .values()
            .find(|cover| cover.project_id == project_id && cover.file_name == file_name)
            .cloned())
    }

    async fn fetch_covers(&self, project_id: EntityId) -> Result<Vec<CoverRecord>, RepoError> {
        self.enter("fetch_covers")?;
        let state = rw_read(&self.state, SOURCE, "fetch_covers");
        if !state.projects.contains_key(&project_id) {
            return Err(RepoError::NotFound);
        }
        Ok(state
            .covers
            .values()
            .filter(|cover| cover.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn fetch_pages(&self, chapter_id: EntityId) -> Result<Vec<String>, RepoError> {
        self.enter("fetch_pages")?;
        let state = rw_read(&self.state, SOURCE, "fetch_pages");
        state
            .chapters
            .get(&chapter_id)
            .map(|chapter| chapter.pages.clone())
            .ok_or(RepoError::NotFound)
    }

    async fn fetch_project_stats(&self, id: EntityId) -> Result<StatsRecord, RepoError> {
        self.enter("fetch_project_stats")?;
        self.stats_of(StatsOwner::Project(id))
    }

    async fn fetch_chapter_stats(&self, id: EntityId) -> Result<StatsRecord, RepoError> {
        self.enter("fetch_chapter_stats")?;
        self.stats_of(StatsOwner::Chapter(id))
    }

    async fn fetch_trees(&self) -> Result<Vec<ProjectTree>, RepoError> {
        self.enter("fetch_trees")?;
        let state = rw_read(&self.state, SOURCE, "fetch_trees");
        Ok(state
            .projects
            .values()
            .map(|project| ProjectTree {
                project: project.clone(),
                chapters: state
                    .chapters
                    .values()
                    .filter(|chapter| chapter.project_id == project.id)
                    .cloned()
                    .collect(),
            })
            .collect())
    }

    async fn commit(&self, mutation: Mutation) -> Result<Committed, RepoError> {
        self.enter("commit")?;
        self.commit_sync(mutation)
    }
}

impl InMemoryCatalog {
    fn stats_of(&self, owner: StatsOwner) -> Result<StatsRecord, RepoError> {
        let state = rw_read(&self.state, SOURCE, "fetch_stats");
        if !state.owner_exists(owner) {
            return Err(RepoError::NotFound);
        }
        Ok(state.stats.get(&owner).copied().unwrap_or_default())
    }
}

fn ensure_unique_slug(
    state: &CatalogState,
    slug: &str,
    except: Option<EntityId>,
) -> Result<(), RepoError> {
    let taken = state
        .projects
        .values()
        .any(|project| project.slug == slug && Some(project.id) != except);
    if taken {
        return Err(RepoError::Duplicate {
            constraint: "projects_slug_key".to_string(),
        });
    }
    Ok(())
}

fn project_from_draft(id: EntityId, draft: ProjectDraft, now: OffsetDateTime) -> ProjectRecord {
    ProjectRecord {
        id,
        slug: draft.slug,
        title: draft.title,
        description: draft.description,
        project_status: draft.project_status,
        series_status: draft.series_status,
        demographic: draft.demographic,
        rating: draft.rating,
        authors: draft.authors,
        artists: draft.artists,
        tags: draft.tags,
        cover_file: None,
        published_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn apply_project_draft(project: &mut ProjectRecord, draft: ProjectDraft, now: OffsetDateTime) {
    project.slug = draft.slug;
    project.title = draft.title;
    project.description = draft.description;
    project.project_status = draft.project_status;
    project.series_status = draft.series_status;
    project.demographic = draft.demographic;
    project.rating = draft.rating;
    project.authors = draft.authors;
    project.artists = draft.artists;
    project.tags = draft.tags;
    project.updated_at = now;
}

fn chapter_from_draft(id: EntityId, draft: ChapterDraft, now: OffsetDateTime) -> ChapterRecord {
    ChapterRecord {
        id,
        project_id: draft.project_id,
        chapter: draft.chapter,
        volume: draft.volume,
        title: draft.title,
        uploader: draft.uploader,
        scanlation_groups: draft.scanlation_groups,
        pages: Vec::new(),
        locked: draft.locked,
        published_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn apply_chapter_draft(chapter: &mut ChapterRecord, draft: ChapterDraft, now: OffsetDateTime) {
    chapter.chapter = draft.chapter;
    chapter.volume = draft.volume;
    chapter.title = draft.title;
    chapter.uploader = draft.uploader;
    chapter.scanlation_groups = draft.scanlation_groups;
    chapter.locked = draft.locked;
    chapter.updated_at = now;
}

/// Drop relations the caller did not ask for.
fn with_preloads(mut project: ProjectRecord, preloads: &[ProjectPreload]) -> ProjectRecord {
    if !preloads.contains(&ProjectPreload::Authors) {
        project.authors.clear();
    }
    if !preloads.contains(&ProjectPreload::Artists) {
        project.artists.clear();
    }
    if !preloads.contains(&ProjectPreload::Tags) {
        project.tags.clear();
    }
    if !preloads.contains(&ProjectPreload::Cover) {
        project.cover_file = None;
    }
    project
}

fn slugs_of(values: &[String]) -> Vec<String> {
    values.iter().map(|value| normalize_filter(value)).collect()
}

fn project_matches(project: &ProjectRecord, options: &ProjectListOptions) -> bool {
    if let Some(title) = options.title.as_deref()
        && !derive_slug(&project.title).unwrap_or_default().contains(title)
    {
        return false;
    }

    if !admits(&options.project_status, &options.exclude_project_status, project.project_status)
        || !admits(&options.series_status, &options.exclude_series_status, project.series_status)
        || !admits(&options.demographic, &options.exclude_demographic, project.demographic)
        || !admits(&options.rating, &options.exclude_rating, project.rating)
    {
        return false;
    }

    let mut people = slugs_of(&project.authors);
    people.extend(slugs_of(&project.artists));
    if !options.authors.is_empty() && !options.authors.iter().any(|author| people.contains(author)) {
        return false;
    }

    let tags = slugs_of(&project.tags);
    options.tags.iter().all(|tag| tags.contains(tag))
        && !options.exclude_tags.iter().any(|tag| tags.contains(tag))
}

/// An empty include list admits everything not excluded.
fn admits<T: PartialEq>(include: &[T], exclude: &[T], value: T) -> bool {
    (include.is_empty() || include.contains(&value)) && !exclude.contains(&value)
}

fn chapter_matches(chapter: &ChapterRecord, options: &ChapterListOptions) -> bool {
    if options
        .project_id
        .is_some_and(|project_id| chapter.project_id != project_id)
    {
        return false;
    }
    if let Some(uploader) = options.uploader.as_deref()
        && chapter.uploader.as_deref().map(str::to_lowercase).as_deref() != Some(uploader)
    {
        return false;
    }
    if options.scanlation_groups.is_empty() {
        return true;
    }
    let groups = slugs_of(&chapter.scanlation_groups);
    options
        .scanlation_groups
        .iter()
        .any(|group| groups.contains(group))
}

fn compare_projects(a: &ProjectRecord, b: &ProjectRecord, sort: ProjectSort) -> Ordering {
    match sort {
        ProjectSort::Id => a.id.cmp(&b.id),
        ProjectSort::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        ProjectSort::PublishedAt => a.published_at.cmp(&b.published_at),
        ProjectSort::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        ProjectSort::CreatedAt => a.created_at.cmp(&b.created_at),
    }
    .then(a.id.cmp(&b.id))
}

fn compare_chapters(a: &ChapterRecord, b: &ChapterRecord, sort: ChapterSort) -> Ordering {
    match sort {
        ChapterSort::Id => a.id.cmp(&b.id),
        ChapterSort::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        ChapterSort::PublishedAt => a.published_at.cmp(&b.published_at),
        ChapterSort::Chapter => compare_numbering(&a.chapter, &b.chapter),
        ChapterSort::Volume => compare_numbering(
            a.volume.as_deref().unwrap_or_default(),
            b.volume.as_deref().unwrap_or_default(),
        )
        .then_with(|| compare_numbering(&a.chapter, &b.chapter)),
        ChapterSort::CreatedAt => a.created_at.cmp(&b.created_at),
    }
    .then(a.id.cmp(&b.id))
}

/// Numeric where both sides parse ("2" before "10"), lexical otherwise.
fn compare_numbering(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.total_cmp(&b),
        _ => a.cmp(b),
    }
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

fn page<T>(items: Vec<T>, offset: u64, limit: u32) -> impl Iterator<Item = T> {
    items
        .into_iter()
        .skip(usize::try_from(offset).unwrap_or(usize::MAX))
        .take(limit as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::options::{ChapterListQuery, ProjectListQuery, canonicalize};
    use crate::domain::types::{Demographic, ProjectStatus, Rating, SeriesStatus};

    fn draft(title: &str) -> ProjectDraft {
        ProjectDraft {
            slug: derive_slug(title).expect("slug"),
            title: title.to_string(),
            description: None,
            project_status: ProjectStatus::Ongoing,
            series_status: SeriesStatus::Ongoing,
            demographic: Demographic::None,
            rating: Rating::None,
            authors: vec!["Jane Doe".to_string()],
            artists: Vec::new(),
            tags: vec!["Action".to_string()],
        }
    }

    fn chapter_draft(project_id: EntityId, chapter: &str) -> ChapterDraft {
        ChapterDraft {
            project_id,
            chapter: chapter.to_string(),
            volume: None,
            title: None,
            uploader: Some("Admin".to_string()),
            scanlation_groups: Vec::new(),
            locked: false,
        }
    }

    async fn create_project(catalog: &InMemoryCatalog, title: &str, published: bool) -> EntityId {
        let Committed::Project { record, .. } = catalog
            .commit(Mutation::CreateProject(draft(title)))
            .await
            .expect("create")
        else {
            panic!("unexpected commit result");
        };
        if published {
            catalog
                .commit(Mutation::SetProjectPublished {
                    id: record.id,
                    published: true,
                })
                .await
                .expect("publish");
        }
        record.id
    }

    #[tokio::test]
    async fn drafts_are_hidden_unless_requested() {
        let catalog = InMemoryCatalog::new();
        let id = create_project(&catalog, "Hidden", false).await;

        let public = ProjectOptions {
            preloads: Vec::new(),
            include_drafts: false,
        };
        assert!(matches!(
            catalog.fetch_project(id, &public).await,
            Err(RepoError::NotFound)
        ));

        let admin = ProjectOptions {
            include_drafts: true,
            ..public
        };
        assert_eq!(catalog.fetch_project(id, &admin).await.expect("project").id, id);
        assert_eq!(catalog.calls("fetch_project"), 2);
    }

    #[tokio::test]
    async fn duplicate_slug_is_rejected() {
        let catalog = InMemoryCatalog::new();
        create_project(&catalog, "Same", false).await;

        let err = catalog
            .commit(Mutation::CreateProject(draft("Same")))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn project_listing_filters_and_pages() {
        let catalog = InMemoryCatalog::new();
        for title in ["Alpha", "Beta", "Gamma"] {
            create_project(&catalog, title, true).await;
        }

        let query = ProjectListQuery {
            tags: vec!["action".to_string()],
            authors: vec!["jane doe".to_string()],
            sort: Some("title".to_string()),
            order: Some("asc".to_string()),
            limit: 2,
            ..ProjectListQuery::default()
        };
        let listing = catalog
            .fetch_projects(&canonicalize(&query).expect("options"))
            .await
            .expect("listing");

        assert_eq!(listing.total, 3);
        let titles: Vec<_> = listing.items.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, ["Alpha", "Beta"]);
        assert!(listing.items[0].tags.is_empty(), "tags not preloaded");
    }

    #[tokio::test]
    async fn chapters_sort_numerically() {
        let catalog = InMemoryCatalog::new();
        let project_id = create_project(&catalog, "Series", true).await;
        for number in ["10", "2", "1"] {
            catalog
                .commit(Mutation::CreateChapter(chapter_draft(project_id, number)))
                .await
                .expect("chapter");
        }

        let query = ChapterListQuery {
            project_id: Some(project_id),
            sort: Some("chapter".to_string()),
            order: Some("asc".to_string()),
            include_drafts: true,
            ..ChapterListQuery::default()
        };
        let listing = catalog
            .fetch_chapters(&canonicalize(&query).expect("options"))
            .await
            .expect("listing");

        let numbers: Vec<_> = listing.items.iter().map(|c| c.chapter.as_str()).collect();
        assert_eq!(numbers, ["1", "2", "10"]);
    }

    #[tokio::test]
    async fn chapter_stays_with_its_project() {
        let catalog = InMemoryCatalog::new();
        let home = create_project(&catalog, "Home", true).await;
        let other = create_project(&catalog, "Other", true).await;
        let Committed::Chapter { record, .. } = catalog
            .commit(Mutation::CreateChapter(chapter_draft(home, "1")))
            .await
            .expect("chapter")
        else {
            panic!("unexpected commit result");
        };

        let err = catalog
            .commit(Mutation::UpdateChapter {
                id: record.id,
                draft: chapter_draft(other, "1"),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RepoError::InvalidInput { .. }));
        let options = ChapterOptions {
            include_drafts: true,
            ..ChapterOptions::default()
        };
        let stored = catalog.fetch_chapter(record.id, &options).await.expect("chapter");
        assert_eq!(stored.project_id, home);
    }

    #[tokio::test]
    async fn project_delete_reports_removed_chapters() {
        let catalog = InMemoryCatalog::new();
        let doomed = create_project(&catalog, "Doomed", true).await;
        let kept = create_project(&catalog, "Kept", true).await;
        let mut expected = Vec::new();
        for (project_id, number) in [(doomed, "1"), (kept, "1"), (doomed, "2")] {
            let Committed::Chapter { record, .. } = catalog
                .commit(Mutation::CreateChapter(chapter_draft(project_id, number)))
                .await
                .expect("chapter")
            else {
                panic!("unexpected commit result");
            };
            if project_id == doomed {
                expected.push(record.id);
            }
        }

        let Committed::ProjectDeleted {
            mut chapter_ids, ..
        } = catalog
            .commit(Mutation::DeleteProject { id: doomed })
            .await
            .expect("delete")
        else {
            panic!("unexpected commit result");
        };

        chapter_ids.sort_unstable();
        assert_eq!(chapter_ids, expected);
    }

    #[tokio::test]
    async fn deleting_selected_cover_clears_selection() {
        let catalog = InMemoryCatalog::new();
        let project_id = create_project(&catalog, "Covered", true).await;
        let Committed::Cover { record, .. } = catalog
            .commit(Mutation::AddCover {
                project_id,
                file_name: "abc.png".to_string(),
            })
            .await
            .expect("cover")
        else {
            panic!("unexpected commit result");
        };
        catalog
            .commit(Mutation::SelectCover {
                project_id,
                cover_id: record.id,
            })
            .await
            .expect("select");
        assert_eq!(
            catalog.fetch_cover(project_id).await.expect("cover"),
            Some(record.clone())
        );

        let committed = catalog
            .commit(Mutation::DeleteCover {
                project_id,
                cover_id: record.id,
            })
            .await
            .expect("delete");

        assert!(matches!(committed, Committed::CoverDeleted { selected: None, .. }));
        assert_eq!(catalog.fetch_cover(project_id).await.expect("cover"), None);
    }

    #[tokio::test]
    async fn views_accumulate_per_owner() {
        let catalog = InMemoryCatalog::new();
        let id = create_project(&catalog, "Viewed", true).await;
        let owner = StatsOwner::Project(id);

        for unique in [true, false, false] {
            catalog
                .commit(Mutation::RecordView { owner, unique })
                .await
                .expect("view");
        }

        let stats = catalog.fetch_project_stats(id).await.expect("stats");
        assert_eq!(stats.view_count, 3);
        assert_eq!(stats.unique_view_count, 1);
        assert!(matches!(
            catalog.fetch_chapter_stats(999).await,
            Err(RepoError::NotFound)
        ));
    }

    #[tokio::test]
    async fn unavailable_store_times_out() {
        let catalog = InMemoryCatalog::new();
        catalog.set_unavailable(true);

        assert!(matches!(
            catalog.fetch_pages(1).await,
            Err(RepoError::Timeout)
        ));
        assert_eq!(catalog.calls("fetch_pages"), 1);
    }
}
