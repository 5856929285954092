//! Read-through catalog lookups.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, warn};

use crate::application::options::{
    ChapterListOptions, ChapterListQuery, ChapterOptions, ChapterQuery, ProjectListOptions,
    ProjectListQuery, ProjectOptions, ProjectQuery, canonicalize,
};
use crate::application::repos::CatalogRepo;
use crate::cache::{
    CacheFamily, CacheStats, CatalogCaches, CompositeKey, Envelope, KeyError, Rewarm, Scope,
    key_for, unit_key,
};
use crate::domain::entities::{
    ChapterRecord, CoverRecord, EntityId, Listing, ProjectRecord, StatsRecord,
};
use crate::domain::error::CatalogError;

const SOURCE: &str = "application::catalog";

/// Renders a public route to markup from catalog data.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, route: &str, catalog: &CatalogReader) -> Result<String, CatalogError>;
}

/// Catalog read façade. Every lookup goes through the family cache.
pub struct CatalogReader {
    caches: Arc<CatalogCaches>,
    repo: Arc<dyn CatalogRepo>,
    renderer: Option<Arc<dyn PageRenderer>>,
}

impl CatalogReader {
    pub fn new(caches: Arc<CatalogCaches>, repo: Arc<dyn CatalogRepo>) -> Self {
        Self {
            caches,
            repo,
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn caches(&self) -> &Arc<CatalogCaches> {
        &self.caches
    }

    pub async fn get_project(
        &self,
        id: EntityId,
        query: &ProjectQuery,
    ) -> Envelope<ProjectRecord> {
        let options = canonicalize(query)?;
        self.project_with(id, options).await
    }

    pub async fn get_projects(&self, query: &ProjectListQuery) -> Envelope<Listing<ProjectRecord>> {
        let options = canonicalize(query)?;
        self.projects_with(options).await
    }

    pub async fn get_chapter(
        &self,
        id: EntityId,
        query: &ChapterQuery,
    ) -> Envelope<ChapterRecord> {
        let options = canonicalize(query)?;
        self.chapter_with(id, options).await
    }

    /// Chapters across the catalog, or of one project when the query names it.
    pub async fn get_chapters(&self, query: &ChapterListQuery) -> Envelope<Listing<ChapterRecord>> {
        let options = canonicalize(query)?;
        self.chapters_with(options).await
    }

    pub async fn get_project_chapters(
        &self,
        project_id: EntityId,
        query: &ChapterListQuery,
    ) -> Envelope<Listing<ChapterRecord>> {
        let query = ChapterListQuery {
            project_id: Some(project_id),
            ..query.clone()
        };
        self.get_chapters(&query).await
    }

    /// The project's main cover. A project without one is not cached.
    pub async fn get_cover(&self, project_id: EntityId) -> Envelope<Option<CoverRecord>> {
        let key = unit_key(Scope::Id(project_id));
        if let Some(cached) = self.caches.covers.lookup::<CoverRecord>(&key) {
            return cached.map(Some);
        }

        let envelope = self
            .repo
            .fetch_cover(project_id)
            .await
            .map_err(|err| err.into_catalog("cover", "catalog::get_cover"));
        match &envelope {
            Ok(Some(cover)) => {
                self.caches.covers.store(&key, &Ok(cover.clone()));
            }
            Ok(None) => {}
            Err(err) => {
                self.caches
                    .covers
                    .store::<CoverRecord>(&key, &Err(err.clone()));
            }
        }
        envelope
    }

    pub async fn get_covers(&self, project_id: EntityId) -> Envelope<Vec<CoverRecord>> {
        let key = unit_key(Scope::Project(project_id));
        self.caches
            .covers
            .read_through(&key, || async {
                self.repo
                    .fetch_covers(project_id)
                    .await
                    .map_err(|err| err.into_catalog("covers", "catalog::get_covers"))
            })
            .await
    }

    pub async fn get_pages(&self, chapter_id: EntityId) -> Envelope<Vec<String>> {
        let key = unit_key(Scope::Id(chapter_id));
        self.caches
            .pages
            .read_through(&key, || async {
                self.repo
                    .fetch_pages(chapter_id)
                    .await
                    .map_err(|err| err.into_catalog("pages", "catalog::get_pages"))
            })
            .await
    }

    pub async fn get_project_stats(&self, id: EntityId) -> Envelope<StatsRecord> {
        let key = unit_key(Scope::Project(id));
        self.caches
            .stats
            .read_through(&key, || async {
                self.repo
                    .fetch_project_stats(id)
                    .await
                    .map_err(|err| err.into_catalog("statistics", "catalog::get_project_stats"))
            })
            .await
    }

    pub async fn get_chapter_stats(&self, id: EntityId) -> Envelope<StatsRecord> {
        let key = unit_key(Scope::Chapter(id));
        self.caches
            .stats
            .read_through(&key, || async {
                self.repo
                    .fetch_chapter_stats(id)
                    .await
                    .map_err(|err| err.into_catalog("statistics", "catalog::get_chapter_stats"))
            })
            .await
    }

    /// Rendered markup for `route`. Without a renderer nothing is cached.
    pub async fn get_rendered(&self, route: &str) -> Envelope<String> {
        let Some(renderer) = &self.renderer else {
            return Err(CatalogError::not_found("renderer"));
        };

        let route = route.trim().to_string();
        let key = self.key(Scope::Global, &route)?;
        self.caches
            .rendered
            .read_through(&key, || async { renderer.render(&route, self).await })
            .await
    }

    /// Hit, miss, eviction and size counters per family.
    pub fn cache_stats(&self) -> BTreeMap<&'static str, CacheStats> {
        self.caches.stats()
    }

    /// Re-issue the lookup `key` was cached for.
    ///
    /// Returns false when the key cannot be mapped back to a lookup.
    pub async fn rewarm_key(&self, family: CacheFamily, key: &CompositeKey) -> bool {
        match self.reissue(family, key).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    op = "catalog::rewarm_key",
                    family = family.as_str(),
                    key = %key,
                    result = "skipped",
                    error = %err,
                    "Cached key could not be rewarmed"
                );
                false
            }
        }
    }

    async fn reissue(&self, family: CacheFamily, key: &CompositeKey) -> Result<(), KeyError> {
        let scope = key.scope()?;
        match (family, scope) {
            (CacheFamily::Projects, Scope::Id(id)) => {
                let _ = self.project_with(id, key.decode::<ProjectOptions>()?).await;
            }
            (CacheFamily::Projects, Scope::Global) => {
                let _ = self.projects_with(key.decode::<ProjectListOptions>()?).await;
            }
            (CacheFamily::Chapters, Scope::Id(id)) => {
                let _ = self.chapter_with(id, key.decode::<ChapterOptions>()?).await;
            }
            (CacheFamily::Chapters, Scope::Global | Scope::Project(_)) => {
                let _ = self.chapters_with(key.decode::<ChapterListOptions>()?).await;
            }
            (CacheFamily::Covers, Scope::Id(project_id)) => {
                let _ = self.get_cover(project_id).await;
            }
            (CacheFamily::Covers, Scope::Project(project_id)) => {
                let _ = self.get_covers(project_id).await;
            }
            (CacheFamily::Pages, Scope::Id(chapter_id)) => {
                let _ = self.get_pages(chapter_id).await;
            }
            (CacheFamily::Stats, Scope::Project(id)) => {
                let _ = self.get_project_stats(id).await;
            }
            (CacheFamily::Stats, Scope::Chapter(id)) => {
                let _ = self.get_chapter_stats(id).await;
            }
            (CacheFamily::Rendered, Scope::Global) => {
                let _ = self.get_rendered(&key.decode::<String>()?).await;
            }
            _ => return Err(KeyError::UnknownScope(key.to_string())),
        }
        Ok(())
    }

    async fn project_with(&self, id: EntityId, options: ProjectOptions) -> Envelope<ProjectRecord> {
        let key = self.key(Scope::Id(id), &options)?;
        self.caches
            .projects
            .read_through(&key, || async {
                self.repo
                    .fetch_project(id, &options)
                    .await
                    .map_err(|err| err.into_catalog("project", "catalog::get_project"))
            })
            .await
    }

    async fn projects_with(&self, options: ProjectListOptions) -> Envelope<Listing<ProjectRecord>> {
        let key = self.key(Scope::Global, &options)?;
        self.caches
            .projects
            .read_through(&key, || async {
                self.repo
                    .fetch_projects(&options)
                    .await
                    .map_err(|err| err.into_catalog("projects", "catalog::get_projects"))
            })
            .await
    }

    async fn chapter_with(&self, id: EntityId, options: ChapterOptions) -> Envelope<ChapterRecord> {
        let key = self.key(Scope::Id(id), &options)?;
        self.caches
            .chapters
            .read_through(&key, || async {
                self.repo
                    .fetch_chapter(id, &options)
                    .await
                    .map_err(|err| err.into_catalog("chapter", "catalog::get_chapter"))
            })
            .await
    }

    async fn chapters_with(&self, options: ChapterListOptions) -> Envelope<Listing<ChapterRecord>> {
        let scope = options.project_id.map_or(Scope::Global, Scope::Project);
        let key = self.key(scope, &options)?;
        self.caches
            .chapters
            .read_through(&key, || async {
                self.repo
                    .fetch_chapters(&options)
                    .await
                    .map_err(|err| err.into_catalog("chapters", "catalog::get_chapters"))
            })
            .await
    }

    fn key<T: Serialize>(&self, scope: Scope, options: &T) -> Result<CompositeKey, CatalogError> {
        key_for(scope, options).map_err(|err| {
            error!(
                target = SOURCE,
                op = "catalog::key",
                scope = %scope,
                result = "error",
                error = %err,
                "Failed to build cache key"
            );
            CatalogError::Unknown
        })
    }
}

#[async_trait]
impl Rewarm for CatalogReader {
    async fn rewarm(&self, family: CacheFamily, key: &CompositeKey) -> bool {
        self.rewarm_key(family, key).await
    }
}
