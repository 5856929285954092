//! Backing-store contract consumed by the catalog services.

use async_trait::async_trait;
use thiserror::Error;
use tracing::error;

use crate::application::options::{
    ChapterListOptions, ChapterOptions, ProjectListOptions, ProjectOptions,
};
use crate::domain::entities::{
    ChapterRecord, CoverRecord, EntityId, Listing, ProjectRecord, StatsOwner, StatsRecord,
};
use crate::domain::error::CatalogError;
use crate::domain::types::{Demographic, ProjectStatus, Rating, SeriesStatus};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("backing store timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Map to the error class readers see.
    ///
    /// Anything other than not-found or bad input is logged here and becomes
    /// an opaque [`CatalogError::Unknown`].
    pub fn into_catalog(self, entity: &'static str, op: &'static str) -> CatalogError {
        match self {
            RepoError::NotFound => CatalogError::not_found(entity),
            RepoError::InvalidInput { message } => CatalogError::validation(message),
            RepoError::Duplicate { constraint } => {
                CatalogError::conflict(format!("{entity} violates `{constraint}`"))
            }
            other => {
                error!(op, entity, result = "error", error = %other, "Backing store failure");
                CatalogError::Unknown
            }
        }
    }
}

/// Editable project fields. `slug` is derived from `title` by the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectDraft {
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub project_status: ProjectStatus,
    pub series_status: SeriesStatus,
    pub demographic: Demographic,
    pub rating: Rating,
    pub authors: Vec<String>,
    pub artists: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChapterDraft {
    pub project_id: EntityId,
    pub chapter: String,
    pub volume: Option<String>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub scanlation_groups: Vec<String>,
    pub locked: bool,
}

/// A write against the backing store.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateProject(ProjectDraft),
    UpdateProject {
        id: EntityId,
        draft: ProjectDraft,
    },
    SetProjectPublished {
        id: EntityId,
        published: bool,
    },
    DeleteProject {
        id: EntityId,
    },
    CreateChapter(ChapterDraft),
    UpdateChapter {
        id: EntityId,
        draft: ChapterDraft,
    },
    SetChapterPublished {
        id: EntityId,
        published: bool,
    },
    DeleteChapter {
        id: EntityId,
    },
    AddCover {
        project_id: EntityId,
        file_name: String,
    },
    SelectCover {
        project_id: EntityId,
        cover_id: EntityId,
    },
    DeleteCover {
        project_id: EntityId,
        cover_id: EntityId,
    },
    SetPages {
        chapter_id: EntityId,
        pages: Vec<String>,
    },
    RecordView {
        owner: StatsOwner,
        unique: bool,
    },
}

/// Post-commit state, with whatever previous values storage needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Committed {
    Project {
        record: ProjectRecord,
        /// Slug before the commit; `None` for a new project.
        previous_slug: Option<String>,
    },
    ProjectDeleted {
        record: ProjectRecord,
        /// Chapters removed with the project.
        chapter_ids: Vec<EntityId>,
    },
    Chapter {
        record: ChapterRecord,
        /// Directory name before the commit; `None` for a new chapter.
        previous_dir_name: Option<String>,
    },
    ChapterDeleted {
        record: ChapterRecord,
    },
    Cover {
        record: CoverRecord,
        /// The project's main cover after the commit.
        selected: Option<String>,
    },
    CoverDeleted {
        record: CoverRecord,
        selected: Option<String>,
    },
    Pages {
        record: ChapterRecord,
    },
    Stats {
        owner: StatsOwner,
        stats: StatsRecord,
    },
}

/// A project together with its chapters, as needed to rebuild the indirection.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectTree {
    pub project: ProjectRecord,
    pub chapters: Vec<ChapterRecord>,
}

#[async_trait]
pub trait CatalogRepo: Send + Sync {
    async fn fetch_project(
        &self,
        id: EntityId,
        options: &ProjectOptions,
    ) -> Result<ProjectRecord, RepoError>;

    async fn fetch_projects(
        &self,
        options: &ProjectListOptions,
    ) -> Result<Listing<ProjectRecord>, RepoError>;

    async fn fetch_chapter(
        &self,
        id: EntityId,
        options: &ChapterOptions,
    ) -> Result<ChapterRecord, RepoError>;

    async fn fetch_chapters(
        &self,
        options: &ChapterListOptions,
    ) -> Result<Listing<ChapterRecord>, RepoError>;

    /// The project's selected cover, if any.
    async fn fetch_cover(&self, project_id: EntityId) -> Result<Option<CoverRecord>, RepoError>;

    async fn fetch_covers(&self, project_id: EntityId) -> Result<Vec<CoverRecord>, RepoError>;

    async fn fetch_pages(&self, chapter_id: EntityId) -> Result<Vec<String>, RepoError>;

    async fn fetch_project_stats(&self, id: EntityId) -> Result<StatsRecord, RepoError>;

    async fn fetch_chapter_stats(&self, id: EntityId) -> Result<StatsRecord, RepoError>;

    /// Every project with its chapters, drafts included.
    async fn fetch_trees(&self) -> Result<Vec<ProjectTree>, RepoError>;

    async fn commit(&self, mutation: Mutation) -> Result<Committed, RepoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_errors_map_to_catalog_classes() {
        assert_eq!(
            RepoError::NotFound.into_catalog("chapter", "test"),
            CatalogError::not_found("chapter")
        );
        assert_eq!(
            RepoError::invalid_input("bad id").into_catalog("chapter", "test"),
            CatalogError::validation("bad id")
        );
        assert_eq!(
            RepoError::Timeout.into_catalog("chapter", "test"),
            CatalogError::Unknown
        );
        assert_eq!(
            RepoError::from_persistence("connection reset").into_catalog("chapter", "test"),
            CatalogError::Unknown
        );
    }
}
