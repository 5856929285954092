//! Catalog records as returned by the backing store.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::slug::{SlugError, chapter_dir_name, chapter_display_name};
use crate::domain::types::{Demographic, ProjectStatus, Rating, SeriesStatus};

/// Stable numeric identifier assigned by the backing store.
pub type EntityId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: EntityId,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub project_status: ProjectStatus,
    pub series_status: SeriesStatus,
    pub demographic: Demographic,
    pub rating: Rating,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// File name of the selected cover under `covers/`.
    #[serde(default)]
    pub cover_file: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339", default = "OffsetDateTime::now_utc")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339", default = "OffsetDateTime::now_utc")]
    pub updated_at: OffsetDateTime,
}

impl ProjectRecord {
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub id: EntityId,
    pub project_id: EntityId,
    pub chapter: String,
    #[serde(default)]
    pub volume: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub scanlation_groups: Vec<String>,
    /// Stored page file names, ordered by page number.
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339", default = "OffsetDateTime::now_utc")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339", default = "OffsetDateTime::now_utc")]
    pub updated_at: OffsetDateTime,
}

impl ChapterRecord {
    pub fn display_name(&self) -> String {
        chapter_display_name(
            self.volume.as_deref(),
            &self.chapter,
            self.title.as_deref(),
        )
    }

    pub fn dir_name(&self) -> Result<String, SlugError> {
        chapter_dir_name(
            self.volume.as_deref(),
            &self.chapter,
            self.title.as_deref(),
        )
    }

    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverRecord {
    pub id: EntityId,
    pub project_id: EntityId,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRecord {
    pub view_count: i64,
    pub unique_view_count: i64,
}

/// Owner of a statistics row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatsOwner {
    Project(EntityId),
    Chapter(EntityId),
}

/// One page of a listing together with the unpaged total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Listing<T> {
    pub fn new(items: Vec<T>, total: u64) -> Self {
        Self { items, total }
    }
}

impl<T> Default for Listing<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}
