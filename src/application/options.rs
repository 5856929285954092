//! Lookup queries and their canonical options.
//!
//! A query is what a caller asks for; its canonical options are what the
//! cache key is built from and what the backing store receives. Two queries
//! that mean the same thing canonicalize to equal options, and therefore to
//! the same key.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::entities::EntityId;
use crate::domain::error::CatalogError;
use crate::domain::slug::normalize_filter;
use crate::domain::types::{CatalogEnum, Demographic, ProjectStatus, Rating, SeriesStatus};

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

/// Turns a raw query into the options used for keying and loading.
pub trait Canonicalize {
    type Options: Serialize + DeserializeOwned + Clone + Send + Sync;

    fn canonicalize(&self) -> Result<Self::Options, CatalogError>;
}

pub fn canonicalize<Q: Canonicalize>(query: &Q) -> Result<Q::Options, CatalogError> {
    query.canonicalize()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// Ascending only when asked for explicitly.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(order) if order.trim().eq_ignore_ascii_case("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterSort {
    Id,
    UpdatedAt,
    PublishedAt,
    Chapter,
    Volume,
    #[default]
    CreatedAt,
}

impl ChapterSort {
    pub fn parse(value: Option<&str>) -> Self {
        let Some(value) = value.map(str::trim) else {
            return Self::default();
        };
        [
            ("id", Self::Id),
            ("updated_at", Self::UpdatedAt),
            ("published_at", Self::PublishedAt),
            ("chapter", Self::Chapter),
            ("volume", Self::Volume),
        ]
        .into_iter()
        .find(|(name, _)| value.eq_ignore_ascii_case(name))
        .map_or(Self::default(), |(_, sort)| sort)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectSort {
    Id,
    UpdatedAt,
    PublishedAt,
    Title,
    #[default]
    CreatedAt,
}

impl ProjectSort {
    pub fn parse(value: Option<&str>) -> Self {
        let Some(value) = value.map(str::trim) else {
            return Self::default();
        };
        [
            ("id", Self::Id),
            ("updated_at", Self::UpdatedAt),
            ("published_at", Self::PublishedAt),
            ("title", Self::Title),
        ]
        .into_iter()
        .find(|(name, _)| value.eq_ignore_ascii_case(name))
        .map_or(Self::default(), |(_, sort)| sort)
    }
}

// Variants are declared alphabetically so derived ordering sorts them by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterPreload {
    Project,
    ScanlationGroups,
    Statistic,
    Uploader,
}

impl ChapterPreload {
    fn parse(value: &str, allow_statistic: bool) -> Option<Self> {
        let value = value.trim();
        let preload = [
            ("project", Self::Project),
            ("scanlation_groups", Self::ScanlationGroups),
            ("statistic", Self::Statistic),
            ("uploader", Self::Uploader),
        ]
        .into_iter()
        .find(|(name, _)| value.eq_ignore_ascii_case(name))
        .map(|(_, preload)| preload)?;

        (allow_statistic || preload != Self::Statistic).then_some(preload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPreload {
    Artists,
    Authors,
    Cover,
    Statistic,
    Tags,
}

impl ProjectPreload {
    fn parse(value: &str, allow_statistic: bool) -> Option<Self> {
        let value = value.trim();
        let preload = [
            ("artists", Self::Artists),
            ("authors", Self::Authors),
            ("cover", Self::Cover),
            ("statistic", Self::Statistic),
            ("tags", Self::Tags),
        ]
        .into_iter()
        .find(|(name, _)| value.eq_ignore_ascii_case(name))
        .map(|(_, preload)| preload)?;

        (allow_statistic || preload != Self::Statistic).then_some(preload)
    }
}

/// Single chapter lookup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChapterQuery {
    pub preloads: Vec<String>,
    pub include_drafts: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterOptions {
    pub preloads: Vec<ChapterPreload>,
    pub include_drafts: bool,
}

impl Canonicalize for ChapterQuery {
    type Options = ChapterOptions;

    fn canonicalize(&self) -> Result<ChapterOptions, CatalogError> {
        Ok(ChapterOptions {
            preloads: sorted_unique(
                self.preloads
                    .iter()
                    .filter_map(|p| ChapterPreload::parse(p, true)),
            ),
            include_drafts: self.include_drafts,
        })
    }
}

/// Chapter listing, optionally restricted to one project.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChapterListQuery {
    pub project_id: Option<EntityId>,
    pub uploader: Option<String>,
    pub scanlation_groups: Vec<String>,
    pub limit: i64,
    pub offset: i64,
    pub preloads: Vec<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub include_drafts: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterListOptions {
    pub project_id: Option<EntityId>,
    pub uploader: Option<String>,
    pub scanlation_groups: Vec<String>,
    pub limit: u32,
    pub offset: u64,
    pub preloads: Vec<ChapterPreload>,
    pub sort: ChapterSort,
    pub order: SortOrder,
    pub include_drafts: bool,
}

impl Canonicalize for ChapterListQuery {
    type Options = ChapterListOptions;

    fn canonicalize(&self) -> Result<ChapterListOptions, CatalogError> {
        Ok(ChapterListOptions {
            project_id: self.project_id.filter(|id| *id > 0),
            uploader: self
                .uploader
                .as_deref()
                .map(|u| u.trim().to_lowercase())
                .filter(|u| !u.is_empty()),
            scanlation_groups: slugs(&self.scanlation_groups),
            limit: clamp_limit(self.limit),
            offset: clamp_offset(self.offset),
            preloads: sorted_unique(
                self.preloads
                    .iter()
                    .filter_map(|p| ChapterPreload::parse(p, false)),
            ),
            sort: ChapterSort::parse(self.sort.as_deref()),
            order: SortOrder::parse(self.order.as_deref()),
            include_drafts: self.include_drafts,
        })
    }
}

/// Single project lookup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectQuery {
    pub preloads: Vec<String>,
    pub include_drafts: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectOptions {
    pub preloads: Vec<ProjectPreload>,
    pub include_drafts: bool,
}

impl Canonicalize for ProjectQuery {
    type Options = ProjectOptions;

    fn canonicalize(&self) -> Result<ProjectOptions, CatalogError> {
        Ok(ProjectOptions {
            preloads: sorted_unique(
                self.preloads
                    .iter()
                    .filter_map(|p| ProjectPreload::parse(p, true)),
            ),
            include_drafts: self.include_drafts,
        })
    }
}

/// Project listing with include/exclude filters per status dimension.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectListQuery {
    pub title: Option<String>,
    pub project_status: Vec<String>,
    pub series_status: Vec<String>,
    pub demographic: Vec<String>,
    pub rating: Vec<String>,
    pub exclude_project_status: Vec<String>,
    pub exclude_series_status: Vec<String>,
    pub exclude_demographic: Vec<String>,
    pub exclude_rating: Vec<String>,
    pub artists: Vec<String>,
    pub authors: Vec<String>,
    pub tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    pub limit: i64,
    pub offset: i64,
    pub preloads: Vec<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub include_drafts: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectListOptions {
    pub title: Option<String>,
    pub project_status: Vec<ProjectStatus>,
    pub series_status: Vec<SeriesStatus>,
    pub demographic: Vec<Demographic>,
    pub rating: Vec<Rating>,
    pub exclude_project_status: Vec<ProjectStatus>,
    pub exclude_series_status: Vec<SeriesStatus>,
    pub exclude_demographic: Vec<Demographic>,
    pub exclude_rating: Vec<Rating>,
    /// Artists are folded in here; both are credited creators.
    pub authors: Vec<String>,
    pub tags: Vec<String>,
    pub exclude_tags: Vec<String>,
    pub limit: u32,
    pub offset: u64,
    pub preloads: Vec<ProjectPreload>,
    pub sort: ProjectSort,
    pub order: SortOrder,
    pub include_drafts: bool,
}

impl Canonicalize for ProjectListQuery {
    type Options = ProjectListOptions;

    fn canonicalize(&self) -> Result<ProjectListOptions, CatalogError> {
        let creators: Vec<String> = self
            .authors
            .iter()
            .chain(self.artists.iter())
            .cloned()
            .collect();

        Ok(ProjectListOptions {
            title: self
                .title
                .as_deref()
                .map(normalize_filter)
                .filter(|t| !t.is_empty()),
            project_status: statuses(&self.project_status)?,
            series_status: statuses(&self.series_status)?,
            demographic: statuses(&self.demographic)?,
            rating: statuses(&self.rating)?,
            exclude_project_status: statuses(&self.exclude_project_status)?,
            exclude_series_status: statuses(&self.exclude_series_status)?,
            exclude_demographic: statuses(&self.exclude_demographic)?,
            exclude_rating: statuses(&self.exclude_rating)?,
            authors: slugs(&creators),
            tags: slugs(&self.tags),
            exclude_tags: slugs(&self.exclude_tags),
            limit: clamp_limit(self.limit),
            offset: clamp_offset(self.offset),
            preloads: sorted_unique(
                self.preloads
                    .iter()
                    .filter_map(|p| ProjectPreload::parse(p, false)),
            ),
            sort: ProjectSort::parse(self.sort.as_deref()),
            order: SortOrder::parse(self.order.as_deref()),
            include_drafts: self.include_drafts,
        })
    }
}

fn clamp_limit(limit: i64) -> u32 {
    if limit <= 0 {
        return DEFAULT_LIMIT;
    }
    u32::try_from(limit.min(i64::from(MAX_LIMIT))).unwrap_or(MAX_LIMIT)
}

fn clamp_offset(offset: i64) -> u64 {
    u64::try_from(offset).unwrap_or(0)
}

fn sorted_unique<T: Ord>(values: impl Iterator<Item = T>) -> Vec<T> {
    let mut values: Vec<T> = values.collect();
    values.sort();
    values.dedup();
    values
}

fn slugs(values: &[String]) -> Vec<String> {
    sorted_unique(
        values
            .iter()
            .map(|v| normalize_filter(v))
            .filter(|v| !v.is_empty()),
    )
}

fn statuses<T: CatalogEnum>(values: &[String]) -> Result<Vec<T>, CatalogError> {
    let mut parsed = values
        .iter()
        .map(|value| {
            T::parse(value).ok_or_else(|| {
                CatalogError::validation(format!(
                    "invalid {} `{}`; expected one of {}",
                    T::FIELD,
                    value.trim(),
                    T::VARIANTS
                        .iter()
                        .map(|v| v.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
        })
        .collect::<Result<Vec<T>, _>>()?;
    parsed.sort_by_key(|v| v.as_str());
    parsed.dedup_by_key(|v| v.as_str());
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Scope, key_for};

    #[test]
    fn sort_and_order_are_case_insensitive() {
        let lower = ChapterListQuery {
            sort: Some("chapter".into()),
            order: Some("asc".into()),
            ..Default::default()
        };
        let upper = ChapterListQuery {
            sort: Some("CHAPTER".into()),
            order: Some("ASC".into()),
            ..Default::default()
        };

        let a = key_for(Scope::Global, &canonicalize(&lower).expect("canonical")).expect("key");
        let b = key_for(Scope::Global, &canonicalize(&upper).expect("canonical")).expect("key");

        assert_eq!(a, b);
        assert_eq!(
            canonicalize(&upper).expect("canonical").sort,
            ChapterSort::Chapter
        );
        assert_eq!(canonicalize(&upper).expect("canonical").order, SortOrder::Asc);
    }

    #[test]
    fn unknown_sort_and_order_fall_back() {
        let options = canonicalize(&ProjectListQuery {
            sort: Some("popularity".into()),
            order: Some("ascending".into()),
            ..Default::default()
        })
        .expect("canonical");

        assert_eq!(options.sort, ProjectSort::CreatedAt);
        assert_eq!(options.order, SortOrder::Desc);
    }

    #[test]
    fn pagination_is_clamped() {
        let cases = [(0, 20), (-5, 20), (1, 1), (100, 100), (250, 100)];
        for (input, expected) in cases {
            assert_eq!(clamp_limit(input), expected, "limit {input}");
        }
        assert_eq!(clamp_offset(-1), 0);
        assert_eq!(clamp_offset(40), 40);
    }

    #[test]
    fn slice_filters_are_slugged_sorted_and_deduped() {
        let options = canonicalize(&ChapterListQuery {
            uploader: Some("  Alice ".into()),
            scanlation_groups: vec![
                "Moon Scans".into(),
                "alpha team".into(),
                "moon-scans".into(),
            ],
            ..Default::default()
        })
        .expect("canonical");

        assert_eq!(options.uploader.as_deref(), Some("alice"));
        assert_eq!(options.scanlation_groups, vec!["alpha-team", "moon-scans"]);
    }

    #[test]
    fn artists_merge_into_authors() {
        let options = canonicalize(&ProjectListQuery {
            authors: vec!["Oda Eiichiro".into()],
            artists: vec!["oda eiichiro".into(), "Murata".into()],
            ..Default::default()
        })
        .expect("canonical");

        assert_eq!(options.authors, vec!["murata", "oda-eiichiro"]);
    }

    #[test]
    fn statuses_are_validated_and_sorted() {
        let options = canonicalize(&ProjectListQuery {
            series_status: vec!["Hiatus".into(), "completed".into(), "HIATUS".into()],
            ..Default::default()
        })
        .expect("canonical");
        assert_eq!(
            options.series_status,
            vec![SeriesStatus::Completed, SeriesStatus::Hiatus]
        );

        let err = canonicalize(&ProjectListQuery {
            rating: vec!["spicy".into()],
            ..Default::default()
        })
        .expect_err("invalid rating");
        assert!(matches!(err, CatalogError::Validation { .. }));
    }

    #[test]
    fn statistic_preload_only_on_details() {
        let detail = canonicalize(&ChapterQuery {
            preloads: vec!["Statistic".into(), "uploader".into(), "bogus".into()],
            ..Default::default()
        })
        .expect("canonical");
        assert_eq!(
            detail.preloads,
            vec![ChapterPreload::Statistic, ChapterPreload::Uploader]
        );

        let list = canonicalize(&ProjectListQuery {
            preloads: vec!["statistic".into(), "tags".into(), "cover".into()],
            ..Default::default()
        })
        .expect("canonical");
        assert_eq!(list.preloads, vec![ProjectPreload::Cover, ProjectPreload::Tags]);
    }

    #[test]
    fn options_decode_back_from_key() {
        let options = canonicalize(&ChapterListQuery {
            project_id: Some(3),
            limit: 50,
            ..Default::default()
        })
        .expect("canonical");
        let key = key_for(Scope::Project(3), &options).expect("key");

        assert_eq!(key.decode::<ChapterListOptions>().expect("decode"), options);
    }
}
