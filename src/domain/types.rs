//! Shared catalog enumerations.

use serde::{Deserialize, Serialize};

/// Closed set of lowercase string values accepted by list filters.
pub trait CatalogEnum: Sized + Copy + 'static {
    /// Filter name used in validation messages.
    const FIELD: &'static str;
    const VARIANTS: &'static [Self];

    fn as_str(self) -> &'static str;

    /// Case-insensitive lookup of a variant by its string value.
    fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::VARIANTS
            .iter()
            .copied()
            .find(|variant| variant.as_str() == normalized)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Ongoing,
    Finished,
    Dropped,
}

impl CatalogEnum for ProjectStatus {
    const FIELD: &'static str = "project_status";
    const VARIANTS: &'static [Self] = &[Self::Ongoing, Self::Finished, Self::Dropped];

    fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Ongoing => "ongoing",
            ProjectStatus::Finished => "finished",
            ProjectStatus::Dropped => "dropped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesStatus {
    Ongoing,
    Completed,
    Hiatus,
    Cancelled,
}

impl CatalogEnum for SeriesStatus {
    const FIELD: &'static str = "series_status";
    const VARIANTS: &'static [Self] = &[
        Self::Ongoing,
        Self::Completed,
        Self::Hiatus,
        Self::Cancelled,
    ];

    fn as_str(self) -> &'static str {
        match self {
            SeriesStatus::Ongoing => "ongoing",
            SeriesStatus::Completed => "completed",
            SeriesStatus::Hiatus => "hiatus",
            SeriesStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Demographic {
    None,
    Shounen,
    Shoujo,
    Josei,
    Seinen,
}

impl CatalogEnum for Demographic {
    const FIELD: &'static str = "demographic";
    const VARIANTS: &'static [Self] = &[
        Self::None,
        Self::Shounen,
        Self::Shoujo,
        Self::Josei,
        Self::Seinen,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Demographic::None => "none",
            Demographic::Shounen => "shounen",
            Demographic::Shoujo => "shoujo",
            Demographic::Josei => "josei",
            Demographic::Seinen => "seinen",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    None,
    Safe,
    Suggestive,
    Erotica,
    Pornographic,
}

impl CatalogEnum for Rating {
    const FIELD: &'static str = "rating";
    const VARIANTS: &'static [Self] = &[
        Self::None,
        Self::Safe,
        Self::Suggestive,
        Self::Erotica,
        Self::Pornographic,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Rating::None => "none",
            Rating::Safe => "safe",
            Rating::Suggestive => "suggestive",
            Rating::Erotica => "erotica",
            Rating::Pornographic => "pornographic",
        }
    }
}

/// Kind of image asset stored under a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Cover,
    Page,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Cover => "cover",
            AssetKind::Page => "page",
        }
    }
}
