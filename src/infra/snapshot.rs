//! TOML catalog snapshots used to seed the in-memory store.
//!
//! ```toml
//! [[projects]]
//! id = 1
//! slug = "foo-bar"
//! title = "Foo Bar"
//! project_status = "ongoing"
//! series_status = "ongoing"
//! demographic = "none"
//! rating = "safe"
//!
//! [[chapters]]
//! id = 10
//! project_id = 1
//! chapter = "1"
//! pages = ["1-3b5d.png"]
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::domain::entities::{ChapterRecord, CoverRecord, ProjectRecord};
use crate::infra::error::InfraError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogSnapshot {
    pub projects: Vec<ProjectRecord>,
    pub chapters: Vec<ChapterRecord>,
    pub covers: Vec<CoverRecord>,
}

impl CatalogSnapshot {
    pub fn parse(source: &str) -> Result<Self, InfraError> {
        toml::from_str(source).map_err(|err| InfraError::snapshot(err.to_string()))
    }

    pub async fn load(path: &Path) -> Result<Self, InfraError> {
        let source = tokio::fs::read_to_string(path).await?;
        Self::parse(&source)
            .map_err(|err| InfraError::snapshot(format!("{}: {err}", path.display())))
    }
}
