//! Resolves stored images, generating resized copies on demand.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, warn};

use crate::domain::entities::EntityId;
use crate::domain::error::CatalogError;
use crate::domain::types::AssetKind;
use crate::infra::resize::ResizeGuard;
use crate::infra::storage::{StorageLayout, derived_file_name};
use crate::infra::transcoder::ResizeOptions;

const SOURCE: &str = "application::assets";
const MAX_WIDTH: u32 = 1024;
const WIDTH_STEP: u32 = 64;

/// Path to serve for an asset request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAsset {
    pub path: PathBuf,
    /// `false` when the original is served.
    pub derived: bool,
}

pub struct AssetService {
    storage: Arc<StorageLayout>,
    guard: Arc<ResizeGuard>,
}

impl AssetService {
    pub fn new(storage: Arc<StorageLayout>, guard: Arc<ResizeGuard>) -> Self {
        Self { storage, guard }
    }

    /// Resolve a cover (by project id) or page (by chapter id).
    ///
    /// Widths outside `64..=1024` in steps of 64 serve the original. A
    /// failed resize is logged and also serves the original.
    pub async fn derived_asset(
        &self,
        kind: AssetKind,
        id: EntityId,
        file_name: &str,
        width: u32,
    ) -> Result<DerivedAsset, CatalogError> {
        let original = match kind {
            AssetKind::Cover => self.storage.cover_path(id, file_name).await,
            AssetKind::Page => self.storage.page_path(id, file_name).await,
        }
        .map_err(|err| err.into_catalog("assets::derived_asset"))?;

        let exists = fs::try_exists(&original).await.unwrap_or(false);
        if !exists {
            return Err(CatalogError::not_found(kind.as_str()));
        }

        let Some(options) = resize_options(kind, width) else {
            return Ok(DerivedAsset {
                path: original,
                derived: false,
            });
        };

        let output = original.with_file_name(derived_file_name(file_name, width));
        match self.guard.resize(&original, &output, options).await {
            Ok(outcome) => {
                debug!(
                    target = SOURCE,
                    op = "assets::derived_asset",
                    result = outcome.as_str(),
                    kind = kind.as_str(),
                    id,
                    width,
                    "Derived asset ready"
                );
                Ok(DerivedAsset {
                    path: output,
                    derived: true,
                })
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "assets::derived_asset",
                    result = "fallback",
                    kind = kind.as_str(),
                    id,
                    width,
                    error = %err,
                    "Resize failed, serving original"
                );
                Ok(DerivedAsset {
                    path: original,
                    derived: false,
                })
            }
        }
    }
}

/// Options for a supported width; `None` means serve the original.
fn resize_options(kind: AssetKind, width: u32) -> Option<ResizeOptions> {
    if width == 0 || width > MAX_WIDTH || width % WIDTH_STEP != 0 {
        return None;
    }
    Some(match kind {
        AssetKind::Cover => ResizeOptions {
            width,
            height: width * 3 / 2,
            crop: true,
        },
        AssetKind::Page => ResizeOptions::width(width),
    })
}
