//! Storage indirection for catalog assets.
//!
//! Project and chapter directories are named after human-readable slugs so
//! the tree stays browsable, while every lookup goes through a symbolic link
//! named by the stable numeric id:
//!
//! ```text
//! <root>/<slug>/{covers,chapters}/
//! <symlinks>/<project_id>          -> <root>/<slug>
//! <symlinks>/chapters/<chapter_id> -> <root>/<slug>/chapters/<name>
//! ```
//!
//! Renames move the directory and then swap the link with `rename(2)`, so a
//! link is never missing or dangling from a reader's point of view.

use std::collections::HashSet;
use std::io::{self, ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::entities::{ChapterRecord, EntityId, ProjectRecord};
use crate::domain::error::CatalogError;
use crate::domain::slug::{
    SlugAsyncError, SlugError, candidates, first_free_name, page_number, stacked_candidates,
};

const SOURCE: &str = "infra::storage";
const CHAPTERS_DIR: &str = "chapters";
const COVERS_DIR: &str = "covers";
const DEFAULT_SYMLINKS_DIR: &str = "symlinks";
const DERIVED_EXTENSION: &str = "jpg";

/// Slugs that would shadow storage internals.
pub const RESERVED_SLUGS: [&str; 2] = ["symlinks", "tmp"];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{kind} `{id}` has no storage link")]
    NotFound { kind: &'static str, id: EntityId },
    #[error("storage path `{}` is already taken", path.display())]
    Conflict { path: PathBuf },
    #[error(transparent)]
    Slug(#[from] SlugError),
    #[error("invalid storage path")]
    InvalidPath,
    #[error("slug `{slug}` is reserved")]
    Reserved { slug: String },
}

impl From<SlugAsyncError<io::Error>> for StorageError {
    fn from(err: SlugAsyncError<io::Error>) -> Self {
        match err {
            SlugAsyncError::Slug(err) => Self::Slug(err),
            SlugAsyncError::Predicate(err) => Self::Io(err),
        }
    }
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Map to the error class callers see; filesystem failures are logged here.
    pub fn into_catalog(self, op: &'static str) -> CatalogError {
        match self {
            Self::NotFound { kind, .. } => CatalogError::not_found(kind),
            Self::Conflict { path } => {
                CatalogError::conflict(format!("`{}` already exists", path.display()))
            }
            Self::Slug(err) => CatalogError::validation(err.to_string()),
            Self::InvalidPath => CatalogError::validation("invalid storage path"),
            Self::Reserved { slug } => CatalogError::validation(format!("slug `{slug}` is reserved")),
            Self::Io(err) => {
                error!(
                    target = SOURCE,
                    op,
                    result = "error",
                    error = %err,
                    "Storage operation failed"
                );
                CatalogError::Unknown
            }
        }
    }
}

/// Result of a rename request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    /// The derived path already matched the current target.
    Unchanged(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

impl RenameOutcome {
    /// Physical path after the call.
    pub fn path(&self) -> &Path {
        match self {
            Self::Unchanged(path) => path,
            Self::Renamed { to, .. } => to,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterLayout {
    pub id: EntityId,
    /// `None` when no directory name can be derived for the chapter.
    pub dir_name: Option<String>,
    pub pages: Vec<String>,
}

/// What remap needs to know about one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub id: EntityId,
    pub slug: String,
    pub chapters: Vec<ChapterLayout>,
}

impl ProjectLayout {
    pub fn from_records(project: &ProjectRecord, chapters: &[ChapterRecord]) -> Self {
        Self {
            id: project.id,
            slug: project.slug.clone(),
            chapters: chapters
                .iter()
                .map(|chapter| ChapterLayout {
                    id: chapter.id,
                    dir_name: chapter.dir_name().ok(),
                    pages: chapter.pages.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemapReport {
    pub projects_linked: usize,
    pub chapters_linked: usize,
    pub chapters_missing: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapOutcome {
    Completed(RemapReport),
    /// Another remap held the guard; nothing was touched.
    AlreadyRunning,
}

/// Filesystem layout rooted at `root` with id links under `symlinks`.
#[derive(Debug)]
pub struct StorageLayout {
    root: PathBuf,
    symlinks: PathBuf,
    remapping: AtomicBool,
}

impl StorageLayout {
    /// Initialise the layout, creating the root and link directories.
    ///
    /// `symlinks` defaults to `<root>/symlinks`. Both paths are made absolute
    /// so link targets do not depend on the working directory.
    pub fn new(root: impl Into<PathBuf>, symlinks: Option<PathBuf>) -> Result<Self, StorageError> {
        let root = std::path::absolute(root.into())?;
        let symlinks = match symlinks {
            Some(dir) => std::path::absolute(dir)?,
            None => root.join(DEFAULT_SYMLINKS_DIR),
        };
        if symlinks == root || root.starts_with(&symlinks) {
            return Err(StorageError::InvalidPath);
        }

        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(symlinks.join(CHAPTERS_DIR))?;

        Ok(Self {
            root,
            symlinks,
            remapping: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn symlinks_dir(&self) -> &Path {
        &self.symlinks
    }

    pub fn project_link(&self, id: EntityId) -> PathBuf {
        self.symlinks.join(id.to_string())
    }

    pub fn chapter_link(&self, id: EntityId) -> PathBuf {
        self.symlinks.join(CHAPTERS_DIR).join(id.to_string())
    }

    pub async fn resolve_project(&self, id: EntityId) -> Result<PathBuf, StorageError> {
        read_link(&self.project_link(id), "project", id).await
    }

    pub async fn resolve_chapter(&self, id: EntityId) -> Result<PathBuf, StorageError> {
        read_link(&self.chapter_link(id), "chapter", id).await
    }

    /// Create `<root>/<slug>/{chapters,covers}` and link it as `id`.
    pub async fn create_project_dir(
        &self,
        id: EntityId,
        slug: &str,
    ) -> Result<PathBuf, StorageError> {
        check_slug(slug)?;
        let link = self.project_link(id);
        if link_exists(&link).await? {
            return Err(StorageError::Conflict { path: link });
        }

        let dir = self.root.join(slug);
        if fs::try_exists(&dir).await? {
            return Err(StorageError::Conflict { path: dir });
        }

        fs::create_dir_all(dir.join(CHAPTERS_DIR)).await?;
        fs::create_dir_all(dir.join(COVERS_DIR)).await?;
        point(&link, &dir).await?;

        info!(
            target = SOURCE,
            op = "storage::create_project_dir",
            result = "ok",
            project_id = id,
            path = %dir.display(),
            "Project directory created"
        );
        Ok(dir)
    }

    /// Create the chapter directory inside its project and link it.
    ///
    /// A name already taken by another chapter gets the next free `_-_N`
    /// suffix.
    pub async fn create_chapter_dir(&self, chapter: &ChapterRecord) -> Result<PathBuf, StorageError> {
        let link = self.chapter_link(chapter.id);
        if link_exists(&link).await? {
            return Err(StorageError::Conflict { path: link });
        }

        let chapters = self.resolve_project(chapter.project_id).await?.join(CHAPTERS_DIR);
        fs::create_dir_all(&chapters).await?;

        let base = chapter.dir_name()?;
        let name = first_free_name(&base, |candidate| {
            let path = chapters.join(candidate);
            async move { Ok::<_, io::Error>(!fs::try_exists(&path).await?) }
        })
        .await?;

        let dir = chapters.join(name);
        fs::create_dir(&dir).await.map_err(|err| match err.kind() {
            ErrorKind::AlreadyExists => StorageError::Conflict { path: dir.clone() },
            _ => StorageError::Io(err),
        })?;
        point(&link, &dir).await?;

        info!(
            target = SOURCE,
            op = "storage::create_chapter_dir",
            result = "ok",
            chapter_id = chapter.id,
            project_id = chapter.project_id,
            path = %dir.display(),
            "Chapter directory created"
        );
        Ok(dir)
    }

    /// Move the project directory to `<root>/<new_slug>` and re-point its links.
    ///
    /// Chapter links that lie under the old directory are re-pointed too. A
    /// failure to re-point the project link rolls the directory back.
    pub async fn rename_project_dir(
        &self,
        id: EntityId,
        new_slug: &str,
    ) -> Result<RenameOutcome, StorageError> {
        let started_at = Instant::now();
        check_slug(new_slug)?;
        let current = self.resolve_project(id).await?;
        let target = self.root.join(new_slug);
        if current == target {
            return Ok(RenameOutcome::Unchanged(current));
        }
        if fs::try_exists(&target).await? {
            return Err(StorageError::Conflict { path: target });
        }

        fs::rename(&current, &target).await?;
        if let Err(err) = point(&self.project_link(id), &target).await {
            rollback(&target, &current, "storage::rename_project_dir").await;
            return Err(err.into());
        }
        let relinked = self.relink_chapters(&current, &target).await?;

        info!(
            target = SOURCE,
            op = "storage::rename_project_dir",
            result = "ok",
            project_id = id,
            from = %current.display(),
            to = %target.display(),
            relinked_chapters = relinked,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Project directory renamed"
        );
        Ok(RenameOutcome::Renamed {
            from: current,
            to: target,
        })
    }

    /// Move the chapter directory to match its current display name.
    pub async fn rename_chapter_dir(
        &self,
        chapter: &ChapterRecord,
    ) -> Result<RenameOutcome, StorageError> {
        let current = self.resolve_chapter(chapter.id).await?;
        let chapters = self.resolve_project(chapter.project_id).await?.join(CHAPTERS_DIR);
        let base = chapter.dir_name()?;

        // The chapter's own directory counts as free, so a disambiguated name
        // that still fits is kept.
        let name = first_free_name(&base, |candidate| {
            let path = chapters.join(candidate);
            let own = path == current;
            async move { Ok::<_, io::Error>(own || !fs::try_exists(&path).await?) }
        })
        .await?;

        let target = chapters.join(name);
        if target == current {
            return Ok(RenameOutcome::Unchanged(current));
        }

        fs::rename(&current, &target).await?;
        if let Err(err) = point(&self.chapter_link(chapter.id), &target).await {
            rollback(&target, &current, "storage::rename_chapter_dir").await;
            return Err(err.into());
        }

        info!(
            target = SOURCE,
            op = "storage::rename_chapter_dir",
            result = "ok",
            chapter_id = chapter.id,
            from = %current.display(),
            to = %target.display(),
            "Chapter directory renamed"
        );
        Ok(RenameOutcome::Renamed {
            from: current,
            to: target,
        })
    }

    /// Remove the project's chapter links, its own link, then the tree.
    pub async fn remove_project_dir(&self, id: EntityId) -> Result<PathBuf, StorageError> {
        let dir = self.resolve_project(id).await?;

        let mut entries = fs::read_dir(self.symlinks.join(CHAPTERS_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(target) = fs::read_link(entry.path()).await else {
                continue;
            };
            if target.starts_with(&dir) {
                remove_if_present(&entry.path()).await?;
            }
        }

        remove_if_present(&self.project_link(id)).await?;
        remove_tree(&dir).await?;

        info!(
            target = SOURCE,
            op = "storage::remove_project_dir",
            result = "ok",
            project_id = id,
            path = %dir.display(),
            "Project directory removed"
        );
        Ok(dir)
    }

    pub async fn remove_chapter_dir(&self, id: EntityId) -> Result<PathBuf, StorageError> {
        let dir = self.resolve_chapter(id).await?;
        remove_if_present(&self.chapter_link(id)).await?;
        remove_tree(&dir).await?;
        Ok(dir)
    }

    /// Rebuild every link from the catalog.
    ///
    /// The link directory is discarded and recreated. Each chapter is linked
    /// to the first candidate directory holding one of its page files. Only
    /// one remap runs at a time; an overlapping call returns
    /// [`RemapOutcome::AlreadyRunning`].
    pub async fn remap(&self, projects: &[ProjectLayout]) -> Result<RemapOutcome, StorageError> {
        if self
            .remapping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(
                target = SOURCE,
                op = "storage::remap",
                result = "skipped",
                "Remap already running"
            );
            return Ok(RemapOutcome::AlreadyRunning);
        }
        let _guard = RemapGuard(&self.remapping);
        let started_at = Instant::now();

        remove_tree(&self.symlinks).await?;
        fs::create_dir_all(self.symlinks.join(CHAPTERS_DIR)).await?;

        let mut report = RemapReport::default();
        for project in projects {
            let dir = self.root.join(&project.slug);
            if check_slug(&project.slug).is_err() || !fs::try_exists(&dir).await? {
                warn!(
                    target = SOURCE,
                    op = "storage::remap",
                    result = "missing",
                    project_id = project.id,
                    slug = %project.slug,
                    "Project directory not found"
                );
                report.chapters_missing += project.chapters.len();
                continue;
            }
            point(&self.project_link(project.id), &dir).await?;
            report.projects_linked += 1;

            let chapters = dir.join(CHAPTERS_DIR);
            for chapter in &project.chapters {
                match find_chapter_dir(&chapters, chapter).await? {
                    Some(found) => {
                        point(&self.chapter_link(chapter.id), &found).await?;
                        report.chapters_linked += 1;
                    }
                    None => {
                        warn!(
                            target = SOURCE,
                            op = "storage::remap",
                            result = "missing",
                            chapter_id = chapter.id,
                            project_id = project.id,
                            "Chapter directory not found"
                        );
                        report.chapters_missing += 1;
                    }
                }
            }
        }

        info!(
            target = SOURCE,
            op = "storage::remap",
            result = "ok",
            projects_linked = report.projects_linked,
            chapters_linked = report.chapters_linked,
            chapters_missing = report.chapters_missing,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Storage links remapped"
        );
        Ok(RemapOutcome::Completed(report))
    }

    /// Store a cover as `<sha256><ext>`; an identical cover is reused.
    pub async fn store_cover(
        &self,
        project_id: EntityId,
        file_name: &str,
        data: Bytes,
    ) -> Result<String, StorageError> {
        let dir = self.resolve_project(project_id).await?.join(COVERS_DIR);
        fs::create_dir_all(&dir).await?;
        let name = format!("{}{}", checksum(&data), extension(file_name)?);
        write_atomic(dir.join(&name), data).await?;
        Ok(name)
    }

    /// Store a page as `<n>-<sha256><ext>`.
    ///
    /// `n` comes from the uploaded file name; without one the page is
    /// appended after `existing_count`.
    pub async fn store_page(
        &self,
        chapter_id: EntityId,
        file_name: &str,
        data: Bytes,
        existing_count: usize,
    ) -> Result<String, StorageError> {
        let dir = self.resolve_chapter(chapter_id).await?;
        let number = page_number(file_name)
            .map(|n| n as usize)
            .unwrap_or(existing_count + 1);
        let name = format!("{number}-{}{}", checksum(&data), extension(file_name)?);
        write_atomic(dir.join(&name), data).await?;
        Ok(name)
    }

    pub async fn cover_path(
        &self,
        project_id: EntityId,
        file_name: &str,
    ) -> Result<PathBuf, StorageError> {
        check_file_name(file_name)?;
        Ok(self
            .resolve_project(project_id)
            .await?
            .join(COVERS_DIR)
            .join(file_name))
    }

    pub async fn page_path(&self, chapter_id: EntityId, file_name: &str) -> Result<PathBuf, StorageError> {
        check_file_name(file_name)?;
        Ok(self.resolve_chapter(chapter_id).await?.join(file_name))
    }

    /// Delete a cover and every resized copy of it. Returns the count removed.
    pub async fn remove_cover_files(
        &self,
        project_id: EntityId,
        file_name: &str,
    ) -> Result<usize, StorageError> {
        check_file_name(file_name)?;
        let dir = self.resolve_project(project_id).await?.join(COVERS_DIR);
        remove_asset_files(&dir, file_name).await
    }

    pub async fn remove_page_files(
        &self,
        chapter_id: EntityId,
        file_name: &str,
    ) -> Result<usize, StorageError> {
        check_file_name(file_name)?;
        let dir = self.resolve_chapter(chapter_id).await?;
        remove_asset_files(&dir, file_name).await
    }

    async fn relink_chapters(&self, from: &Path, to: &Path) -> Result<usize, StorageError> {
        let mut relinked = 0;
        let mut entries = fs::read_dir(self.symlinks.join(CHAPTERS_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(target) = fs::read_link(entry.path()).await else {
                continue;
            };
            let Ok(rest) = target.strip_prefix(from) else {
                continue;
            };
            match point(&entry.path(), &to.join(rest)).await {
                Ok(()) => relinked += 1,
                Err(err) => warn!(
                    target = SOURCE,
                    op = "storage::relink_chapters",
                    result = "error",
                    link = %entry.path().display(),
                    error = %err,
                    "Failed to re-point chapter link"
                ),
            }
        }
        Ok(relinked)
    }
}

/// Derived file name for a resized copy: `<original>.<width>.jpg`.
pub fn derived_file_name(file_name: &str, width: u32) -> String {
    format!("{file_name}.{width}.{DERIVED_EXTENSION}")
}

struct RemapGuard<'a>(&'a AtomicBool);

impl Drop for RemapGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn read_link(link: &Path, kind: &'static str, id: EntityId) -> Result<PathBuf, StorageError> {
    match fs::read_link(link).await {
        Ok(target) => Ok(target),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(StorageError::NotFound { kind, id }),
        Err(err) => Err(StorageError::Io(err)),
    }
}

async fn link_exists(link: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(link).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Point `link` at `target`, replacing any existing link in one step.
async fn point(link: &Path, target: &Path) -> io::Result<()> {
    let name = link
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "link has no file name"))?;
    let staging = link.with_file_name(format!(".{name}.{}", Uuid::new_v4().simple()));

    fs::symlink(target, &staging).await?;
    if let Err(err) = fs::rename(&staging, link).await {
        let _ = fs::remove_file(&staging).await;
        return Err(err);
    }
    Ok(())
}

async fn rollback(moved: &Path, original: &Path, op: &'static str) {
    if let Err(err) = fs::rename(moved, original).await {
        error!(
            target = SOURCE,
            op,
            result = "error",
            error_code = "rollback_failed",
            from = %moved.display(),
            to = %original.display(),
            error = %err,
            "Failed to roll back directory rename"
        );
    }
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

async fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

async fn find_chapter_dir(
    chapters: &Path,
    chapter: &ChapterLayout,
) -> Result<Option<PathBuf>, StorageError> {
    let Some(base) = chapter.dir_name.as_deref() else {
        return Ok(None);
    };
    let pages: HashSet<&str> = chapter.pages.iter().map(String::as_str).collect();

    if let Some(dir) = first_holding(chapters, candidates(base), &pages).await? {
        return Ok(Some(dir));
    }
    // The first two stacked names are also flat ones.
    first_holding(chapters, stacked_candidates(base).skip(2), &pages).await
}

/// Walk `names` until one is missing; return the first directory holding a page.
async fn first_holding(
    chapters: &Path,
    names: impl Iterator<Item = String> + Send,
    pages: &HashSet<&str>,
) -> Result<Option<PathBuf>, StorageError> {
    for name in names {
        let dir = chapters.join(name);
        if !fs::try_exists(&dir).await? {
            break;
        }
        if holds_any(&dir, pages).await? {
            return Ok(Some(dir));
        }
    }
    Ok(None)
}

async fn holds_any(dir: &Path, names: &HashSet<&str>) -> io::Result<bool> {
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry
            .file_name()
            .to_str()
            .is_some_and(|name| names.contains(name))
        {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn remove_asset_files(dir: &Path, file_name: &str) -> Result<usize, StorageError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name == file_name || is_derived_from(name, file_name) {
            remove_if_present(&entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn is_derived_from(name: &str, original: &str) -> bool {
    name.strip_prefix(original)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(DERIVED_EXTENSION))
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|width| !width.is_empty() && width.bytes().all(|b| b.is_ascii_digit()))
}

async fn write_atomic(path: PathBuf, data: Bytes) -> io::Result<()> {
    if fs::try_exists(&path).await? {
        return Ok(());
    }

    tokio::task::spawn_blocking(move || {
        let dir = path
            .parent()
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "asset path has no parent"))?;
        let mut staged = tempfile::Builder::new().prefix(".upload-").tempfile_in(dir)?;
        staged.write_all(&data)?;
        staged.flush()?;
        match staged.persist_noclobber(&path) {
            Ok(_) => Ok(()),
            // Same content already stored by a concurrent upload.
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(err) => Err(err.error),
        }
    })
    .await
    .map_err(io::Error::other)?
}

fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn extension(file_name: &str) -> Result<String, StorageError> {
    check_file_name(file_name)?;
    let ext = Path::new(file_name)
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.trim_matches('.').to_ascii_lowercase())
        .filter(|value| !value.is_empty());

    match ext {
        Some(ext) if ext.bytes().all(|b| b.is_ascii_alphanumeric()) => Ok(format!(".{ext}")),
        Some(_) => Err(StorageError::InvalidPath),
        None => Ok(String::new()),
    }
}

fn check_slug(slug: &str) -> Result<(), StorageError> {
    if RESERVED_SLUGS.contains(&slug) {
        return Err(StorageError::Reserved {
            slug: slug.to_string(),
        });
    }
    check_file_name(slug)
}

fn check_file_name(name: &str) -> Result<(), StorageError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(StorageError::InvalidPath),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use time::OffsetDateTime;

    fn chapter(id: EntityId, project_id: EntityId, number: &str, title: Option<&str>) -> ChapterRecord {
        ChapterRecord {
            id,
            project_id,
            chapter: number.to_string(),
            volume: None,
            title: title.map(str::to_string),
            uploader: None,
            scanlation_groups: Vec::new(),
            pages: Vec::new(),
            locked: false,
            published_at: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn layout(dir: &TempDir) -> StorageLayout {
        StorageLayout::new(dir.path().join("data"), None).expect("layout")
    }

    #[tokio::test]
    async fn project_lifecycle_follows_slug() {
        let dir = TempDir::new().expect("temp dir");
        let storage = layout(&dir);

        let created = storage.create_project_dir(1, "foo-bar").await.expect("create");
        assert_eq!(created, storage.root().join("foo-bar"));
        assert_eq!(storage.resolve_project(1).await.expect("resolve"), created);
        assert!(created.join("covers").is_dir());

        let outcome = storage.rename_project_dir(1, "foo-baz").await.expect("rename");
        assert_eq!(outcome.path(), storage.root().join("foo-baz"));
        assert!(!created.exists());
        assert_eq!(
            storage.resolve_project(1).await.expect("resolve"),
            storage.root().join("foo-baz")
        );

        storage.remove_project_dir(1).await.expect("remove");
        assert!(storage.resolve_project(1).await.unwrap_err().is_not_found());
        assert!(!storage.root().join("foo-baz").exists());
    }

    #[tokio::test]
    async fn rename_to_same_slug_is_unchanged() {
        let dir = TempDir::new().expect("temp dir");
        let storage = layout(&dir);
        storage.create_project_dir(1, "same").await.expect("create");

        let outcome = storage.rename_project_dir(1, "same").await.expect("rename");
        assert!(matches!(outcome, RenameOutcome::Unchanged(_)));
    }

    #[tokio::test]
    async fn rename_onto_existing_directory_conflicts_without_side_effects() {
        let dir = TempDir::new().expect("temp dir");
        let storage = layout(&dir);
        let first = storage.create_project_dir(1, "first").await.expect("create");
        storage.create_project_dir(2, "second").await.expect("create");

        let err = storage.rename_project_dir(1, "second").await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
        assert_eq!(storage.resolve_project(1).await.expect("resolve"), first);
        assert!(first.is_dir());
    }

    #[tokio::test]
    async fn reserved_and_nested_slugs_are_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let storage = layout(&dir);

        assert!(matches!(
            storage.create_project_dir(1, "symlinks").await,
            Err(StorageError::Reserved { .. })
        ));
        assert!(matches!(
            storage.create_project_dir(1, "../escape").await,
            Err(StorageError::InvalidPath)
        ));
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let dir = TempDir::new().expect("temp dir");
        let storage = layout(&dir);
        storage.create_project_dir(1, "one").await.expect("create");

        assert!(matches!(
            storage.create_project_dir(1, "other").await,
            Err(StorageError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn colliding_chapter_names_are_disambiguated() {
        let dir = TempDir::new().expect("temp dir");
        let storage = layout(&dir);
        let project = storage.create_project_dir(1, "series").await.expect("create");

        let first = storage
            .create_chapter_dir(&chapter(10, 1, "1", Some("Start")))
            .await
            .expect("first");
        let second = storage
            .create_chapter_dir(&chapter(11, 1, "1", Some("Start")))
            .await
            .expect("second");
        let third = storage
            .create_chapter_dir(&chapter(12, 1, "1", Some("Start")))
            .await
            .expect("third");

        let chapters = project.join("chapters");
        assert_eq!(first, chapters.join("ch-1-start"));
        assert_eq!(second, chapters.join("ch-1-start_-_1"));
        assert_eq!(third, chapters.join("ch-1-start_-_2"));
    }

    #[tokio::test]
    async fn chapter_rename_keeps_link_resolvable() {
        let dir = TempDir::new().expect("temp dir");
        let storage = layout(&dir);
        storage.create_project_dir(1, "series").await.expect("create");
        let old = storage
            .create_chapter_dir(&chapter(10, 1, "1", None))
            .await
            .expect("chapter");

        let renamed = chapter(10, 1, "1", Some("Arrival"));
        let outcome = storage.rename_chapter_dir(&renamed).await.expect("rename");

        let resolved = storage.resolve_chapter(10).await.expect("resolve");
        assert_eq!(resolved, outcome.path());
        assert!(resolved.ends_with("ch-1-arrival"));
        assert!(resolved.is_dir());
        assert!(!old.exists());

        let again = storage.rename_chapter_dir(&renamed).await.expect("rename");
        assert!(matches!(again, RenameOutcome::Unchanged(_)));
    }

    #[tokio::test]
    async fn project_rename_repoints_chapter_links() {
        let dir = TempDir::new().expect("temp dir");
        let storage = layout(&dir);
        storage.create_project_dir(1, "before").await.expect("create");
        storage
            .create_chapter_dir(&chapter(10, 1, "1", None))
            .await
            .expect("chapter");

        storage.rename_project_dir(1, "after").await.expect("rename");

        let resolved = storage.resolve_chapter(10).await.expect("resolve");
        assert!(resolved.starts_with(storage.root().join("after")));
        assert!(resolved.is_dir());
    }

    #[tokio::test]
    async fn remove_project_drops_chapter_links() {
        let dir = TempDir::new().expect("temp dir");
        let storage = layout(&dir);
        storage.create_project_dir(1, "series").await.expect("create");
        storage
            .create_chapter_dir(&chapter(10, 1, "1", None))
            .await
            .expect("chapter");

        storage.remove_project_dir(1).await.expect("remove");

        assert!(storage.resolve_chapter(10).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn remap_is_guarded_against_overlap() {
        let dir = TempDir::new().expect("temp dir");
        let storage = layout(&dir);
        storage.remapping.store(true, Ordering::Release);

        let outcome = storage.remap(&[]).await.expect("remap");
        assert_eq!(outcome, RemapOutcome::AlreadyRunning);

        storage.remapping.store(false, Ordering::Release);
        let outcome = storage.remap(&[]).await.expect("remap");
        assert_eq!(outcome, RemapOutcome::Completed(RemapReport::default()));
        assert!(!storage.remapping.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn remap_links_chapter_holding_its_pages() {
        let dir = TempDir::new().expect("temp dir");
        let storage = layout(&dir);
        storage.create_project_dir(1, "series").await.expect("create");
        let first = storage
            .create_chapter_dir(&chapter(10, 1, "1", None))
            .await
            .expect("first");
        let second = storage
            .create_chapter_dir(&chapter(11, 1, "1", None))
            .await
            .expect("second");
        std::fs::write(first.join("1-aaa.png"), b"a").expect("page");
        std::fs::write(second.join("1-bbb.png"), b"b").expect("page");

        std::fs::remove_dir_all(storage.symlinks_dir()).expect("drop links");

        let projects = vec![ProjectLayout {
            id: 1,
            slug: "series".to_string(),
            chapters: vec![
                ChapterLayout {
                    id: 10,
                    dir_name: Some("ch-1".to_string()),
                    pages: vec!["1-aaa.png".to_string()],
                },
                ChapterLayout {
                    id: 11,
                    dir_name: Some("ch-1".to_string()),
                    pages: vec!["1-bbb.png".to_string()],
                },
                ChapterLayout {
                    id: 12,
                    dir_name: Some("ch-9".to_string()),
                    pages: vec!["1-ccc.png".to_string()],
                },
            ],
        }];

        let RemapOutcome::Completed(report) = storage.remap(&projects).await.expect("remap") else {
            panic!("remap skipped");
        };
        assert_eq!(
            report,
            RemapReport {
                projects_linked: 1,
                chapters_linked: 2,
                chapters_missing: 1,
            }
        );
        assert_eq!(storage.resolve_chapter(10).await.expect("resolve"), first);
        assert_eq!(storage.resolve_chapter(11).await.expect("resolve"), second);
    }

    #[tokio::test]
    async fn remap_finds_chapters_under_stacked_suffixes() {
        let dir = TempDir::new().expect("temp dir");
        let storage = layout(&dir);
        storage.create_project_dir(1, "series").await.expect("create");
        let base = storage
            .create_chapter_dir(&chapter(10, 1, "1", None))
            .await
            .expect("chapter");
        let chapters = base.parent().expect("chapters dir").to_path_buf();
        std::fs::create_dir(chapters.join("ch-1_-_1")).expect("dir");
        let stacked = chapters.join("ch-1_-_1_-_2");
        std::fs::create_dir(&stacked).expect("dir");
        std::fs::write(stacked.join("1-zzz.png"), b"z").expect("page");

        std::fs::remove_dir_all(storage.symlinks_dir()).expect("drop links");

        let projects = vec![ProjectLayout {
            id: 1,
            slug: "series".to_string(),
            chapters: vec![ChapterLayout {
                id: 11,
                dir_name: Some("ch-1".to_string()),
                pages: vec!["1-zzz.png".to_string()],
            }],
        }];

        let RemapOutcome::Completed(report) = storage.remap(&projects).await.expect("remap") else {
            panic!("remap skipped");
        };
        assert_eq!(report.chapters_linked, 1);
        assert_eq!(report.chapters_missing, 0);
        assert_eq!(storage.resolve_chapter(11).await.expect("resolve"), stacked);
    }

    #[tokio::test]
    async fn stored_assets_are_content_addressed() {
        let dir = TempDir::new().expect("temp dir");
        let storage = layout(&dir);
        storage.create_project_dir(1, "series").await.expect("create");
        storage
            .create_chapter_dir(&chapter(10, 1, "1", None))
            .await
            .expect("chapter");

        let cover = storage
            .store_cover(1, "Cover.PNG", Bytes::from_static(b"cover"))
            .await
            .expect("cover");
        assert_eq!(cover, format!("{}.png", checksum(b"cover")));
        let again = storage
            .store_cover(1, "other.png", Bytes::from_static(b"cover"))
            .await
            .expect("cover");
        assert_eq!(cover, again);

        let numbered = storage
            .store_page(10, "007.jpg", Bytes::from_static(b"page"), 3)
            .await
            .expect("page");
        assert!(numbered.starts_with("7-"));
        let appended = storage
            .store_page(10, "scan.jpg", Bytes::from_static(b"other"), 3)
            .await
            .expect("page");
        assert!(appended.starts_with("4-"));
        assert!(storage.page_path(10, &appended).await.expect("path").is_file());
    }

    #[tokio::test]
    async fn removing_asset_drops_derived_copies() {
        let dir = TempDir::new().expect("temp dir");
        let storage = layout(&dir);
        let project = storage.create_project_dir(1, "series").await.expect("create");
        let covers = project.join("covers");
        for name in ["a.png", "a.png.128.jpg", "a.png.256.jpg", "ab.png", "a.png.x.jpg"] {
            std::fs::write(covers.join(name), b"x").expect("write");
        }

        let removed = storage.remove_cover_files(1, "a.png").await.expect("remove");

        assert_eq!(removed, 3);
        assert!(covers.join("ab.png").exists());
        assert!(covers.join("a.png.x.jpg").exists());
    }

    #[test]
    fn derived_name_appends_width() {
        assert_eq!(derived_file_name("1-abc.png", 256), "1-abc.png.256.jpg");
        assert!(is_derived_from("1-abc.png.256.jpg", "1-abc.png"));
        assert!(!is_derived_from("1-abc.png.jpg", "1-abc.png"));
    }
}
