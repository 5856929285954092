#![cfg(unix)]

use std::sync::Arc;

use bytes::Bytes;
use folio::application::mutations::CatalogWriter;
use folio::application::repos::{ChapterDraft, ProjectDraft};
use folio::cache::{BackgroundTasks, CacheConfig, CacheTrigger, CatalogCaches, EventQueue, FanoutConsumer};
use folio::domain::types::{Demographic, ProjectStatus, Rating, SeriesStatus};
use folio::infra::memory::InMemoryCatalog;
use folio::infra::storage::{RemapOutcome, StorageError, StorageLayout};
use tempfile::TempDir;

fn writer(dir: &TempDir) -> CatalogWriter {
    let config = CacheConfig::default();
    let caches = Arc::new(CatalogCaches::new(&config));
    let queue = Arc::new(EventQueue::new());
    let consumer = Arc::new(FanoutConsumer::new(config.clone(), caches, Arc::clone(&queue)));
    let tasks = BackgroundTasks::inline();
    let trigger = Arc::new(CacheTrigger::new(config, queue, consumer, tasks.clone()));
    let storage =
        Arc::new(StorageLayout::new(dir.path().join("data"), None).expect("storage layout"));
    CatalogWriter::new(Arc::new(InMemoryCatalog::new()), storage, trigger, tasks)
}

fn project_draft(title: &str) -> ProjectDraft {
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

fn chapter_draft(project_id: i64, number: &str) -> ChapterDraft {
    ChapterDraft {
        project_id,
        chapter: number.to_string(),
        volume: None,
        title: None,
        uploader: None,
        scanlation_groups: Vec::new(),
        locked: false,
    }
}

#[tokio::test]
async fn project_directory_follows_title_through_its_lifecycle() {
    let dir = TempDir::new().expect("tempdir");
    let writer = writer(&dir);
    let storage = Arc::clone(writer.storage());

    let project = writer
        .create_project(project_draft("Foo Bar"))
        .await
        .expect("create");
    assert_eq!(project.id, 1);
    let original = storage.root().join("foo-bar");
    assert_eq!(storage.resolve_project(1).await.expect("resolve"), original);

    writer
        .update_project(1, project_draft("Foo Baz"))
        .await
        .expect("rename");
    let renamed = storage.root().join("foo-baz");
    assert_eq!(storage.resolve_project(1).await.expect("resolve"), renamed);
    assert!(!original.exists());

    writer.delete_project(1).await.expect("delete");
    assert!(matches!(
        storage.resolve_project(1).await,
        Err(StorageError::NotFound { .. })
    ));
    assert!(!renamed.exists());
}

#[tokio::test]
async fn chapters_survive_a_project_rename() {
    let dir = TempDir::new().expect("tempdir");
    let writer = writer(&dir);
    let storage = Arc::clone(writer.storage());

    let project = writer
        .create_project(project_draft("Old Name"))
        .await
        .expect("create");
    let chapter = writer
        .create_chapter(chapter_draft(project.id, "3"))
        .await
        .expect("chapter");
    let pages = writer
        .upload_page(chapter.id, "001.png", Bytes::from_static(b"page"))
        .await
        .expect("page");

    writer
        .update_project(project.id, project_draft("New Name"))
        .await
        .expect("rename");

    let chapter_dir = storage.resolve_chapter(chapter.id).await.expect("resolve");
    assert!(chapter_dir.starts_with(storage.root().join("new-name")));
    assert!(chapter_dir.join(&pages[0]).is_file());
}

#[tokio::test]
async fn remap_restores_every_link() {
    let dir = TempDir::new().expect("tempdir");
    let writer = writer(&dir);
    let storage = Arc::clone(writer.storage());

    let project = writer
        .create_project(project_draft("Twins"))
        .await
        .expect("create");
    let first = writer
        .create_chapter(chapter_draft(project.id, "1"))
        .await
        .expect("first chapter");
    let second = writer
        .create_chapter(chapter_draft(project.id, "1"))
        .await
        .expect("second chapter");
    let first_pages = writer
        .upload_page(first.id, "001.png", Bytes::from_static(b"first"))
        .await
        .expect("first page");
    let second_pages = writer
        .upload_page(second.id, "001.png", Bytes::from_static(b"second"))
        .await
        .expect("second page");

    tokio::fs::remove_dir_all(storage.symlinks_dir())
        .await
        .expect("drop links");
    assert!(storage.resolve_project(project.id).await.is_err());

    let RemapOutcome::Completed(report) = writer.remap_storage().await.expect("remap") else {
        panic!("remap did not run");
    };

    assert_eq!(report.projects_linked, 1);
    assert_eq!(report.chapters_linked, 2);
    assert_eq!(report.chapters_missing, 0);

    let first_dir = storage.resolve_chapter(first.id).await.expect("first");
    let second_dir = storage.resolve_chapter(second.id).await.expect("second");
    assert!(first_dir.ends_with("ch-1"));
    assert!(second_dir.ends_with("ch-1_-_1"));
    assert!(first_dir.join(&first_pages[0]).is_file());
    assert!(second_dir.join(&second_pages[0]).is_file());
}

#[tokio::test]
async fn remap_reports_chapters_without_files() {
    let dir = TempDir::new().expect("tempdir");
    let writer = writer(&dir);

    let project = writer
        .create_project(project_draft("Sparse"))
        .await
        .expect("create");
    writer
        .create_chapter(chapter_draft(project.id, "1"))
        .await
        .expect("empty chapter");

    let RemapOutcome::Completed(report) = writer.remap_storage().await.expect("remap") else {
        panic!("remap did not run");
    };

    assert_eq!(report.projects_linked, 1);
    assert_eq!(report.chapters_linked, 0);
    assert_eq!(report.chapters_missing, 1);
}
