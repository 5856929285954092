use std::{process, sync::Arc};

use folio::{
    application::{
        assets::AssetService, catalog::CatalogReader, error::AppError, mutations::CatalogWriter,
        repos::CatalogRepo,
    },
    cache::{
        BackgroundTasks, CacheConfig, CacheTrigger, CatalogCaches, EventQueue, FanoutConsumer,
    },
    config,
    domain::types::AssetKind,
    infra::{
        error::InfraError,
        memory::InMemoryCatalog,
        resize::ResizeGuard,
        snapshot::CatalogSnapshot,
        storage::{RemapOutcome, StorageLayout},
        telemetry,
        transcoder::CommandTranscoder,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, error_code = error.code(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, error_code = error.code(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        config::Command::Remap(args) => run_remap(settings, args).await,
        config::Command::Resolve(args) => run_resolve(settings, args).await,
        config::Command::Asset(args) => run_asset(settings, args).await,
        config::Command::CheckConfig => run_check_config(&settings),
    }
}

async fn run_remap(settings: config::Settings, args: config::RemapArgs) -> Result<(), AppError> {
    info!(
        target = "folio::remap",
        snapshot = %args.snapshot.display(),
        "Starting remap"
    );

    let snapshot = CatalogSnapshot::load(&args.snapshot).await?;
    let repo: Arc<dyn CatalogRepo> = Arc::new(InMemoryCatalog::from_snapshot(snapshot));
    let writer = build_writer(&settings, repo)?;

    match writer.remap_storage().await? {
        RemapOutcome::Completed(report) => {
            let rendered = serde_json::to_string_pretty(&report)
                .map_err(|err| AppError::unexpected(err.to_string()))?;
            println!("{rendered}");
            Ok(())
        }
        RemapOutcome::AlreadyRunning => Err(AppError::unexpected("remap is already running")),
    }
}

async fn run_resolve(settings: config::Settings, args: config::ResolveArgs) -> Result<(), AppError> {
    let storage = open_storage(&settings)?;
    let path = match args.kind {
        config::LinkKind::Project => storage.resolve_project(args.id).await?,
        config::LinkKind::Chapter => storage.resolve_chapter(args.id).await?,
    };
    println!("{}", path.display());
    Ok(())
}

async fn run_asset(settings: config::Settings, args: config::AssetArgs) -> Result<(), AppError> {
    let storage = Arc::new(open_storage(&settings)?);
    let transcoder = Arc::new(CommandTranscoder::new(
        settings.storage.transcoder_path.clone(),
    ));
    let assets = AssetService::new(storage, Arc::new(ResizeGuard::new(transcoder)));

    let kind = AssetKind::from(args.kind);
    let asset = assets
        .derived_asset(kind, args.id, &args.file, args.width)
        .await?;

    info!(
        target = "folio::asset",
        kind = kind.as_str(),
        id = args.id,
        derived = asset.derived,
        "Asset resolved"
    );
    println!("{}", asset.path.display());
    Ok(())
}

fn run_check_config(settings: &config::Settings) -> Result<(), AppError> {
    let cache = CacheConfig::from(&settings.cache);
    info!(
        target = "folio::config",
        log_level = %settings.logging.level,
        storage_root = %settings.storage.root.display(),
        symlinks_dir = ?settings.storage.symlinks_dir,
        transcoder = %settings.storage.transcoder_path.display(),
        cache_enabled = cache.enabled,
        fanout_policy = cache.fanout_policy.as_str(),
        background_concurrency = settings.cache.background_concurrency.get(),
        "Configuration is valid"
    );
    Ok(())
}

fn open_storage(settings: &config::Settings) -> Result<StorageLayout, AppError> {
    StorageLayout::new(
        settings.storage.root.clone(),
        settings.storage.symlinks_dir.clone(),
    )
    .map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to open storage root `{}`: {err}",
            settings.storage.root.display()
        )))
    })
}

/// Wire caches, fan-out and storage around `repo`.
fn build_writer(
    settings: &config::Settings,
    repo: Arc<dyn CatalogRepo>,
) -> Result<CatalogWriter, AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let caches = Arc::new(CatalogCaches::new(&cache_config));
    let reader = Arc::new(CatalogReader::new(Arc::clone(&caches), Arc::clone(&repo)));

    let tasks = BackgroundTasks::spawned(settings.cache.background_concurrency);
    let queue = Arc::new(EventQueue::new());
    let consumer = Arc::new(
        FanoutConsumer::new(cache_config.clone(), caches, Arc::clone(&queue))
            .with_rewarmer(reader),
    );
    let trigger = Arc::new(CacheTrigger::new(cache_config, queue, consumer, tasks.clone()));
    let storage = Arc::new(open_storage(settings)?);

    Ok(CatalogWriter::new(repo, storage, trigger, tasks))
}
