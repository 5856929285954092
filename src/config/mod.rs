//! Settings for the folio binary.
//!
//! Sources, lowest precedence first: `config/default.toml`, `folio.toml`,
//! `--config-file`, `FOLIO__SECTION__KEY` variables, command-line flags.

mod cli;

pub use cli::{
    AssetArgs, AssetTarget, CliArgs, Command, LinkKind, Overrides, RemapArgs, ResolveArgs,
};

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, FanoutPolicy};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "folio";
const DEFAULT_STORAGE_ROOT: &str = "data";
const DEFAULT_TRANSCODER_PATH: &str = "folio-image";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub root: PathBuf,
    /// `None` places links under `<root>/symlinks`.
    pub symlinks_dir: Option<PathBuf>,
    pub transcoder_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub fanout_policy: FanoutPolicy,
    pub consume_batch_limit: NonZeroUsize,
    pub background_concurrency: NonZeroUsize,
    pub projects: FamilySettings,
    pub chapters: FamilySettings,
    pub covers: FamilySettings,
    pub pages: FamilySettings,
    pub stats: FamilySettings,
    pub rendered: FamilySettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilySettings {
    pub capacity: NonZeroUsize,
    pub ttl: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read settings: {0}")]
    Build(#[from] config::ConfigError),
    #[error("`{key}` {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Merge every source and validate the result.
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("FOLIO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Parse the command line and load settings from it.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(root) = overrides.storage_root.as_ref() {
            self.storage.root = Some(root.clone());
        }
        if let Some(dir) = overrides.storage_symlinks_dir.as_ref() {
            self.storage.symlinks_dir = Some(dir.clone());
        }
        if let Some(path) = overrides.storage_transcoder_path.as_ref() {
            self.storage.transcoder_path = Some(path.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(policy) = overrides.cache_fanout_policy.as_ref() {
            self.cache.fanout_policy = Some(policy.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            storage,
            cache,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            storage: build_storage_settings(storage)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("is not a log level: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let root = storage
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("storage.root", "must not be empty"));
    }

    let symlinks_dir = storage
        .symlinks_dir
        .filter(|dir| !dir.as_os_str().is_empty());
    if symlinks_dir.as_ref().is_some_and(|dir| *dir == root) {
        return Err(LoadError::invalid(
            "storage.symlinks_dir",
            "must differ from storage.root",
        ));
    }

    let transcoder_path = storage
        .transcoder_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TRANSCODER_PATH));
    if transcoder_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.transcoder_path",
            "must not be empty",
        ));
    }

    Ok(StorageSettings {
        root,
        symlinks_dir,
        transcoder_path,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();

    let fanout_policy = match cache.fanout_policy.as_deref().map(str::trim) {
        None => defaults.fanout_policy,
        Some("purge_only") => FanoutPolicy::PurgeOnly,
        Some("purge_and_rewarm") => FanoutPolicy::PurgeAndRewarm,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.fanout_policy",
                format!("must be `purge_only` or `purge_and_rewarm`, not `{other}`"),
            ));
        }
    };

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        fanout_policy,
        consume_batch_limit: non_zero_usize(
            cache.consume_batch_limit.unwrap_or(defaults.consume_batch_limit),
            "cache.consume_batch_limit",
        )?,
        background_concurrency: non_zero_usize(
            cache
                .background_concurrency
                .unwrap_or(defaults.background_concurrency),
            "cache.background_concurrency",
        )?,
        projects: family(
            cache.projects_capacity.unwrap_or(defaults.projects_capacity),
            cache.projects_ttl_secs.unwrap_or(defaults.projects_ttl_secs),
            "cache.projects_capacity",
        )?,
        chapters: family(
            cache.chapters_capacity.unwrap_or(defaults.chapters_capacity),
            cache.chapters_ttl_secs.unwrap_or(defaults.chapters_ttl_secs),
            "cache.chapters_capacity",
        )?,
        covers: family(
            cache.covers_capacity.unwrap_or(defaults.covers_capacity),
            cache.covers_ttl_secs.unwrap_or(defaults.covers_ttl_secs),
            "cache.covers_capacity",
        )?,
        pages: family(
            cache.pages_capacity.unwrap_or(defaults.pages_capacity),
            cache.pages_ttl_secs.unwrap_or(defaults.pages_ttl_secs),
            "cache.pages_capacity",
        )?,
        stats: family(
            cache.stats_capacity.unwrap_or(defaults.stats_capacity),
            cache.stats_ttl_secs.unwrap_or(defaults.stats_ttl_secs),
            "cache.stats_capacity",
        )?,
        rendered: family(
            cache.rendered_capacity.unwrap_or(defaults.rendered_capacity),
            cache.rendered_ttl_secs.unwrap_or(defaults.rendered_ttl_secs),
            "cache.rendered_capacity",
        )?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    root: Option<PathBuf>,
    symlinks_dir: Option<PathBuf>,
    transcoder_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    fanout_policy: Option<String>,
    consume_batch_limit: Option<usize>,
    background_concurrency: Option<usize>,
    projects_capacity: Option<usize>,
    projects_ttl_secs: Option<u64>,
    chapters_capacity: Option<usize>,
    chapters_ttl_secs: Option<u64>,
    covers_capacity: Option<usize>,
    covers_ttl_secs: Option<u64>,
    pages_capacity: Option<usize>,
    pages_ttl_secs: Option<u64>,
    stats_capacity: Option<usize>,
    stats_ttl_secs: Option<u64>,
    rendered_capacity: Option<usize>,
    rendered_ttl_secs: Option<u64>,
}

fn family(capacity: usize, ttl_secs: u64, key: &'static str) -> Result<FamilySettings, LoadError> {
    Ok(FamilySettings {
        capacity: non_zero_usize(capacity, key)?,
        ttl: Duration::from_secs(ttl_secs),
    })
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
