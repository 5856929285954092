use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};

use crate::domain::entities::EntityId;
use crate::domain::types::AssetKind;

/// Command-line arguments for the Folio binary.
#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "Folio catalog storage tools")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FOLIO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Rebuild every id link from a catalog snapshot.
    Remap(RemapArgs),
    /// Print the physical directory behind a project or chapter id.
    Resolve(ResolveArgs),
    /// Print the path of a (possibly resized) cover or page.
    Asset(AssetArgs),
    /// Validate configuration and log the resolved settings.
    #[command(name = "check-config")]
    CheckConfig,
}

#[derive(Debug, Args, Clone)]
pub struct RemapArgs {
    /// TOML snapshot holding the projects and chapters to link.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub snapshot: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LinkKind {
    Project,
    Chapter,
}

#[derive(Debug, Args, Clone)]
pub struct ResolveArgs {
    #[arg(value_enum)]
    pub kind: LinkKind,

    #[arg(value_name = "ID")]
    pub id: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AssetTarget {
    Cover,
    Page,
}

impl From<AssetTarget> for AssetKind {
    fn from(target: AssetTarget) -> Self {
        match target {
            AssetTarget::Cover => AssetKind::Cover,
            AssetTarget::Page => AssetKind::Page,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct AssetArgs {
    #[arg(value_enum)]
    pub kind: AssetTarget,

    /// Project id for covers, chapter id for pages.
    #[arg(value_name = "ID")]
    pub id: EntityId,

    /// Stored file name of the original asset.
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Requested width; zero or an unsupported value serves the original.
    #[arg(long, default_value_t = 0)]
    pub width: u32,
}

/// Overrides accepted by every command.
#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the storage root directory.
    #[arg(long = "storage-root", value_name = "PATH", global = true)]
    pub storage_root: Option<PathBuf>,

    /// Override the directory holding id links.
    #[arg(long = "storage-symlinks-dir", value_name = "PATH", global = true)]
    pub storage_symlinks_dir: Option<PathBuf>,

    /// Override the image transcoder executable.
    #[arg(long = "storage-transcoder-path", value_name = "PATH", global = true)]
    pub storage_transcoder_path: Option<PathBuf>,

    /// Enable or disable the catalog cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Override the fan-out policy (purge_only|purge_and_rewarm).
    #[arg(long = "cache-fanout-policy", value_name = "POLICY", global = true)]
    pub cache_fanout_policy: Option<String>,
}
