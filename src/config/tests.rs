use super::*;
use serial_test::serial;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.storage.root = Some(PathBuf::from("/srv/file-data"));

    let overrides = Overrides {
        log_level: Some("debug".to_string()),
        storage_root: Some(PathBuf::from("/srv/cli-data")),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.storage.root, PathBuf::from("/srv/cli-data"));
}

#[test]
fn defaults_match_cache_config() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    let config = CacheConfig::from(&settings.cache);
    let defaults = CacheConfig::default();

    assert_eq!(config.projects_capacity, defaults.projects_capacity);
    assert_eq!(config.rendered_ttl_secs, defaults.rendered_ttl_secs);
    assert_eq!(config.fanout_policy, FanoutPolicy::PurgeAndRewarm);
    assert_eq!(settings.storage.root, PathBuf::from(DEFAULT_STORAGE_ROOT));
    assert!(settings.storage.symlinks_dir.is_none());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = Overrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn fanout_policy_is_validated() {
    let mut raw = RawSettings::default();
    raw.cache.fanout_policy = Some("purge_only".to_string());
    let settings = Settings::from_raw(raw.clone()).expect("valid settings");
    assert_eq!(settings.cache.fanout_policy, FanoutPolicy::PurgeOnly);

    raw.cache.fanout_policy = Some("rewarm_sometimes".to_string());
    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.fanout_policy",
            ..
        }
    ));
}

#[test]
fn zero_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.pages_capacity = Some(0);

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.pages_capacity",
            ..
        }
    ));
}

#[test]
fn zero_ttl_means_no_expiry() {
    let mut raw = RawSettings::default();
    raw.cache.chapters_ttl_secs = Some(0);

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.chapters.ttl, Duration::ZERO);
}

#[test]
fn symlinks_dir_must_differ_from_root() {
    let mut raw = RawSettings::default();
    raw.storage.root = Some(PathBuf::from("data"));
    raw.storage.symlinks_dir = Some(PathBuf::from("data"));

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn parse_remap_arguments() {
    let args = CliArgs::parse_from(["folio", "remap", "--snapshot", "/tmp/catalog.toml"]);

    match args.command {
        Command::Remap(remap) => {
            assert_eq!(remap.snapshot, std::path::Path::new("/tmp/catalog.toml"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_resolve_arguments() {
    let args = CliArgs::parse_from(["folio", "resolve", "chapter", "42"]);

    match args.command {
        Command::Resolve(resolve) => {
            assert_eq!(resolve.kind, LinkKind::Chapter);
            assert_eq!(resolve.id, 42);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_asset_arguments_with_global_overrides() {
    let args = CliArgs::parse_from([
        "folio",
        "asset",
        "cover",
        "7",
        "abc.png",
        "--width",
        "256",
        "--storage-root",
        "/srv/folio",
    ]);

    assert_eq!(
        args.overrides.storage_root.as_deref(),
        Some(std::path::Path::new("/srv/folio"))
    );
    match args.command {
        Command::Asset(asset) => {
            assert_eq!(asset.kind, AssetTarget::Cover);
            assert_eq!(asset.id, 7);
            assert_eq!(asset.file, "abc.png");
            assert_eq!(asset.width, 256);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_check_config() {
    let args = CliArgs::parse_from(["folio", "check-config", "--cache-enabled", "false"]);

    assert!(matches!(args.command, Command::CheckConfig));
    assert_eq!(args.overrides.cache_enabled, Some(false));
}

#[test]
#[serial]
fn environment_sits_between_file_and_cli() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let file = dir.path().join("folio.toml");
    std::fs::write(
        &file,
        "[logging]\nlevel = \"warn\"\n\n[storage]\nroot = \"/srv/file\"\n\n[cache]\nfanout_policy = \"purge_and_rewarm\"\n",
    )
    .expect("write config");

    // SAFETY: env access is serialized across tests touching FOLIO__*.
    unsafe {
        std::env::set_var("FOLIO__CACHE__FANOUT_POLICY", "purge_only");
        std::env::set_var("FOLIO__STORAGE__ROOT", "/srv/env");
    }
    let args = CliArgs::parse_from([
        "folio",
        "--config-file",
        file.to_str().expect("utf-8 path"),
        "--storage-root",
        "/srv/cli",
        "check-config",
    ]);
    let loaded = load(&args);
    unsafe {
        std::env::remove_var("FOLIO__CACHE__FANOUT_POLICY");
        std::env::remove_var("FOLIO__STORAGE__ROOT");
    }

    let settings = loaded.expect("settings");
    assert_eq!(settings.logging.level, LevelFilter::WARN);
    assert_eq!(settings.cache.fanout_policy, FanoutPolicy::PurgeOnly);
    assert_eq!(settings.storage.root, PathBuf::from("/srv/cli"));
}

#[test]
#[serial]
fn missing_config_file_is_an_error() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let args = CliArgs::parse_from([
        "folio",
        "--config-file",
        dir.path().join("absent.toml").to_str().expect("utf-8 path"),
        "check-config",
    ]);

    assert!(matches!(load(&args), Err(LoadError::Build(_))));
}
