use std::time::Duration;

use assert_matches::assert_matches;

use dex_cache::config::{Config, ConfigLoader};
use dex_cache::error::DexError;

#[test]
fn parse_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("dex-cache.json");
    std::fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "base_url": "http://localhost:8080/api/v2",
            "locale": "FR",
            "max_id": 151,
            "timeout_ms": 2500,
            "concurrency": 6,
            "cache_dir": "/tmp/dex"
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.base_url, "http://localhost:8080/api/v2");
    assert_eq!(resolved.locale, "fr");
    assert_eq!(resolved.load.max_id, 151);
    assert_eq!(resolved.load.timeout, Duration::from_millis(2500));
    assert_eq!(resolved.load.concurrency, Some(6));
    assert_eq!(resolved.cache_dir.as_ref().map(|dir| dir.as_str()), Some("/tmp/dex"));
}

#[test]
fn max_id_is_clamped() {
    let config = Config {
        max_id: Some(5000),
        concurrency: Some(0),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.load.max_id, 1025);
    assert_eq!(resolved.load.concurrency, None);

    let config = Config {
        max_id: Some(0),
        ..Config::default()
    };
    assert_eq!(ConfigLoader::resolve_config(config).unwrap().load.max_id, 1);
}

#[test]
fn explicit_missing_path_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("missing.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(DexError::ConfigRead(_))
    );
}

#[test]
fn malformed_config_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("dex-cache.json");
    std::fs::write(&path, "{ max_id: }").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(DexError::ConfigParse(_))
    );
}

#[test]
fn unknown_schema_version_is_rejected() {
    let config = Config {
        schema_version: Some(2),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(DexError::ConfigParse(_))
    );
}
