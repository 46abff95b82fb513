use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use wiki_pageviews::config::{
    ConfigFile, ConfigLoader, DEFAULT_BASE_URL, DEFAULT_SCHEMA, SnowflakeSection,
};
use wiki_pageviews::error::IngestError;

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[test]
fn environment_overrides_file() {
    let file = ConfigFile {
        local_data_dir: Some("from-file".to_string()),
        max_download_workers: Some(3),
        table_name: Some("FILE_TABLE".to_string()),
        snowflake: SnowflakeSection {
            account: Some("file-account".to_string()),
            schema: Some("FILE_SCHEMA".to_string()),
            ..SnowflakeSection::default()
        },
        ..ConfigFile::default()
    };
    let settings = ConfigLoader::resolve(
        file,
        &env(&[
            ("LOCAL_DATA_DIR", "from-env"),
            ("SNOWFLAKE_ACCOUNT", "env-account"),
            ("MAX_DOWNLOAD_WORKERS", ""),
        ]),
    )
    .unwrap();

    assert_eq!(settings.data_dir.as_str(), "from-env");
    assert_eq!(settings.max_workers, 3);
    assert_eq!(settings.table_name, "FILE_TABLE");
    assert_eq!(settings.warehouse.account, "env-account");
    assert_eq!(settings.warehouse.schema, "FILE_SCHEMA");
    assert_eq!(settings.base_url, DEFAULT_BASE_URL);
    assert_eq!(settings.http_timeout, Duration::from_secs(300));
}

#[test]
fn schema_defaults_when_unset() {
    let settings = ConfigLoader::resolve(ConfigFile::default(), &HashMap::new()).unwrap();
    assert_eq!(settings.warehouse.schema, DEFAULT_SCHEMA);
    assert_eq!(settings.warehouse.role, None);
    assert_eq!(settings.warehouse_root, None);
}

#[test]
fn non_numeric_timeout_is_rejected() {
    let err = ConfigLoader::resolve(
        ConfigFile::default(),
        &env(&[("HTTP_TIMEOUT_SECS", "soon")]),
    )
    .unwrap_err();
    assert_matches!(err, IngestError::InvalidSetting { name, .. } if name == "HTTP_TIMEOUT_SECS");
}

#[test]
fn json_file_is_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pageviews.json");
    fs::write(
        &path,
        r#"{
            "stage_name": "CUSTOM_STAGE",
            "http_timeout_secs": 60,
            "snowflake": { "database": "ANALYTICS", "role": "LOADER" }
        }"#,
    )
    .unwrap();

    let settings = ConfigLoader::load(Some(&path)).unwrap();
    assert_eq!(settings.http_timeout, Duration::from_secs(60));
    if std::env::var("SNOWFLAKE_STAGE_NAME").is_err() {
        assert_eq!(settings.stage_name, "CUSTOM_STAGE");
    }
    if std::env::var("SNOWFLAKE_ROLE").is_err() {
        assert_eq!(settings.warehouse.role.as_deref(), Some("LOADER"));
    }
}

#[test]
fn unreadable_or_invalid_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    assert_matches!(
        ConfigLoader::load(Some(&missing)),
        Err(IngestError::ConfigRead(_))
    );

    let broken = dir.path().join("broken.json");
    fs::write(&broken, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::load(Some(&broken)),
        Err(IngestError::ConfigParse(_))
    );
}
