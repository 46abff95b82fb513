use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

pub const DEFAULT_BASE_URL: &str = "https://dumps.wikimedia.org/other/pageviews";
pub const DEFAULT_DATA_DIR: &str = "wikipedia_pageviews_files";
pub const DEFAULT_MAX_WORKERS: usize = 5;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SCHEMA: &str = "WIKIPEDIA";
pub const DEFAULT_STAGE_NAME: &str = "WIKIPEDIA_PAGEVIEWS_STAGE";
pub const DEFAULT_TABLE_NAME: &str = "RAW_WIKIPEDIA_PAGEVIEWS";

/// On-disk JSON config. Every field is optional; environment variables win.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub local_data_dir: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub max_download_workers: Option<usize>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub stage_name: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub warehouse_root: Option<String>,
    #[serde(default)]
    pub snowflake: SnowflakeSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SnowflakeSection {
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Connection parameters for the warehouse. Everything but `role` is required.
#[derive(Clone, PartialEq, Eq)]
pub struct WarehouseConfig {
    pub account: String,
    pub user: String,
    pub password: String,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    pub role: Option<String>,
}

impl WarehouseConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        let required = [
            ("SNOWFLAKE_ACCOUNT", &self.account),
            ("SNOWFLAKE_USER", &self.user),
            ("SNOWFLAKE_PASSWORD", &self.password),
            ("SNOWFLAKE_WAREHOUSE", &self.warehouse),
            ("SNOWFLAKE_DATABASE", &self.database),
            ("SNOWFLAKE_SCHEMA", &self.schema),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(IngestError::MissingSetting(name.to_string()));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("role", &self.role)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: Utf8PathBuf,
    pub base_url: String,
    pub max_workers: usize,
    pub http_timeout: Duration,
    pub stage_name: String,
    pub table_name: String,
    pub warehouse_root: Option<Utf8PathBuf>,
    pub warehouse: WarehouseConfig,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `.env`, the optional JSON file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Settings, IngestError> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .map_err(|_| IngestError::ConfigRead(path.to_path_buf()))?;
                serde_json::from_str(&content)
                    .map_err(|err| IngestError::ConfigParse(err.to_string()))?
            }
            None => ConfigFile::default(),
        };

        let env = std::env::vars().collect::<HashMap<_, _>>();
        Self::resolve(file, &env)
    }

    pub fn resolve(
        file: ConfigFile,
        env: &HashMap<String, String>,
    ) -> Result<Settings, IngestError> {
        let lookup = |name: &str| {
            env.get(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let max_workers = match lookup("MAX_DOWNLOAD_WORKERS") {
            Some(raw) => parse_number::<usize>("MAX_DOWNLOAD_WORKERS", &raw)?,
            None => file.max_download_workers.unwrap_or(DEFAULT_MAX_WORKERS),
        };
        if max_workers == 0 {
            return Err(IngestError::InvalidSetting {
                name: "MAX_DOWNLOAD_WORKERS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let timeout_secs = match lookup("HTTP_TIMEOUT_SECS") {
            Some(raw) => parse_number::<u64>("HTTP_TIMEOUT_SECS", &raw)?,
            None => file.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        };

        let snowflake = file.snowflake;
        let warehouse = WarehouseConfig {
            account: lookup("SNOWFLAKE_ACCOUNT")
                .or(snowflake.account)
                .unwrap_or_default(),
            user: lookup("SNOWFLAKE_USER")
                .or(snowflake.user)
                .unwrap_or_default(),
            password: lookup("SNOWFLAKE_PASSWORD")
                .or(snowflake.password)
                .unwrap_or_default(),
            warehouse: lookup("SNOWFLAKE_WAREHOUSE")
                .or(snowflake.warehouse)
                .unwrap_or_default(),
            database: lookup("SNOWFLAKE_DATABASE")
                .or(snowflake.database)
                .unwrap_or_default(),
            schema: lookup("SNOWFLAKE_SCHEMA")
                .or(snowflake.schema)
                .unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            role: lookup("SNOWFLAKE_ROLE").or(snowflake.role),
        };

        Ok(Settings {
            data_dir: Utf8PathBuf::from(
                lookup("LOCAL_DATA_DIR")
                    .or(file.local_data_dir)
                    .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            ),
            base_url: lookup("PAGEVIEWS_BASE_URL")
                .or(file.base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_workers,
            http_timeout: Duration::from_secs(timeout_secs),
            stage_name: lookup("SNOWFLAKE_STAGE_NAME")
                .or(file.stage_name)
                .unwrap_or_else(|| DEFAULT_STAGE_NAME.to_string()),
            table_name: lookup("SNOWFLAKE_TABLE_NAME")
                .or(file.table_name)
                .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
            warehouse_root: lookup("WAREHOUSE_ROOT")
                .or(file.warehouse_root)
                .map(Utf8PathBuf::from),
            warehouse,
        })
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, IngestError> {
    raw.parse::<T>().map_err(|_| IngestError::InvalidSetting {
        name: name.to_string(),
        message: format!("expected a number, got {raw:?}"),
    })
}
