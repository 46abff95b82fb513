use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use directories::BaseDirs;
use tracing::debug;

use super::{
    Connector, CopyRequest, CopySummary, Ddl, ObjectRef, StageRef, WarehouseSession,
    parse_copy_rows,
};
use crate::config::WarehouseConfig;
use crate::error::IngestError;

/// Directory-backed warehouse for development and air-gapped runs.
///
/// Layout under `<root>/<database>/<schema>/`: `stages/<stage>/<file>` for staged
/// files and `tables/<table>.jsonl` holding one JSON `LoadRecord` per line.
#[derive(Debug, Clone)]
pub struct LocalWarehouse {
    root: Utf8PathBuf,
}

impl LocalWarehouse {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    /// `~/.local/share/wiki-pageviews/warehouse` or the platform equivalent.
    pub fn default_root() -> Result<Utf8PathBuf, IngestError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.data_dir().join("wiki-pageviews").join("warehouse"))
                    .ok()
            })
            .ok_or_else(|| {
                IngestError::WarehouseConnection(
                    "unable to resolve local warehouse directory".to_string(),
                )
            })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn table_path(&self, database: &str, table: &ObjectRef) -> Utf8PathBuf {
        self.root
            .join(database)
            .join(&table.schema)
            .join("tables")
            .join(format!("{}.jsonl", table.name))
    }
}

impl Connector for LocalWarehouse {
    fn connect(&self, config: &WarehouseConfig) -> Result<Box<dyn WarehouseSession>, IngestError> {
        config
            .validate()
            .map_err(|err| IngestError::WarehouseConnection(err.to_string()))?;
        let database_dir = self.root.join(&config.database);
        fs::create_dir_all(database_dir.as_std_path()).map_err(|err| {
            IngestError::WarehouseConnection(format!("open {database_dir}: {err}"))
        })?;
        debug!(root = %database_dir, user = %config.user, "opened local warehouse");
        Ok(Box::new(LocalSession {
            warehouse: self.clone(),
            database: config.database.clone(),
        }))
    }
}

struct LocalSession {
    warehouse: LocalWarehouse,
    database: String,
}

impl LocalSession {
    fn schema_dir(&self, schema: &str) -> Utf8PathBuf {
        self.warehouse.root.join(&self.database).join(schema)
    }

    fn stage_dir(&self, stage: &StageRef) -> Utf8PathBuf {
        self.schema_dir(&stage.schema).join("stages").join(&stage.name)
    }
}

impl WarehouseSession for LocalSession {
    fn execute(&mut self, ddl: &Ddl) -> Result<(), IngestError> {
        debug!(statement = %ddl, "execute");
        let failure = |message: String| IngestError::DdlSetup {
            object: ddl.object(),
            message,
        };
        let require_schema = |schema: &str| {
            let dir = self.schema_dir(schema);
            if dir.as_std_path().is_dir() {
                Ok(())
            } else {
                Err(failure(format!("schema {schema} does not exist")))
            }
        };

        match ddl {
            Ddl::CreateSchema(schema) => {
                let dir = self.schema_dir(schema);
                fs::create_dir_all(dir.as_std_path()).map_err(|err| failure(err.to_string()))
            }
            Ddl::CreateStage(stage) => {
                require_schema(&stage.schema)?;
                fs::create_dir_all(self.stage_dir(stage).as_std_path())
                    .map_err(|err| failure(err.to_string()))
            }
            Ddl::CreateTable { table, .. } => {
                require_schema(&table.schema)?;
                let path = self.warehouse.table_path(&self.database, table);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent.as_std_path())
                        .map_err(|err| failure(err.to_string()))?;
                }
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path.as_std_path())
                    .map(|_| ())
                    .map_err(|err| failure(err.to_string()))
            }
        }
    }

    fn put(
        &mut self,
        local_path: &Utf8Path,
        stage: &StageRef,
        overwrite: bool,
    ) -> Result<(), IngestError> {
        let file_name = local_path.file_name().unwrap_or(local_path.as_str());
        let failure = |message: String| IngestError::StageUpload {
            file: file_name.to_string(),
            message,
        };
        let dir = self.stage_dir(stage);
        if !dir.as_std_path().is_dir() {
            return Err(failure(format!("stage {stage} does not exist")));
        }
        let dest = dir.join(file_name);
        if !overwrite && dest.as_std_path().exists() {
            return Ok(());
        }
        fs::copy(local_path.as_std_path(), dest.as_std_path())
            .map(|_| ())
            .map_err(|err| failure(err.to_string()))
    }

    fn copy_into(&mut self, request: &CopyRequest) -> Result<CopySummary, IngestError> {
        debug!(statement = %request, "copy");
        let failure = |message: String| IngestError::Load {
            file: request.file_name.clone(),
            message,
        };
        let staged = self.stage_dir(&request.stage).join(&request.file_name);
        let content = fs::read(staged.as_std_path())
            .map_err(|err| failure(format!("@{}/{}: {err}", request.stage, request.file_name)))?;
        let content = String::from_utf8_lossy(&content);
        let (records, rows_rejected) = parse_copy_rows(&content, request, Utc::now())?;

        let table_path = self.warehouse.table_path(&self.database, &request.table);
        if !table_path.as_std_path().exists() {
            return Err(failure(format!("table {} does not exist", request.table)));
        }
        let file = OpenOptions::new()
            .append(true)
            .open(table_path.as_std_path())
            .map_err(|err| failure(err.to_string()))?;
        let mut writer = BufWriter::new(file);
        for record in &records {
            serde_json::to_writer(&mut writer, record).map_err(|err| failure(err.to_string()))?;
            writer
                .write_all(b"\n")
                .map_err(|err| failure(err.to_string()))?;
        }
        writer.flush().map_err(|err| failure(err.to_string()))?;

        Ok(CopySummary {
            file_name: request.file_name.clone(),
            rows_loaded: records.len(),
            rows_rejected,
        })
    }

    fn close(&mut self) -> Result<(), IngestError> {
        debug!(database = %self.database, "closed local warehouse");
        Ok(())
    }
}
