use camino::Utf8Path;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::IngestError;
use crate::store::LocalStore;
use crate::warehouse::{
    CopyRequest, CopySummary, Ddl, ObjectRef, WarehouseSession, pageview_columns,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileLoadOutcome {
    pub file_name: String,
    pub uploaded: bool,
    pub loaded: bool,
    pub rows_loaded: usize,
    pub rows_rejected: usize,
}

/// Sequential stage-and-copy driver over one borrowed warehouse session.
pub struct Loader<'a> {
    session: &'a mut dyn WarehouseSession,
    schema: String,
}

impl<'a> Loader<'a> {
    pub fn new(session: &'a mut dyn WarehouseSession, schema: impl Into<String>) -> Self {
        Self {
            session,
            schema: schema.into(),
        }
    }

    /// Creates schema, stage and table in that order, stopping at the first failure.
    pub fn ensure_objects(&mut self, schema: &str, stage_name: &str, table_name: &str) -> bool {
        match self.try_ensure_objects(schema, stage_name, table_name) {
            Ok(()) => true,
            Err(err) => {
                error!("{err}");
                false
            }
        }
    }

    pub fn try_ensure_objects(
        &mut self,
        schema: &str,
        stage_name: &str,
        table_name: &str,
    ) -> Result<(), IngestError> {
        let statements = [
            Ddl::CreateSchema(schema.to_string()),
            Ddl::CreateStage(ObjectRef::new(schema, stage_name)),
            Ddl::CreateTable {
                table: ObjectRef::new(schema, table_name),
                columns: pageview_columns(),
            },
        ];
        for ddl in &statements {
            info!(object = %ddl.object(), "ensuring exists");
            self.session.execute(ddl)?;
            info!(object = %ddl.object(), "ready");
        }
        Ok(())
    }

    /// Stages one file, replacing any staged file of the same name.
    pub fn upload(&mut self, local_path: &Utf8Path, stage_name: &str) -> bool {
        match self.try_upload(local_path, stage_name) {
            Ok(()) => true,
            Err(err) => {
                error!("{err}");
                false
            }
        }
    }

    pub fn try_upload(&mut self, local_path: &Utf8Path, stage_name: &str) -> Result<(), IngestError> {
        let stage = self.object(stage_name);
        let file_name = local_path.file_name().unwrap_or(local_path.as_str());
        info!(file = %file_name, stage = %stage, "uploading to stage");
        self.session.put(local_path, &stage, true)?;
        info!(file = %file_name, "uploaded");
        Ok(())
    }

    /// Bulk-loads one staged file; malformed rows are dropped by the warehouse.
    pub fn load(&mut self, file_name: &str, stage_name: &str, table_name: &str) -> bool {
        match self.try_load(file_name, stage_name, table_name) {
            Ok(_) => true,
            Err(err) => {
                error!("{err}");
                false
            }
        }
    }

    pub fn try_load(
        &mut self,
        file_name: &str,
        stage_name: &str,
        table_name: &str,
    ) -> Result<CopySummary, IngestError> {
        let request =
            CopyRequest::pageviews(self.object(table_name), self.object(stage_name), file_name);
        info!(file = %file_name, table = %request.table, "copying staged file into table");
        let summary = self.session.copy_into(&request)?;
        if summary.rows_rejected > 0 {
            warn!(
                file = %file_name,
                rejected = summary.rows_rejected,
                "skipped malformed rows"
            );
        }
        info!(file = %file_name, rows = summary.rows_loaded, "copied");
        Ok(summary)
    }

    /// Uploads then loads every decompressed file in `store`, in file-name order.
    ///
    /// A failed upload skips that file's load; no single file stops the batch.
    pub fn load_directory(
        &mut self,
        store: &LocalStore,
        stage_name: &str,
        table_name: &str,
    ) -> Result<Vec<FileLoadOutcome>, IngestError> {
        let files = store.list_decompressed()?;
        if files.is_empty() {
            info!(dir = %store.root(), "no .txt files to load");
            return Ok(Vec::new());
        }
        info!(count = files.len(), "found files to load");

        let mut outcomes = Vec::with_capacity(files.len());
        for path in files {
            let file_name = path.file_name().unwrap_or(path.as_str()).to_string();
            let mut outcome = FileLoadOutcome {
                file_name: file_name.clone(),
                uploaded: false,
                loaded: false,
                rows_loaded: 0,
                rows_rejected: 0,
            };

            outcome.uploaded = self.upload(&path, stage_name);
            if outcome.uploaded {
                match self.try_load(&file_name, stage_name, table_name) {
                    Ok(summary) => {
                        outcome.loaded = true;
                        outcome.rows_loaded = summary.rows_loaded;
                        outcome.rows_rejected = summary.rows_rejected;
                    }
                    Err(err) => error!("{err}"),
                }
            }
            outcomes.push(outcome);
        }
        info!("data loading completed");
        Ok(outcomes)
    }

    fn object(&self, name: &str) -> ObjectRef {
        ObjectRef::new(self.schema.clone(), name)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::config::WarehouseConfig;
    use crate::warehouse::memory::{FailurePlan, WarehouseCall};
    use crate::warehouse::{Connector, MemoryWarehouse};

    fn config() -> WarehouseConfig {
        WarehouseConfig {
            account: "acct".to_string(),
            user: "loader".to_string(),
            password: "secret".to_string(),
            warehouse: "wh".to_string(),
            database: "db".to_string(),
            schema: "WIKIPEDIA".to_string(),
            role: None,
        }
    }

    fn store_with(files: &[&str]) -> (tempfile::TempDir, LocalStore) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        for name in files {
            fs::write(root.join(name), "en Main_Page 1 0\n").unwrap();
        }
        (temp, LocalStore::new(root))
    }

    fn puts_and_copies(calls: &[WarehouseCall]) -> Vec<WarehouseCall> {
        calls
            .iter()
            .filter(|call| matches!(call, WarehouseCall::Put(_) | WarehouseCall::Copy(_)))
            .cloned()
            .collect()
    }

    #[test]
    fn schema_failure_stops_before_stage_and_table() {
        let warehouse = MemoryWarehouse::with_failures(FailurePlan {
            ddl_containing: Some("CREATE SCHEMA".to_string()),
            ..FailurePlan::default()
        });
        let mut session = warehouse.connect(&config()).unwrap();
        let mut loader = Loader::new(session.as_mut(), "WIKIPEDIA");
        assert!(!loader.ensure_objects("WIKIPEDIA", "STAGE", "RAW"));

        let executed = warehouse
            .calls()
            .into_iter()
            .filter(|call| matches!(call, WarehouseCall::Execute(_)))
            .count();
        assert_eq!(executed, 1);
    }

    #[test]
    fn files_processed_in_name_order() {
        let (_temp, store) = store_with(&["b.txt", "a.txt"]);
        let warehouse = MemoryWarehouse::new();
        let mut session = warehouse.connect(&config()).unwrap();
        let mut loader = Loader::new(session.as_mut(), "WIKIPEDIA");
        assert!(loader.ensure_objects("WIKIPEDIA", "STAGE", "RAW"));
        let outcomes = loader.load_directory(&store, "STAGE", "RAW").unwrap();

        assert_eq!(
            puts_and_copies(&warehouse.calls()),
            vec![
                WarehouseCall::Put("a.txt".to_string()),
                WarehouseCall::Copy("a.txt".to_string()),
                WarehouseCall::Put("b.txt".to_string()),
                WarehouseCall::Copy("b.txt".to_string()),
            ]
        );
        assert!(outcomes.iter().all(|outcome| outcome.loaded));
        assert_eq!(warehouse.rows("WIKIPEDIA.RAW").len(), 2);
    }

    #[test]
    fn failed_upload_skips_load_and_continues() {
        let (_temp, store) = store_with(&["x.txt", "y.txt"]);
        let warehouse = MemoryWarehouse::with_failures(FailurePlan {
            put_files: HashSet::from(["x.txt".to_string()]),
            ..FailurePlan::default()
        });
        let mut session = warehouse.connect(&config()).unwrap();
        let mut loader = Loader::new(session.as_mut(), "WIKIPEDIA");
        assert!(loader.ensure_objects("WIKIPEDIA", "STAGE", "RAW"));
        let outcomes = loader.load_directory(&store, "STAGE", "RAW").unwrap();

        assert_eq!(
            puts_and_copies(&warehouse.calls()),
            vec![
                WarehouseCall::Put("x.txt".to_string()),
                WarehouseCall::Put("y.txt".to_string()),
                WarehouseCall::Copy("y.txt".to_string()),
            ]
        );
        assert!(!outcomes[0].uploaded && !outcomes[0].loaded);
        assert!(outcomes[1].loaded);
    }

    #[test]
    fn failed_copy_does_not_stop_batch() {
        let (_temp, store) = store_with(&["a.txt", "b.txt"]);
        let warehouse = MemoryWarehouse::with_failures(FailurePlan {
            copy_files: HashSet::from(["a.txt".to_string()]),
            ..FailurePlan::default()
        });
        let mut session = warehouse.connect(&config()).unwrap();
        let mut loader = Loader::new(session.as_mut(), "WIKIPEDIA");
        assert!(loader.ensure_objects("WIKIPEDIA", "STAGE", "RAW"));
        let outcomes = loader.load_directory(&store, "STAGE", "RAW").unwrap();

        assert!(outcomes[0].uploaded && !outcomes[0].loaded);
        assert!(outcomes[1].loaded);
        assert!(!loader.load("missing.txt", "STAGE", "RAW"));
    }
}
