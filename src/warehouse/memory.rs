use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard};

use camino::Utf8Path;
use chrono::Utc;

use super::{
    Connector, CopyRequest, CopySummary, Ddl, StageRef, WarehouseSession, parse_copy_rows,
};
use crate::config::WarehouseConfig;
use crate::domain::LoadRecord;
use crate::error::IngestError;

/// Every call a session received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarehouseCall {
    Connect,
    Execute(String),
    Put(String),
    Copy(String),
    Close,
}

/// Which operations should fail, for exercising abort and skip paths.
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    pub connect: bool,
    /// Fail DDL whose rendered statement contains this text.
    pub ddl_containing: Option<String>,
    pub put_files: HashSet<String>,
    pub copy_files: HashSet<String>,
}

#[derive(Debug, Default)]
struct State {
    schemas: BTreeSet<String>,
    stages: HashMap<String, BTreeMap<String, Vec<u8>>>,
    tables: HashMap<String, Vec<LoadRecord>>,
    calls: Vec<WarehouseCall>,
    failures: FailurePlan,
    open_sessions: usize,
}

/// In-process warehouse. Clones share state, so a test can keep a handle while the
/// workflow owns the connector.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<State>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failures(failures: FailurePlan) -> Self {
        let warehouse = Self::default();
        warehouse.lock().failures = failures;
        warehouse
    }

    pub fn calls(&self) -> Vec<WarehouseCall> {
        self.lock().calls.clone()
    }

    pub fn rows(&self, table: &str) -> Vec<LoadRecord> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn staged_files(&self, stage: &str) -> Vec<String> {
        self.lock()
            .stages
            .get(stage)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Connector for MemoryWarehouse {
    fn connect(&self, config: &WarehouseConfig) -> Result<Box<dyn WarehouseSession>, IngestError> {
        let mut state = self.lock();
        state.calls.push(WarehouseCall::Connect);
        if state.failures.connect {
            return Err(IngestError::WarehouseConnection(format!(
                "account {} refused the connection",
                config.account
            )));
        }
        state.open_sessions += 1;
        Ok(Box::new(MemorySession {
            warehouse: self.clone(),
            closed: false,
        }))
    }
}

struct MemorySession {
    warehouse: MemoryWarehouse,
    closed: bool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<(), IngestError> {
        if self.closed {
            return Err(IngestError::WarehouseConnection(
                "session already closed".to_string(),
            ));
        }
        Ok(())
    }
}

impl WarehouseSession for MemorySession {
    fn execute(&mut self, ddl: &Ddl) -> Result<(), IngestError> {
        self.ensure_open()?;
        let statement = ddl.to_string();
        let mut state = self.warehouse.lock();
        state.calls.push(WarehouseCall::Execute(statement.clone()));

        let failure = |message: &str| IngestError::DdlSetup {
            object: ddl.object(),
            message: message.to_string(),
        };
        if let Some(pattern) = &state.failures.ddl_containing {
            if statement.contains(pattern.as_str()) {
                return Err(failure("injected failure"));
            }
        }

        match ddl {
            Ddl::CreateSchema(schema) => {
                state.schemas.insert(schema.clone());
            }
            Ddl::CreateStage(stage) => {
                if !state.schemas.contains(&stage.schema) {
                    return Err(failure("schema does not exist"));
                }
                state.stages.entry(stage.to_string()).or_default();
            }
            Ddl::CreateTable { table, .. } => {
                if !state.schemas.contains(&table.schema) {
                    return Err(failure("schema does not exist"));
                }
                state.tables.entry(table.to_string()).or_default();
            }
        }
        Ok(())
    }

    fn put(
        &mut self,
        local_path: &Utf8Path,
        stage: &StageRef,
        overwrite: bool,
    ) -> Result<(), IngestError> {
        self.ensure_open()?;
        let file_name = local_path.file_name().unwrap_or(local_path.as_str()).to_string();
        let mut state = self.warehouse.lock();
        state.calls.push(WarehouseCall::Put(file_name.clone()));

        let failure = |message: String| IngestError::StageUpload {
            file: file_name.clone(),
            message,
        };
        if state.failures.put_files.contains(&file_name) {
            return Err(failure("injected failure".to_string()));
        }
        let bytes = fs::read(local_path.as_std_path()).map_err(|err| failure(err.to_string()))?;
        let files = state
            .stages
            .get_mut(&stage.to_string())
            .ok_or_else(|| failure(format!("stage {stage} does not exist")))?;
        if overwrite || !files.contains_key(&file_name) {
            files.insert(file_name.clone(), bytes);
        }
        Ok(())
    }

    fn copy_into(&mut self, request: &CopyRequest) -> Result<CopySummary, IngestError> {
        self.ensure_open()?;
        let mut state = self.warehouse.lock();
        state
            .calls
            .push(WarehouseCall::Copy(request.file_name.clone()));

        let failure = |message: String| IngestError::Load {
            file: request.file_name.clone(),
            message,
        };
        if state.failures.copy_files.contains(&request.file_name) {
            return Err(failure("injected failure".to_string()));
        }
        let bytes = state
            .stages
            .get(&request.stage.to_string())
            .and_then(|files| files.get(&request.file_name))
            .ok_or_else(|| failure(format!("@{}/{} not found", request.stage, request.file_name)))?;
        let content = String::from_utf8_lossy(bytes).into_owned();
        let (records, rows_rejected) = parse_copy_rows(&content, request, Utc::now())?;
        let rows_loaded = records.len();
        state
            .tables
            .get_mut(&request.table.to_string())
            .ok_or_else(|| failure(format!("table {} does not exist", request.table)))?
            .extend(records);

        Ok(CopySummary {
            file_name: request.file_name.clone(),
            rows_loaded,
            rows_rejected,
        })
    }

    fn close(&mut self) -> Result<(), IngestError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.warehouse.lock();
        state.calls.push(WarehouseCall::Close);
        state.open_sessions = state.open_sessions.saturating_sub(1);
        Ok(())
    }
}
