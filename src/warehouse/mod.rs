//! The warehouse as this crate consumes it: DDL, stage uploads and COPY loads.
//!
//! The statements are modelled as data and rendered to Snowflake SQL through
//! `Display`; backends either execute the SQL or interpret the model directly.

use std::fmt;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::WarehouseConfig;
use crate::domain::LoadRecord;
use crate::error::IngestError;

pub mod local;
pub mod memory;

pub use local::LocalWarehouse;
pub use memory::MemoryWarehouse;

/// Number of whitespace-delimited fields in a well-formed pageview line.
pub const PAGEVIEW_FIELDS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub schema: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

pub type StageRef = ObjectRef;
pub type TableRef = ObjectRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Varchar,
    Number,
    TimestampNtz,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub default_now: bool,
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let column_type = match self.column_type {
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Number => "NUMBER",
            ColumnType::TimestampNtz => "TIMESTAMP_NTZ",
        };
        write!(f, "{} {column_type}", self.name)?;
        if self.default_now {
            write!(f, " DEFAULT CURRENT_TIMESTAMP()")?;
        }
        Ok(())
    }
}

/// Five data columns plus the server-assigned load timestamp.
pub fn pageview_columns() -> Vec<ColumnDef> {
    let column = |name, column_type| ColumnDef {
        name,
        column_type,
        default_now: false,
    };
    vec![
        column("PROJECT_CODE", ColumnType::Varchar),
        column("PAGE_TITLE", ColumnType::Varchar),
        column("VIEW_COUNT", ColumnType::Number),
        column("BYTE_SIZE", ColumnType::Number),
        column("FILE_NAME", ColumnType::Varchar),
        ColumnDef {
            name: "LOAD_TIMESTAMP",
            column_type: ColumnType::TimestampNtz,
            default_now: true,
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ddl {
    CreateSchema(String),
    CreateStage(StageRef),
    CreateTable {
        table: TableRef,
        columns: Vec<ColumnDef>,
    },
}

impl Ddl {
    /// Human-readable object name for logs and errors, e.g. `stage 'WIKIPEDIA.S'`.
    pub fn object(&self) -> String {
        match self {
            Ddl::CreateSchema(schema) => format!("schema '{schema}'"),
            Ddl::CreateStage(stage) => format!("stage '{stage}'"),
            Ddl::CreateTable { table, .. } => format!("table '{table}'"),
        }
    }
}

impl fmt::Display for Ddl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ddl::CreateSchema(schema) => write!(f, "CREATE SCHEMA IF NOT EXISTS {schema}"),
            Ddl::CreateStage(stage) => write!(f, "CREATE STAGE IF NOT EXISTS {stage}"),
            Ddl::CreateTable { table, columns } => {
                let columns = columns
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "CREATE TABLE IF NOT EXISTS {table} ({columns})")
            }
        }
    }
}

/// Renders the PUT statement for a stage upload.
pub fn put_statement(local_path: &Utf8Path, stage: &StageRef, overwrite: bool) -> String {
    format!(
        "PUT file://{local_path} @{stage} AUTO_COMPRESS=FALSE OVERWRITE={}",
        if overwrite { "TRUE" } else { "FALSE" }
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    Continue,
    AbortStatement,
}

/// A single-file bulk load with the raw pageview file format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    pub table: TableRef,
    pub stage: StageRef,
    pub file_name: String,
    pub delimiter: char,
    pub error_on_column_count_mismatch: bool,
    pub null_if: Vec<String>,
    pub on_error: OnError,
}

impl CopyRequest {
    pub fn pageviews(table: TableRef, stage: StageRef, file_name: impl Into<String>) -> Self {
        Self {
            table,
            stage,
            file_name: file_name.into(),
            delimiter: ' ',
            error_on_column_count_mismatch: false,
            null_if: vec![String::new()],
            on_error: OnError::Continue,
        }
    }
}

impl fmt::Display for CopyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let null_if = self
            .null_if
            .iter()
            .map(|value| format!("'{value}'"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "COPY INTO {table} (PROJECT_CODE, PAGE_TITLE, VIEW_COUNT, BYTE_SIZE, FILE_NAME) \
             FROM (SELECT $1, $2, $3, $4, '{file}' FROM @{stage}/{file}) \
             FILE_FORMAT = (TYPE = CSV FIELD_DELIMITER = '{delimiter}' SKIP_HEADER = 0 \
             ERROR_ON_COLUMN_COUNT_MISMATCH = {mismatch} NULL_IF = ({null_if}) \
             EMPTY_FIELD_AS_NULL = TRUE) ON_ERROR = '{on_error}'",
            table = self.table,
            stage = self.stage,
            file = self.file_name,
            delimiter = self.delimiter,
            mismatch = if self.error_on_column_count_mismatch {
                "TRUE"
            } else {
                "FALSE"
            },
            on_error = match self.on_error {
                OnError::Continue => "CONTINUE",
                OnError::AbortStatement => "ABORT_STATEMENT",
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopySummary {
    pub file_name: String,
    pub rows_loaded: usize,
    pub rows_rejected: usize,
}

/// One open warehouse connection. Used from a single thread only.
pub trait WarehouseSession: Send {
    fn execute(&mut self, ddl: &Ddl) -> Result<(), IngestError>;
    fn put(
        &mut self,
        local_path: &Utf8Path,
        stage: &StageRef,
        overwrite: bool,
    ) -> Result<(), IngestError>;
    fn copy_into(&mut self, request: &CopyRequest) -> Result<CopySummary, IngestError>;
    fn close(&mut self) -> Result<(), IngestError>;
}

pub trait Connector {
    fn connect(&self, config: &WarehouseConfig) -> Result<Box<dyn WarehouseSession>, IngestError>;
}

/// COPY semantics for the raw pageview format.
///
/// Rows whose field count differs from [`PAGEVIEW_FIELDS`] or whose numeric
/// fields do not coerce are rejected (with `OnError::Continue`) or fail the
/// whole load (with `OnError::AbortStatement`). Fields matching `null_if` become `None`.
pub fn parse_copy_rows(
    content: &str,
    request: &CopyRequest,
    loaded_at: DateTime<Utc>,
) -> Result<(Vec<LoadRecord>, usize), IngestError> {
    let mut records = Vec::new();
    let mut rejected = 0usize;

    for (index, line) in content.lines().enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        match parse_row(line, request, loaded_at) {
            Some(record) => records.push(record),
            None if request.on_error == OnError::Continue => rejected += 1,
            None => {
                return Err(IngestError::Load {
                    file: request.file_name.clone(),
                    message: format!("malformed row at line {}", index + 1),
                });
            }
        }
    }
    Ok((records, rejected))
}

fn parse_row(line: &str, request: &CopyRequest, loaded_at: DateTime<Utc>) -> Option<LoadRecord> {
    let fields = line.split(request.delimiter).collect::<Vec<_>>();
    if fields.len() != PAGEVIEW_FIELDS {
        return None;
    }
    let text = |value: &str| {
        if request.null_if.iter().any(|null| null == value) {
            None
        } else {
            Some(value.to_string())
        }
    };
    let number = |value: &str| -> Result<Option<i64>, ()> {
        match text(value) {
            None => Ok(None),
            Some(raw) => raw.parse::<i64>().map(Some).map_err(|_| ()),
        }
    };

    Some(LoadRecord {
        project_code: text(fields[0]),
        page_title: text(fields[1]),
        view_count: number(fields[2]).ok()?,
        byte_size: number(fields[3]).ok()?,
        file_name: request.file_name.clone(),
        load_timestamp: loaded_at,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn request() -> CopyRequest {
        CopyRequest::pageviews(
            ObjectRef::new("WIKIPEDIA", "RAW_WIKIPEDIA_PAGEVIEWS"),
            ObjectRef::new("WIKIPEDIA", "WIKIPEDIA_PAGEVIEWS_STAGE"),
            "pageviews-20250501-100000.txt",
        )
    }

    #[test]
    fn drops_rows_with_wrong_field_count() {
        let content = "en Main_Page 42 0\nde Berlin 7\nfr Paris 3 0 extra\nen.m Rust 9 1024\n";
        let (records, rejected) = parse_copy_rows(content, &request(), Utc::now()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(rejected, 2);
        assert_eq!(records[1].project_code.as_deref(), Some("en.m"));
        assert_eq!(records[1].byte_size, Some(1024));
        assert!(
            records
                .iter()
                .all(|record| record.file_name == "pageviews-20250501-100000.txt")
        );
    }

    #[test]
    fn empty_fields_become_null() {
        let (records, rejected) = parse_copy_rows("en  5 \n", &request(), Utc::now()).unwrap();
        assert_eq!(rejected, 0);
        assert_eq!(records[0].page_title, None);
        assert_eq!(records[0].view_count, Some(5));
        assert_eq!(records[0].byte_size, None);
    }

    #[test]
    fn non_numeric_count_is_rejected() {
        let (records, rejected) =
            parse_copy_rows("en Main_Page lots 0\n", &request(), Utc::now()).unwrap();
        assert!(records.is_empty());
        assert_eq!(rejected, 1);
    }

    #[test]
    fn abort_mode_fails_whole_load() {
        let mut request = request();
        request.on_error = OnError::AbortStatement;
        let err = parse_copy_rows("en Main_Page 1 0\nbroken\n", &request, Utc::now()).unwrap_err();
        assert_matches!(err, IngestError::Load { .. });
    }

    #[test]
    fn renders_statements() {
        let stage = ObjectRef::new("WIKIPEDIA", "STAGE");
        assert_eq!(
            Ddl::CreateStage(stage.clone()).to_string(),
            "CREATE STAGE IF NOT EXISTS WIKIPEDIA.STAGE"
        );
        let table = Ddl::CreateTable {
            table: ObjectRef::new("WIKIPEDIA", "RAW"),
            columns: pageview_columns(),
        }
        .to_string();
        assert!(table.starts_with("CREATE TABLE IF NOT EXISTS WIKIPEDIA.RAW (PROJECT_CODE VARCHAR"));
        assert!(table.ends_with("LOAD_TIMESTAMP TIMESTAMP_NTZ DEFAULT CURRENT_TIMESTAMP())"));

        let copy = request().to_string();
        assert!(copy.contains("'pageviews-20250501-100000.txt' FROM @WIKIPEDIA.WIKIPEDIA_PAGEVIEWS_STAGE/pageviews-20250501-100000.txt"));
        assert!(copy.contains("ON_ERROR = 'CONTINUE'"));

        let put = put_statement(Utf8Path::new("/data/a.txt"), &stage, true);
        assert_eq!(
            put,
            "PUT file:///data/a.txt @WIKIPEDIA.STAGE AUTO_COMPRESS=FALSE OVERWRITE=TRUE"
        );
    }
}
