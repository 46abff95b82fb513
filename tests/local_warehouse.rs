use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::sync::Arc;

use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::GzEncoder;
use wiki_pageviews::config::{ConfigFile, ConfigLoader};
use wiki_pageviews::domain::{HourSlot, LoadRecord, parse_instant};
use wiki_pageviews::error::IngestError;
use wiki_pageviews::source::PageviewSource;
use wiki_pageviews::warehouse::{LocalWarehouse, ObjectRef};
use wiki_pageviews::window::TimeSelection;
use wiki_pageviews::workflow::Workflow;

struct OneHour(Arc<Vec<u8>>);

impl PageviewSource for OneHour {
    fn download(&self, _url: &str, destination: &mut dyn Write) -> Result<u64, IngestError> {
        destination
            .write_all(&self.0)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Ok(self.0.len() as u64)
    }

    fn probe(&self, _url: &str) -> Result<bool, IngestError> {
        Ok(true)
    }
}

#[test]
fn workflow_appends_rows_to_table_file() {
    let data = tempfile::tempdir().unwrap();
    let warehouse_dir = tempfile::tempdir().unwrap();
    let warehouse_root = Utf8PathBuf::from_path_buf(warehouse_dir.path().to_path_buf()).unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(b"en Main_Page 42 0\nen.m Rust_(programming_language) 9 0\n")
        .unwrap();
    let payload = Arc::new(encoder.finish().unwrap());

    let env = HashMap::from([
        (
            "LOCAL_DATA_DIR".to_string(),
            data.path().to_str().unwrap().to_string(),
        ),
        ("SNOWFLAKE_ACCOUNT".to_string(), "local".to_string()),
        ("SNOWFLAKE_USER".to_string(), "loader".to_string()),
        ("SNOWFLAKE_PASSWORD".to_string(), "secret".to_string()),
        ("SNOWFLAKE_WAREHOUSE".to_string(), "COMPUTE_WH".to_string()),
        ("SNOWFLAKE_DATABASE".to_string(), "ANALYTICS".to_string()),
    ]);
    let settings = ConfigLoader::resolve(ConfigFile::default(), &env).unwrap();
    let warehouse = LocalWarehouse::new(warehouse_root.clone());
    let workflow = Workflow::new(settings, OneHour(payload), warehouse);

    let report = workflow
        .run(TimeSelection::SingleHour(
            parse_instant("2025-05-01 10:00:00").unwrap(),
        ))
        .unwrap();
    assert_eq!(report.rows_loaded, 2);

    let table = LocalWarehouse::new(warehouse_root)
        .table_path("ANALYTICS", &ObjectRef::new("WIKIPEDIA", "RAW_WIKIPEDIA_PAGEVIEWS"));
    let rows = fs::read_to_string(table)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str::<LoadRecord>(line).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].page_title.as_deref(), Some("Rust_(programming_language)"));
    assert_eq!(
        rows[1].file_name,
        HourSlot::new(2025, 5, 1, 10).unwrap().decompressed_file_name()
    );
}
