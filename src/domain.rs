use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::IngestError;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const COMPRESSED_EXT: &str = "gz";
pub const DECOMPRESSED_EXT: &str = "txt";

static ARTIFACT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^pageviews-(\d{8})-(\d{2})0000\.(gz|txt)$").expect("artifact name regex")
});

/// An hour-aligned timestamp; the identity key of every artifact derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HourSlot(NaiveDateTime);

impl HourSlot {
    /// Truncates any instant down to its hour.
    pub fn truncate(instant: NaiveDateTime) -> Self {
        let hour = instant
            .date()
            .and_hms_opt(instant.hour(), 0, 0)
            .unwrap_or(instant);
        Self(hour)
    }

    pub fn new(year: i32, month: u32, day: u32, hour: u32) -> Result<Self, IngestError> {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, 0, 0))
            .map(Self)
            .ok_or_else(|| {
                IngestError::InvalidTimestamp(format!("{year:04}-{month:02}-{day:02} {hour:02}h"))
            })
    }

    pub fn current() -> Self {
        Self::truncate(Utc::now().naive_utc())
    }

    pub fn as_datetime(&self) -> NaiveDateTime {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + Duration::hours(1))
    }

    pub fn previous(&self) -> Self {
        Self(self.0 - Duration::hours(1))
    }

    /// `pageviews-YYYYMMDD-HH0000`, shared by the compressed and decompressed names.
    pub fn file_stem(&self) -> String {
        format!("pageviews-{}", self.0.format("%Y%m%d-%H0000"))
    }

    pub fn compressed_file_name(&self) -> String {
        format!("{}.{COMPRESSED_EXT}", self.file_stem())
    }

    pub fn decompressed_file_name(&self) -> String {
        format!("{}.{DECOMPRESSED_EXT}", self.file_stem())
    }

    /// Recovers the slot from an artifact file name such as `pageviews-20250501-100000.txt`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let captures = ARTIFACT_NAME.captures(name)?;
        let date = NaiveDate::parse_from_str(&captures[1], "%Y%m%d").ok()?;
        let hour = captures[2].parse::<u32>().ok()?;
        date.and_hms_opt(hour, 0, 0).map(Self)
    }

    /// Compact tag used for scheduler run keys, e.g. `20250501_100000`.
    pub fn run_tag(&self) -> String {
        self.0.format("%Y%m%d_%H%M%S").to_string()
    }
}

impl From<NaiveDateTime> for HourSlot {
    fn from(value: NaiveDateTime) -> Self {
        Self::truncate(value)
    }
}

impl fmt::Display for HourSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl FromStr for HourSlot {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_instant(value).map(Self::truncate)
    }
}

impl Serialize for HourSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parses `YYYY-MM-DD HH:MM:SS`, its `T`-separated form, or RFC 3339 (normalized to UTC).
pub fn parse_instant(value: &str) -> Result<NaiveDateTime, IngestError> {
    let trimmed = value.trim();
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT) {
        return Ok(parsed);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Ok(parsed);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|parsed| parsed.naive_utc())
        .map_err(|_| IngestError::InvalidTimestamp(value.to_string()))
}

/// Upstream identity of one hour of data. Never persisted, always recomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifact {
    pub url: String,
    pub compressed_file_name: String,
    pub decompressed_file_name: String,
}

impl RemoteArtifact {
    pub fn for_slot(slot: HourSlot, base_url: &str) -> Self {
        let at = slot.as_datetime();
        let compressed_file_name = slot.compressed_file_name();
        let url = format!(
            "{}/{year}/{year}-{month:02}/{compressed_file_name}",
            base_url.trim_end_matches('/'),
            year = at.year(),
            month = at.month(),
        );
        Self {
            url,
            compressed_file_name,
            decompressed_file_name: slot.decompressed_file_name(),
        }
    }
}

/// Local progress of one slot, inferred purely from which files exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    NotDownloaded,
    CompressedOnly,
    Decompressed,
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactState::NotDownloaded => write!(f, "not_downloaded"),
            ArtifactState::CompressedOnly => write!(f, "compressed_only"),
            ArtifactState::Decompressed => write!(f, "decompressed"),
        }
    }
}

/// One row of the raw pageviews table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRecord {
    pub project_code: Option<String>,
    pub page_title: Option<String>,
    pub view_count: Option<i64>,
    pub byte_size: Option<i64>,
    pub file_name: String,
    pub load_timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn at(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).unwrap()
    }

    #[test]
    fn truncates_to_hour() {
        let slot = HourSlot::truncate(at("2025-05-01 10:42:17"));
        assert_eq!(slot.to_string(), "2025-05-01 10:00:00");
    }

    #[test]
    fn artifact_names_and_url() {
        let slot = HourSlot::new(2025, 5, 1, 10).unwrap();
        let artifact =
            RemoteArtifact::for_slot(slot, "https://dumps.wikimedia.org/other/pageviews/");
        assert_eq!(artifact.compressed_file_name, "pageviews-20250501-100000.gz");
        assert_eq!(
            artifact.decompressed_file_name,
            "pageviews-20250501-100000.txt"
        );
        assert_eq!(
            artifact.url,
            "https://dumps.wikimedia.org/other/pageviews/2025/2025-05/pageviews-20250501-100000.gz"
        );
    }

    #[test]
    fn slot_from_file_name() {
        let slot = HourSlot::from_file_name("pageviews-20250501-230000.txt").unwrap();
        assert_eq!(slot, HourSlot::new(2025, 5, 1, 23).unwrap());
        assert!(HourSlot::from_file_name("pageviews-20250501-231500.txt").is_none());
        assert!(HourSlot::from_file_name("notes.txt").is_none());
    }

    #[test]
    fn parses_supported_formats() {
        let plain: HourSlot = "2025-05-01 10:30:00".parse().unwrap();
        let rfc: HourSlot = "2025-05-01T12:30:00+02:00".parse().unwrap();
        assert_eq!(plain, rfc);
        assert_matches!(
            "yesterday".parse::<HourSlot>(),
            Err(IngestError::InvalidTimestamp(_))
        );
    }

    #[test]
    fn rejects_out_of_range_components() {
        assert_matches!(
            HourSlot::new(2025, 2, 30, 1),
            Err(IngestError::InvalidTimestamp(_))
        );
    }
}
