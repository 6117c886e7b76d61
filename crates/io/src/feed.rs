// JSON feed import (circuit records, WAN telemetry)

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use circuitmap_recon::{CircuitRecord, ReconError, WanObservation};

#[derive(Debug)]
pub enum FeedError {
    Io(String),
    /// The document itself is unreadable or not a top-level array.
    Parse(String),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "feed read error: {msg}"),
            Self::Parse(msg) => write!(f, "feed parse error: {msg}"),
        }
    }
}

impl std::error::Error for FeedError {}

/// A record dropped at the boundary, by position in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct FeedLoad<T> {
    pub records: Vec<T>,
    pub skipped: Vec<SkippedRecord>,
}

trait FeedRecord: DeserializeOwned {
    const KIND: &'static str;
    fn check(&self) -> Result<(), ReconError>;
}

impl FeedRecord for CircuitRecord {
    const KIND: &'static str = "circuit";
    fn check(&self) -> Result<(), ReconError> {
        self.validate()
    }
}

impl FeedRecord for WanObservation {
    const KIND: &'static str = "observation";
    fn check(&self) -> Result<(), ReconError> {
        self.validate()
    }
}

fn load_records<T: FeedRecord>(doc: Value) -> Result<FeedLoad<T>, FeedError> {
    let Value::Array(items) = doc else {
        return Err(FeedError::Parse(format!("expected a JSON array of {} records", T::KIND)));
    };

    let mut load = FeedLoad { records: Vec::with_capacity(items.len()), skipped: Vec::new() };
    for (index, item) in items.into_iter().enumerate() {
        let outcome = serde_json::from_value::<T>(item)
            .map_err(|e| e.to_string())
            .and_then(|record| record.check().map(|_| record).map_err(|e| e.to_string()));
        match outcome {
            Ok(record) => load.records.push(record),
            Err(reason) => {
                log::warn!("skipping {} record #{index}: {reason}", T::KIND);
                load.skipped.push(SkippedRecord { index, reason });
            }
        }
    }
    Ok(load)
}

fn parse_feed<T: FeedRecord>(text: &str) -> Result<FeedLoad<T>, FeedError> {
    let doc: Value = serde_json::from_str(text).map_err(|e| FeedError::Parse(e.to_string()))?;
    load_records(doc)
}

fn read_feed<T: FeedRecord>(path: &Path) -> Result<FeedLoad<T>, FeedError> {
    let file = File::open(path).map_err(|e| FeedError::Io(format!("{}: {e}", path.display())))?;
    let doc: Value = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| FeedError::Parse(format!("{}: {e}", path.display())))?;
    load_records(doc)
}

pub fn parse_circuits(text: &str) -> Result<FeedLoad<CircuitRecord>, FeedError> {
    parse_feed(text)
}

pub fn parse_observations(text: &str) -> Result<FeedLoad<WanObservation>, FeedError> {
    parse_feed(text)
}

pub fn read_circuits(path: &Path) -> Result<FeedLoad<CircuitRecord>, FeedError> {
    read_feed(path)
}

pub fn read_observations(path: &Path) -> Result<FeedLoad<WanObservation>, FeedError> {
    read_feed(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use circuitmap_recon::model::InterfaceId;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
    }

    #[test]
    fn fixture_circuits_load_with_skips() {
        let load = read_circuits(&fixtures_dir().join("circuits_mixed.json")).unwrap();
        let ids: Vec<_> = load.records.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["DSR-1001", "MAN-4002"]);
        assert_eq!(load.skipped.len(), 3);
        assert_eq!(load.skipped.iter().map(|s| s.index).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(load.skipped[2].reason.contains("not an IPv4 address"), "{}", load.skipped[2].reason);
        assert!(load.records[1].manual_override);
    }

    #[test]
    fn fixture_observations_load() {
        let load = read_observations(&fixtures_dir().join("telemetry_mixed.json")).unwrap();
        assert_eq!(load.records.len(), 2);
        assert_eq!(load.records[1].interface, InterfaceId::Wan2);
        assert_eq!(load.records[1].observed_ip, None);
        assert_eq!(load.skipped.len(), 1);
        assert_eq!(load.skipped[0].index, 1);
    }

    #[test]
    fn non_array_document_is_rejected() {
        assert!(matches!(parse_circuits(r#"{"id": "x"}"#), Err(FeedError::Parse(_))));
        assert!(matches!(parse_observations("not json"), Err(FeedError::Parse(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_circuits(Path::new("/nonexistent/circuits.json")).unwrap_err();
        assert!(matches!(err, FeedError::Io(_)));
    }

    #[test]
    fn empty_array_is_empty_load() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[]").unwrap();
        let load = read_observations(file.path()).unwrap();
        assert!(load.records.is_empty());
        assert!(load.skipped.is_empty());
    }
}
