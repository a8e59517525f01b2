//! Persistent download history.
//!
//! One `DownloadRecord` exists per successful download; the set of recorded
//! catalog ids is the sole source of truth for "already downloaded". Records
//! are append-only here; deletion happens elsewhere, if at all.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::downloads::DownloadRecord;
use crate::error::Result;

/// Boundary contract for the persistent download-history store.
pub trait DownloadHistoryStore: Send + Sync {
    fn list(&self) -> Result<Vec<DownloadRecord>>;
    fn append(&self, record: &DownloadRecord) -> Result<()>;
}

/// Raw data format for JSON serialization (owned, for deserialization)
#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryData {
    records: Vec<DownloadRecord>,
}

/// Raw data format for JSON serialization (borrowed, for serialization without cloning)
#[derive(Serialize)]
struct HistoryDataRef<'a> {
    records: &'a [DownloadRecord],
}

/// JSON-file-backed history store
/// (~/.scriptkit/db/download-history.json by default).
pub struct JsonHistoryStore {
    file_path: PathBuf,
    records: Mutex<Vec<DownloadRecord>>,
}

impl JsonHistoryStore {
    /// Default path (~/.scriptkit/db/download-history.json)
    pub fn default_path() -> PathBuf {
        PathBuf::from(shellexpand::tilde("~/.scriptkit").as_ref())
            .join("db")
            .join("download-history.json")
    }

    pub fn new() -> Self {
        Self::with_path(Self::default_path())
    }

    pub fn with_path(file_path: PathBuf) -> Self {
        let records = Self::load(&file_path);
        info!(
            path = %file_path.display(),
            count = records.len(),
            "Download history loaded"
        );
        JsonHistoryStore {
            file_path,
            records: Mutex::new(records),
        }
    }

    /// A missing file is an empty history; a malformed file degrades to an
    /// empty history with a warning rather than an error.
    fn load(path: &Path) -> Vec<DownloadRecord> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<HistoryData>(&contents) {
            Ok(data) => data.records,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Malformed download history, starting empty");
                Vec::new()
            }
        }
    }

    /// Write the full document to a temp file, then rename over the target.
    fn save(&self, records: &[DownloadRecord]) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&HistoryDataRef { records })?;
        let tmp_path = self.file_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.file_path)?;
        debug!(count = records.len(), "Download history saved");
        Ok(())
    }
}

impl Default for JsonHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadHistoryStore for JsonHistoryStore {
    fn list(&self) -> Result<Vec<DownloadRecord>> {
        Ok(self.records.lock().clone())
    }

    fn append(&self, record: &DownloadRecord) -> Result<()> {
        let mut records = self.records.lock();
        records.push(record.clone());
        if let Err(e) = self.save(&records) {
            // Keep memory and disk consistent so a failed append commits nothing
            records.pop();
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(catalog_id: &str, script_id: &str) -> DownloadRecord {
        DownloadRecord {
            catalog_item_id: catalog_id.to_string(),
            title: "Example".to_string(),
            author_name: "zac".to_string(),
            version: Some("1.0.0".to_string()),
            local_script_id: script_id.to_string(),
            downloaded_at: Utc::now(),
        }
    }

    #[test]
    fn append_then_list_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::with_path(dir.path().join("history.json"));
        store.append(&record("x1", "s1")).unwrap();
        store.append(&record("x2", "s2")).unwrap();

        let records = store.list().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].catalog_item_id, "x1");
        assert_eq!(records[1].local_script_id, "s2");
    }

    #[test]
    fn history_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        {
            let store = JsonHistoryStore::with_path(path.clone());
            store.append(&record("x1", "s1")).unwrap();
        }
        let store = JsonHistoryStore::with_path(path);
        let records = store.list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].catalog_item_id, "x1");
    }

    #[test]
    fn malformed_file_degrades_to_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "not json at all").unwrap();
        let store = JsonHistoryStore::with_path(path);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn duplicate_catalog_ids_are_kept_as_distinct_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::with_path(dir.path().join("history.json"));
        store.append(&record("x1", "s1")).unwrap();
        store.append(&record("x1", "s2")).unwrap();
        assert_eq!(store.list().unwrap().len(), 2);
    }
}
