//! Marketplace download manager.
//!
//! Tracks which catalog items are currently downloading (an in-flight set
//! keyed by catalog id) and which are already materialized locally (derived
//! from download-history records, never from the in-flight set). A download
//! commits a `LocalScript` and a `DownloadRecord` together or not at all.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::CatalogItem;
use crate::error::{Result, ResultExt};
use crate::history::DownloadHistoryStore;
use crate::library::{NewScript, ScriptMetadata, ScriptStore};
use crate::services::ContentService;

/// Record of one successful download. Created exactly once per success,
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    pub catalog_item_id: String,
    pub title: String,
    pub author_name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub local_script_id: String,
    pub downloaded_at: DateTime<Utc>,
}

/// Resolution of a `download` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Script and history record were committed.
    Completed { local_script_id: String },
    /// The id was already downloading; nothing was done. A silent ignore,
    /// not an error.
    AlreadyInProgress,
}

/// Removes the id from the in-flight set on drop, so every exit path --
/// early return, `?`, panic -- clears the "downloading" marker. Both the
/// insert and the removal bump the revision counter, keeping the in-flight
/// set observable through polling on every path.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    revision: Arc<AtomicU64>,
    id: String,
}

impl InFlightGuard {
    fn acquire(
        set: &Arc<Mutex<HashSet<String>>>,
        revision: &Arc<AtomicU64>,
        id: &str,
    ) -> Option<Self> {
        if !set.lock().insert(id.to_string()) {
            return None;
        }
        revision.fetch_add(1, Ordering::SeqCst);
        Some(InFlightGuard {
            set: Arc::clone(set),
            revision: Arc::clone(revision),
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
        self.revision.fetch_add(1, Ordering::SeqCst);
    }
}

/// Coordinates marketplace downloads into the local library. Clones share
/// the same in-flight and downloaded sets, so a clone can be handed to a
/// worker thread cheaply.
#[derive(Clone)]
pub struct DownloadManager {
    content: Arc<dyn ContentService>,
    scripts: Arc<dyn ScriptStore>,
    history: Arc<dyn DownloadHistoryStore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    downloaded: Arc<Mutex<HashSet<String>>>,
    revision: Arc<AtomicU64>,
}

impl DownloadManager {
    pub fn new(
        content: Arc<dyn ContentService>,
        scripts: Arc<dyn ScriptStore>,
        history: Arc<dyn DownloadHistoryStore>,
    ) -> Self {
        let manager = DownloadManager {
            content,
            scripts,
            history,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            downloaded: Arc::new(Mutex::new(HashSet::new())),
            revision: Arc::new(AtomicU64::new(0)),
        };
        manager.reload_history().warn_on_err();
        manager
    }

    /// Monotonically increasing counter, bumped whenever the downloading or
    /// downloaded sets change observably.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    /// Rebuild the downloaded-id set from the history records.
    pub fn reload_history(&self) -> Result<()> {
        let records = self.history.list()?;
        let ids: HashSet<String> = records
            .into_iter()
            .map(|record| record.catalog_item_id)
            .collect();
        debug!(count = ids.len(), "Reloaded download history");
        *self.downloaded.lock() = ids;
        self.bump_revision();
        Ok(())
    }

    /// Whether a catalog id has a download record. Derived from history
    /// only; an in-flight download does not count.
    pub fn is_downloaded(&self, catalog_item_id: &str) -> bool {
        self.downloaded.lock().contains(catalog_item_id)
    }

    pub fn is_downloading(&self, catalog_item_id: &str) -> bool {
        self.in_flight.lock().contains(catalog_item_id)
    }

    pub fn downloading_ids(&self) -> Vec<String> {
        self.in_flight.lock().iter().cloned().collect()
    }

    /// Download a catalog item into the local library.
    ///
    /// Fails fast with `AlreadyInProgress` (a no-op outcome, not an error)
    /// when the id is already downloading. On success both the local script
    /// and the history record exist; on failure neither does. Re-downloading
    /// an already-downloaded id is permitted and produces a second script
    /// and a second record.
    pub fn download(&self, item: &CatalogItem) -> Result<DownloadOutcome> {
        let _guard = match InFlightGuard::acquire(&self.in_flight, &self.revision, &item.id) {
            Some(guard) => guard,
            None => {
                debug!(catalog_item_id = %item.id, "Download already in progress, ignoring");
                return Ok(DownloadOutcome::AlreadyInProgress);
            }
        };
        info!(catalog_item_id = %item.id, title = %item.title, "Starting download");
        self.run_download(item)
    }

    fn run_download(&self, item: &CatalogItem) -> Result<DownloadOutcome> {
        let source = self.content.fetch_source(&item.id)?;
        let downloaded_at = Utc::now();

        let script = self.scripts.create(NewScript {
            title: item.title.clone(),
            source,
            emoji: None,
            metadata: ScriptMetadata {
                marketplace_id: Some(item.id.clone()),
                marketplace_version: item.version.clone(),
                downloaded_at: Some(downloaded_at),
            },
        })?;

        let record = DownloadRecord {
            catalog_item_id: item.id.clone(),
            title: item.title.clone(),
            author_name: item.author_name.clone(),
            version: item.version.clone(),
            local_script_id: script.id.clone(),
            downloaded_at,
        };
        if let Err(e) = self.history.append(&record) {
            // Roll the script back so the commit stays all-or-nothing
            warn!(catalog_item_id = %item.id, error = %e, "History append failed, rolling back script");
            self.scripts.delete(&script.id).warn_on_err();
            return Err(e);
        }

        self.downloaded.lock().insert(item.id.clone());
        self.bump_revision();
        info!(
            catalog_item_id = %item.id,
            local_script_id = %script.id,
            "Download complete"
        );
        Ok(DownloadOutcome::Completed {
            local_script_id: script.id,
        })
    }

    /// Run `download` on a worker thread, logging the outcome. For callers
    /// that poll `revision()` instead of waiting on the result.
    pub fn download_in_background(&self, item: CatalogItem) {
        let manager = self.clone();
        thread::Builder::new()
            .name(format!("download-{}", item.id))
            .spawn(move || {
                manager.download(&item).log_err();
            })
            .log_err();
    }
}

#[cfg(test)]
#[path = "downloads_tests.rs"]
mod downloads_tests;
