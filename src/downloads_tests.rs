use super::*;
use crate::error::MarketError;
use crate::history::JsonHistoryStore;
use crate::library::SqliteScriptStore;
use crate::services::LintReport;
use std::sync::atomic::AtomicUsize;
use std::sync::mpsc::channel;
use std::time::Duration;

type FetchFn = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Content service driven by a closure; counts source fetches.
struct FnContent {
    fetch_fn: FetchFn,
    fetch_calls: AtomicUsize,
}

impl FnContent {
    fn new(fetch_fn: FetchFn) -> Arc<Self> {
        Arc::new(FnContent {
            fetch_fn,
            fetch_calls: AtomicUsize::new(0),
        })
    }

    fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

impl ContentService for FnContent {
    fn fetch_source(&self, catalog_item_id: &str) -> Result<String> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        (self.fetch_fn)(catalog_item_id)
    }

    fn lint(&self, _source: &str) -> Result<LintReport> {
        Ok(LintReport {
            ok: true,
            errors: vec![],
        })
    }

    fn check_username_available(&self, _username: &str) -> Result<bool> {
        Ok(true)
    }
}

/// History store whose appends always fail, for rollback tests.
struct FailingHistory;

impl DownloadHistoryStore for FailingHistory {
    fn list(&self) -> Result<Vec<DownloadRecord>> {
        Ok(vec![])
    }

    fn append(&self, _record: &DownloadRecord) -> Result<()> {
        Err(MarketError::store("disk full"))
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    scripts: Arc<SqliteScriptStore>,
    history: Arc<JsonHistoryStore>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let scripts = Arc::new(SqliteScriptStore::open(&dir.path().join("scripts.sqlite")).unwrap());
    let history = Arc::new(JsonHistoryStore::with_path(dir.path().join("history.json")));
    Fixture {
        _dir: dir,
        scripts,
        history,
    }
}

fn item(id: &str) -> CatalogItem {
    CatalogItem {
        id: id.to_string(),
        title: format!("Script {}", id),
        author_name: "zac".to_string(),
        version: Some("1.0.0".to_string()),
        price_cents: 0,
        category: "ai".to_string(),
    }
}

#[test]
fn successful_download_commits_script_and_record_together() {
    let fx = fixture();
    let content = FnContent::new(Box::new(|id| Ok(format!("// source for {}", id))));
    let manager = DownloadManager::new(content.clone(), fx.scripts.clone(), fx.history.clone());

    let local_script_id = match manager.download(&item("x1")).unwrap() {
        DownloadOutcome::Completed { local_script_id } => local_script_id,
        other => panic!("expected completion, got {:?}", other),
    };

    // The local script carries marketplace provenance
    let script = fx.scripts.get(&local_script_id).unwrap().unwrap();
    assert_eq!(script.title, "Script x1");
    assert_eq!(script.metadata.marketplace_id.as_deref(), Some("x1"));
    assert_eq!(script.source, "// source for x1");

    // The history record links catalog id to local script id
    let records = fx.history.list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].catalog_item_id, "x1");
    assert_eq!(records[0].local_script_id, local_script_id);

    // Downloaded-ness is derived from history on reload
    let fresh = DownloadManager::new(content, fx.scripts.clone(), fx.history.clone());
    assert!(fresh.is_downloaded("x1"));
    assert!(!fresh.is_downloading("x1"));
}

#[test]
fn duplicate_concurrent_download_is_a_noop() {
    let fx = fixture();
    let (started_tx, started_rx) = channel::<()>();
    let (release_tx, release_rx) = channel::<()>();
    let release_rx = parking_lot::Mutex::new(release_rx);
    let content = FnContent::new(Box::new(move |id| {
        started_tx.send(()).unwrap();
        release_rx.lock().recv().unwrap();
        Ok(format!("// source for {}", id))
    }));
    let manager = DownloadManager::new(content.clone(), fx.scripts.clone(), fx.history.clone());

    let background = {
        let manager = manager.clone();
        thread::spawn(move || manager.download(&item("x1")))
    };
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first download should start");
    assert!(manager.is_downloading("x1"));

    // Second tap while the first is still fetching: silent no-op
    let second = manager.download(&item("x1")).unwrap();
    assert_eq!(second, DownloadOutcome::AlreadyInProgress);

    release_tx.send(()).unwrap();
    let first = background.join().unwrap().unwrap();
    assert!(matches!(first, DownloadOutcome::Completed { .. }));

    assert_eq!(content.fetch_count(), 1);
    assert_eq!(fx.history.list().unwrap().len(), 1);
    assert!(!manager.is_downloading("x1"));
}

#[test]
fn fetch_failure_commits_nothing_and_clears_in_flight() {
    let fx = fixture();
    let content = FnContent::new(Box::new(|_| Err(MarketError::network("connection reset"))));
    let manager = DownloadManager::new(content, fx.scripts.clone(), fx.history.clone());

    let err = manager.download(&item("x1")).expect_err("fetch fails");
    assert!(matches!(err, MarketError::NetworkUnavailable { .. }));

    assert!(fx.scripts.list().unwrap().is_empty());
    assert!(fx.history.list().unwrap().is_empty());
    assert!(!manager.is_downloading("x1"));
    assert!(!manager.is_downloaded("x1"));
}

#[test]
fn history_append_failure_rolls_back_the_script() {
    let fx = fixture();
    let content = FnContent::new(Box::new(|id| Ok(format!("// source for {}", id))));
    let manager = DownloadManager::new(content, fx.scripts.clone(), Arc::new(FailingHistory));

    let err = manager.download(&item("x1")).expect_err("append fails");
    assert!(matches!(err, MarketError::Store { .. }));

    // No partial commit: the created script row was rolled back
    assert!(fx.scripts.list().unwrap().is_empty());
    assert!(!manager.is_downloading("x1"));
    assert!(!manager.is_downloaded("x1"));
}

#[test]
fn panic_during_fetch_still_clears_in_flight() {
    let fx = fixture();
    let content = FnContent::new(Box::new(|_| panic!("fetch exploded")));
    let manager = DownloadManager::new(content, fx.scripts.clone(), fx.history.clone());
    let before = manager.revision();

    let result = {
        let manager = manager.clone();
        thread::spawn(move || manager.download(&item("x1"))).join()
    };
    assert!(result.is_err(), "download thread should have panicked");

    assert!(!manager.is_downloading("x1"));
    assert!(manager.downloading_ids().is_empty());
    // The unwind path must still be revision-observable, or a poller would
    // show a stale "downloading" badge forever
    assert!(manager.revision() > before);
}

#[test]
fn redownload_produces_second_script_and_record() {
    let fx = fixture();
    let content = FnContent::new(Box::new(|id| Ok(format!("// source for {}", id))));
    let manager = DownloadManager::new(content, fx.scripts.clone(), fx.history.clone());

    manager.download(&item("x1")).unwrap();
    assert!(manager.is_downloaded("x1"));
    // Permissive: a second download of the same id is not blocked
    manager.download(&item("x1")).unwrap();

    assert_eq!(fx.scripts.list().unwrap().len(), 2);
    assert_eq!(fx.history.list().unwrap().len(), 2);
}

#[test]
fn downloads_for_different_ids_run_concurrently() {
    let fx = fixture();
    let (started_tx, started_rx) = channel::<()>();
    let (release_tx, release_rx) = channel::<()>();
    let release_rx = parking_lot::Mutex::new(release_rx);
    let content = FnContent::new(Box::new(move |id| {
        if id == "slow" {
            started_tx.send(()).unwrap();
            release_rx.lock().recv().unwrap();
        }
        Ok(format!("// source for {}", id))
    }));
    let manager = DownloadManager::new(content.clone(), fx.scripts.clone(), fx.history.clone());

    let slow = {
        let manager = manager.clone();
        thread::spawn(move || manager.download(&item("slow")))
    };
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("slow download should start");

    // A different id is not blocked by the in-flight slow one
    let fast = manager.download(&item("fast")).unwrap();
    assert!(matches!(fast, DownloadOutcome::Completed { .. }));

    release_tx.send(()).unwrap();
    slow.join().unwrap().unwrap();

    assert_eq!(fx.history.list().unwrap().len(), 2);
    assert!(manager.is_downloaded("slow"));
    assert!(manager.is_downloaded("fast"));
}

#[test]
fn background_download_is_observable_via_revision_polling() {
    let fx = fixture();
    let content = FnContent::new(Box::new(|id| Ok(format!("// source for {}", id))));
    let manager = DownloadManager::new(content, fx.scripts.clone(), fx.history.clone());

    let before = manager.revision();
    manager.download_in_background(item("x1"));

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !manager.is_downloaded("x1") {
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting for background download"
        );
        thread::sleep(Duration::from_millis(5));
    }
    assert!(manager.revision() > before);
    assert!(!manager.is_downloading("x1"));
}

#[test]
fn preexisting_history_marks_items_downloaded_on_construction() {
    let fx = fixture();
    fx.history
        .append(&DownloadRecord {
            catalog_item_id: "x9".to_string(),
            title: "Old".to_string(),
            author_name: "zac".to_string(),
            version: None,
            local_script_id: "s9".to_string(),
            downloaded_at: Utc::now(),
        })
        .unwrap();

    let content = FnContent::new(Box::new(|_| Ok(String::new())));
    let manager = DownloadManager::new(content, fx.scripts.clone(), fx.history.clone());
    assert!(manager.is_downloaded("x9"));
    assert!(!manager.is_downloaded("x1"));
}
