//! Catalog browsing state: query/filter parameters, pagination cursor and the
//! accumulated result list.
//!
//! `CatalogPager` owns the remote-query parameters and drives fetches on
//! worker threads. Staleness is handled with a generation token: every
//! refresh bumps the token, and a fetch result is applied only if the token
//! it was issued under is still current. Timer/thread cancellation is never
//! relied upon; discard-on-resolve is the load-bearing mechanism.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::services::{CatalogPage, CatalogService};

/// A downloadable script in the remote marketplace catalog.
///
/// Immutable once fetched; a later fetch of the same id may carry newer
/// fields. Callers must key on `id`, never on object identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
    pub author_name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Price in cents; zero means free
    #[serde(default)]
    pub price_cents: u32,
    #[serde(default)]
    pub category: String,
}

impl CatalogItem {
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    Popularity,
    Newest,
    Title,
    Price,
}

impl SortKey {
    pub fn as_wire(&self) -> &'static str {
        match self {
            SortKey::Popularity => "popularity",
            SortKey::Newest => "newest",
            SortKey::Title => "title",
            SortKey::Price => "price",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_wire(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

/// Remote-query parameters for one catalog fetch.
///
/// `page_offset` is monotonically non-decreasing within one filter session;
/// any change to text, category or sort resets it to 0.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogQuery {
    pub text: Option<String>,
    pub category: Option<String>,
    pub sort_key: SortKey,
    pub sort_direction: SortDirection,
    pub page_offset: usize,
    pub page_size: usize,
}

impl CatalogQuery {
    pub fn new(page_size: usize) -> Self {
        CatalogQuery {
            text: None,
            category: None,
            sort_key: SortKey::Popularity,
            sort_direction: SortDirection::Descending,
            page_offset: 0,
            page_size,
        }
    }
}

/// Pager lifecycle: `Idle → Loading → {Loaded, Error}` and
/// `Loaded → LoadingMore → {Loaded, Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerPhase {
    Idle,
    Loading,
    Loaded,
    LoadingMore,
    Error,
}

impl PagerPhase {
    pub fn is_fetching(&self) -> bool {
        matches!(self, PagerPhase::Loading | PagerPhase::LoadingMore)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Refresh,
    LoadMore,
}

struct PagerState {
    query: CatalogQuery,
    items: Vec<CatalogItem>,
    phase: PagerPhase,
    has_more: bool,
    error: Option<String>,
    categories: Option<Vec<String>>,
    // Guarded by the same mutex as the phase so a generation transition and
    // its phase transition are atomic relative to concurrent operations
    generation: u64,
    revision: u64,
}

impl PagerState {
    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

/// Point-in-time view of the pager for rendering or polling.
#[derive(Debug, Clone)]
pub struct PagerSnapshot {
    pub phase: PagerPhase,
    pub items: Vec<CatalogItem>,
    pub query: CatalogQuery,
    pub has_more: bool,
    pub error: Option<String>,
    pub categories: Option<Vec<String>>,
}

/// Owns catalog browsing state and issues fetches against the catalog
/// service. All mutations go through one internal mutex; background fetch
/// results are discarded when their generation token is stale. Clones share
/// the same state, so a clone can be handed to a worker thread cheaply.
#[derive(Clone)]
pub struct CatalogPager {
    service: Arc<dyn CatalogService>,
    state: Arc<Mutex<PagerState>>,
}

impl CatalogPager {
    pub fn new(service: Arc<dyn CatalogService>, page_size: usize) -> Self {
        CatalogPager {
            service,
            state: Arc::new(Mutex::new(PagerState {
                query: CatalogQuery::new(page_size),
                items: Vec::new(),
                phase: PagerPhase::Idle,
                has_more: false,
                error: None,
                categories: None,
                generation: 0,
                revision: 0,
            })),
        }
    }

    /// Monotonically increasing counter, bumped on every observable change.
    /// Cheap to poll each frame.
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    pub fn snapshot(&self) -> PagerSnapshot {
        let state = self.state.lock();
        PagerSnapshot {
            phase: state.phase,
            items: state.items.clone(),
            query: state.query.clone(),
            has_more: state.has_more,
            error: state.error.clone(),
            categories: state.categories.clone(),
        }
    }

    /// Clear accumulated results, reset the cursor to 0 and fetch the first
    /// page. Any in-flight fetch becomes stale and its result is discarded.
    pub fn refresh(&self) {
        let (generation, query) = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.items.clear();
            state.query.page_offset = 0;
            state.phase = PagerPhase::Loading;
            state.error = None;
            state.has_more = false;
            state.touch();
            (state.generation, state.query.clone())
        };
        debug!(generation, "Refreshing catalog");
        self.spawn_fetch(generation, query, FetchKind::Refresh);
    }

    /// Fetch the next page. Silent no-op while a fetch is in flight, before
    /// the first load, or when the server reported no more data.
    pub fn load_more(&self) {
        let (generation, query) = {
            let mut state = self.state.lock();
            if state.phase != PagerPhase::Loaded || !state.has_more {
                debug!(phase = ?state.phase, has_more = state.has_more, "load_more ignored");
                return;
            }
            state.phase = PagerPhase::LoadingMore;
            state.touch();
            (state.generation, state.query.clone())
        };
        self.spawn_fetch(generation, query, FetchKind::LoadMore);
    }

    /// Change the free-text query and refresh. `None` clears the filter.
    pub fn set_search_text(&self, text: Option<String>) {
        {
            let mut state = self.state.lock();
            state.query.text = text.filter(|t| !t.is_empty());
        }
        self.refresh();
    }

    /// Change the category filter and refresh.
    pub fn set_category(&self, category: Option<String>) {
        {
            let mut state = self.state.lock();
            state.query.category = category;
        }
        self.refresh();
    }

    /// Change the sort order and refresh.
    pub fn set_sort(&self, sort_key: SortKey, sort_direction: SortDirection) {
        {
            let mut state = self.state.lock();
            state.query.sort_key = sort_key;
            state.query.sort_direction = sort_direction;
        }
        self.refresh();
    }

    /// Fetch the category list once on demand; failures are logged and leave
    /// the cached value untouched.
    pub fn load_categories(&self) {
        if self.state.lock().categories.is_some() {
            return;
        }
        let pager = self.clone();
        thread::spawn(move || match pager.service.list_categories() {
            Ok(categories) => {
                let mut state = pager.state.lock();
                state.categories = Some(categories);
                state.touch();
            }
            Err(e) => {
                warn!(error = %e, "Failed to load catalog categories");
            }
        });
    }

    fn spawn_fetch(&self, generation: u64, query: CatalogQuery, kind: FetchKind) {
        let pager = self.clone();
        thread::spawn(move || {
            let result = pager.service.search(&query);
            pager.apply_fetch(generation, result, kind);
        });
    }

    fn apply_fetch(&self, generation: u64, result: Result<CatalogPage>, kind: FetchKind) {
        let mut state = self.state.lock();
        // Stale fetch: a newer refresh superseded this one while it was in
        // flight. Drop the result silently.
        if state.generation != generation {
            debug!(generation, "Discarding stale catalog fetch");
            return;
        }
        match result {
            Ok(page) => {
                let fetched = page.items.len();
                match kind {
                    FetchKind::Refresh => state.items = page.items,
                    FetchKind::LoadMore => state.items.extend(page.items),
                }
                state.query.page_offset += fetched;
                state.has_more = page.has_more;
                state.phase = PagerPhase::Loaded;
                state.error = None;
                info!(
                    fetched,
                    total = state.items.len(),
                    has_more = state.has_more,
                    "Catalog page loaded"
                );
            }
            Err(e) => {
                // Items are left as-is: a failed load-more keeps what was
                // already loaded, a failed refresh already cleared them, so
                // the error is its sole content.
                state.phase = PagerPhase::Error;
                state.error = Some(e.user_message());
                warn!(error = %e, kind = ?kind, "Catalog fetch failed");
            }
        }
        state.touch();
    }
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod catalog_tests;
