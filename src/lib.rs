//! Script Kit Market - marketplace synchronization engine for Script Kit
//!
//! Headless client-side layer that keeps a local library of user-owned
//! scripts consistent with the remote marketplace catalog and the download
//! history, and provides debounced asynchronous validation for user-entered
//! input (username availability, script lint). No UI lives here; front ends
//! poll component snapshots/revisions and render them.

pub mod catalog;
pub mod config;
pub mod downloads;
pub mod error;
pub mod history;
pub mod library;
pub mod logging;
pub mod services;
pub mod validation;

pub use catalog::{
    CatalogItem, CatalogPager, CatalogQuery, PagerPhase, PagerSnapshot, SortDirection, SortKey,
};
pub use config::MarketConfig;
pub use downloads::{DownloadManager, DownloadOutcome, DownloadRecord};
pub use error::{MarketError, Result};
pub use history::{DownloadHistoryStore, JsonHistoryStore};
pub use library::{
    LocalScript, NewScript, ScriptMetadata, ScriptPatch, ScriptStore, SqliteScriptStore,
};
pub use services::{CatalogService, ContentService, HttpMarketClient};
pub use validation::{
    Debouncer, LintStatus, SourceLintValidator, UsernameStatus, UsernameValidator, ValidationState,
};
