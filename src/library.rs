//! Local script library: the persisted, user-owned script records and the
//! store boundary the download flow and editing flows write through.
//!
//! The store is a thin pass-through contract. The sqlite implementation
//! keeps one connection behind a mutex with WAL enabled; ids are uuid v4
//! and live in a different namespace than marketplace catalog ids.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{MarketError, Result};

/// Provenance and auxiliary metadata for a local script. Marketplace fields
/// are set only for scripts materialized by a download.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<DateTime<Utc>>,
}

/// A locally owned script record. The `id` is assigned by the store and is
/// independent of any catalog id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalScript {
    pub id: String,
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub metadata: ScriptMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a new local script; the store assigns id and
/// timestamps.
#[derive(Debug, Clone, Default)]
pub struct NewScript {
    pub title: String,
    pub source: String,
    pub emoji: Option<String>,
    pub metadata: ScriptMetadata,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ScriptPatch {
    pub title: Option<String>,
    pub source: Option<String>,
    pub emoji: Option<String>,
}

/// Boundary contract for the persistent local-script store.
///
/// `create` assigns a fresh unique id; `update` on a missing id is a hard
/// `NotFound` (a stale id is a logic bug, not a transient condition);
/// `delete` is idempotent.
pub trait ScriptStore: Send + Sync {
    fn create(&self, spec: NewScript) -> Result<LocalScript>;
    fn update(&self, id: &str, patch: ScriptPatch) -> Result<()>;
    fn delete(&self, id: &str) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<LocalScript>>;
    fn list(&self) -> Result<Vec<LocalScript>>;
}

/// SQLite-backed script store (~/.scriptkit/db/scripts.sqlite).
pub struct SqliteScriptStore {
    conn: Mutex<Connection>,
}

impl SqliteScriptStore {
    /// Default database path (~/.scriptkit/db/scripts.sqlite)
    pub fn default_path() -> Result<PathBuf> {
        let db_dir = PathBuf::from(shellexpand::tilde("~/.scriptkit").as_ref()).join("db");
        if !db_dir.exists() {
            std::fs::create_dir_all(&db_dir)?;
        }
        Ok(db_dir.join("scripts.sqlite"))
    }

    pub fn open_default() -> Result<Self> {
        Self::open(&Self::default_path()?)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL for concurrent readers; busy_timeout avoids spurious
        // "database is locked" failures when another process holds the file
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout = 5000;",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS scripts (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                source TEXT NOT NULL,
                emoji TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_scripts_updated_at ON scripts(updated_at DESC)",
            [],
        )?;

        info!(path = %path.display(), "Script store opened");
        Ok(SqliteScriptStore {
            conn: Mutex::new(conn),
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MarketError::store(format!("bad timestamp '{}': {}", raw, e)))
}

type ScriptRow = (String, String, String, Option<String>, String, String, String);

fn row_to_script(row: ScriptRow) -> Result<LocalScript> {
    let (id, title, source, emoji, metadata_json, created_at, updated_at) = row;
    let metadata: ScriptMetadata = serde_json::from_str(&metadata_json)?;
    Ok(LocalScript {
        id,
        title,
        source,
        emoji,
        metadata,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

impl ScriptStore for SqliteScriptStore {
    fn create(&self, spec: NewScript) -> Result<LocalScript> {
        let now = Utc::now();
        let script = LocalScript {
            id: Uuid::new_v4().to_string(),
            title: spec.title,
            source: spec.source,
            emoji: spec.emoji,
            metadata: spec.metadata,
            created_at: now,
            updated_at: now,
        };
        let metadata_json = serde_json::to_string(&script.metadata)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO scripts (id, title, source, emoji, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                script.id,
                script.title,
                script.source,
                script.emoji,
                metadata_json,
                script.created_at.to_rfc3339(),
                script.updated_at.to_rfc3339(),
            ],
        )?;
        debug!(id = %script.id, title = %script.title, "Created local script");
        Ok(script)
    }

    fn update(&self, id: &str, patch: ScriptPatch) -> Result<()> {
        let conn = self.conn.lock();
        let existing: Option<(String, String, Option<String>)> = conn
            .query_row(
                "SELECT title, source, emoji FROM scripts WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some((title, source, emoji)) = existing else {
            return Err(MarketError::NotFound { id: id.to_string() });
        };

        conn.execute(
            "UPDATE scripts SET title = ?2, source = ?3, emoji = ?4, updated_at = ?5 WHERE id = ?1",
            params![
                id,
                patch.title.unwrap_or(title),
                patch.source.unwrap_or(source),
                patch.emoji.or(emoji),
                Utc::now().to_rfc3339(),
            ],
        )?;
        debug!(id, "Updated local script");
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM scripts WHERE id = ?1", params![id])?;
        // Deleting a missing id is fine; the end state is the same
        debug!(id, deleted, "Deleted local script");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<LocalScript>> {
        let conn = self.conn.lock();
        let row: Option<ScriptRow> = conn
            .query_row(
                "SELECT id, title, source, emoji, metadata, created_at, updated_at
                 FROM scripts WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        row.map(row_to_script).transpose()
    }

    fn list(&self) -> Result<Vec<LocalScript>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, source, emoji, metadata, created_at, updated_at
             FROM scripts ORDER BY updated_at DESC, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?;

        let mut scripts = Vec::new();
        for row in rows {
            scripts.push(row_to_script(row?)?);
        }
        Ok(scripts)
    }
}

#[cfg(test)]
#[path = "library_tests.rs"]
mod library_tests;
