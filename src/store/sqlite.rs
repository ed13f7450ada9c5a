//! SQLite sanction store: WAL-mode table keyed by `(community_id, subject_id)`.
//!
//! Uses Write-Ahead Logging so the operator CLI can read while the daemon
//! writes, and prepared cached statements for the hot sweep query.

#![allow(missing_docs)]
#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};

use crate::core::errors::{Result, SwdError};
use crate::core::model::{CommunityId, Sanction, SanctionKey, SubjectId};
use crate::store::SanctionStore;

const SELECT_COLUMNS: &str = "SELECT community_id, subject_id, imposed_at, expires_at, reason
     FROM sanctions";

/// Durable sanction store backed by a single SQLite connection.
pub struct SqliteSanctionStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteSanctionStore {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| SwdError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Path to the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check that WAL mode is active (for diagnostics).
    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .lock()
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

impl SanctionStore for SqliteSanctionStore {
    fn insert(&self, record: &Sanction) -> Result<()> {
        record.validate()?;
        self.conn
            .lock()
            .prepare_cached(
                "INSERT OR REPLACE INTO sanctions (
                community_id, subject_id, imposed_at, expires_at, reason
            ) VALUES (?1,?2,?3,?4,?5)",
            )?
            .execute(params![
                record.community_id.0 as i64,
                record.subject_id.0 as i64,
                record.imposed_at,
                record.expires_at,
                record.reason,
            ])?;
        Ok(())
    }

    fn delete(&self, key: &SanctionKey) -> Result<bool> {
        let removed = self
            .conn
            .lock()
            .prepare_cached("DELETE FROM sanctions WHERE community_id = ?1 AND subject_id = ?2")?
            .execute(params![key.community_id.0 as i64, key.subject_id.0 as i64])?;
        Ok(removed > 0)
    }

    fn select_expired(&self, now: i64) -> Result<Vec<Sanction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "{SELECT_COLUMNS} WHERE expires_at <= ?1
             ORDER BY expires_at ASC, community_id ASC, subject_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![now], row_to_sanction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn select_active_for(&self, key: &SanctionKey, now: i64) -> Result<Option<Sanction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "{SELECT_COLUMNS} WHERE community_id = ?1 AND subject_id = ?2 AND expires_at > ?3"
        ))?;
        let row = stmt
            .query_row(
                params![key.community_id.0 as i64, key.subject_id.0 as i64, now],
                row_to_sanction,
            )
            .optional()?;
        Ok(row)
    }

    fn fetch(&self, key: &SanctionKey) -> Result<Option<Sanction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "{SELECT_COLUMNS} WHERE community_id = ?1 AND subject_id = ?2"
        ))?;
        let row = stmt
            .query_row(
                params![key.community_id.0 as i64, key.subject_id.0 as i64],
                row_to_sanction,
            )
            .optional()?;
        Ok(row)
    }

    fn list(&self, community: Option<CommunityId>) -> Result<Vec<Sanction>> {
        let conn = self.conn.lock();
        let rows = if let Some(community) = community {
            let mut stmt = conn.prepare_cached(&format!(
                "{SELECT_COLUMNS} WHERE community_id = ?1
                 ORDER BY expires_at ASC, subject_id ASC"
            ))?;
            let rows = stmt
                .query_map(params![community.0 as i64], row_to_sanction)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        } else {
            let mut stmt = conn.prepare_cached(&format!(
                "{SELECT_COLUMNS} ORDER BY expires_at ASC, community_id ASC, subject_id ASC"
            ))?;
            let rows = stmt
                .query_map([], row_to_sanction)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        Ok(rows)
    }
}

fn row_to_sanction(row: &Row<'_>) -> rusqlite::Result<Sanction> {
    Ok(Sanction {
        community_id: CommunityId(row.get::<_, i64>(0)? as u64),
        subject_id: SubjectId(row.get::<_, i64>(1)? as u64),
        imposed_at: row.get(2)?,
        expires_at: row.get(3)?,
        reason: row.get(4)?,
    })
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[SWD-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sanctions (
            community_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            imposed_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            reason TEXT NOT NULL,
            PRIMARY KEY (community_id, subject_id),
            CHECK (expires_at > imposed_at)
        );

        CREATE INDEX IF NOT EXISTS idx_sanctions_expires_at ON sanctions(expires_at);",
    )?;
    Ok(())
}

// ──────────────────── tests ────────────────────
