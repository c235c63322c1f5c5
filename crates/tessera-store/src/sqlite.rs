//! SQLite persistence backend using rusqlite.
//!
//! This is the primary backend for edge, mobile, and desktop replicas.
//! Uses WAL mode by default for concurrent read/write performance.
//!
//! # Example
//!
//! ```no_run
//! use tessera_store::{DocumentRecord, DocumentStore, SqliteStore};
//!
//! let store = SqliteStore::open("replica.db").unwrap();
//! store.add_document(&DocumentRecord::new("doc", "aaaaaaaaaaaaaaaa")).unwrap();
//! assert_eq!(store.fragment_count("doc").unwrap(), 0);
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tessera_core::Fragment;
use tracing::debug;

use crate::notify::{Notifier, StoreEvent};
use crate::traits::{foreign_fragment, written_by, DocumentRecord, DocumentStore};

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// SQLite journal mode. Defaults to WAL.
    pub journal_mode: JournalMode,
    /// Busy timeout in milliseconds. Defaults to 5000.
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-Ahead Logging, allows concurrent reads during writes.
    Wal,
    /// Traditional rollback journal.
    Delete,
    /// In-memory journal (fastest, no crash recovery).
    Memory,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

/// Error type for the SQLite backend.
#[derive(Debug, thiserror::Error)]
pub enum SqliteError {
    /// An error from rusqlite.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored JSON column could not be encoded or decoded.
    #[error("json column error: {0}")]
    Json(#[from] serde_json::Error),
    /// Fragments were written for a document that was never created.
    #[error("unknown document {0:?}")]
    UnknownDocument(String),
    /// A fragment in the batch names a different document.
    #[error("fragment for document {found:?} offered to document {expected:?}")]
    ForeignFragment {
        /// The document being written.
        expected: String,
        /// The document named by the fragment.
        found: String,
    },
    /// Lock poisoned.
    #[error("sqlite lock poisoned")]
    LockPoisoned,
}

/// Row counts reported by [`SqliteStore::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Number of documents.
    pub documents: u64,
    /// Number of fragments across all documents.
    pub fragments: u64,
}

/// SQLite persistence backend.
///
/// Wraps a `rusqlite::Connection` behind a `Mutex` for safe shared access.
/// Creates the schema automatically on first open.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    notifier: Notifier,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path with default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SqliteError> {
        Self::open_with_config(path, SqliteConfig::default())
    }

    /// Open with custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteConfig,
    ) -> Result<Self, SqliteError> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn, &config)?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            notifier: Notifier::new(),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, SqliteError> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn, &SqliteConfig::default())?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            notifier: Notifier::new(),
        })
    }

    fn init_connection(conn: &Connection, config: &SqliteConfig) -> Result<(), SqliteError> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};
             PRAGMA busy_timeout = {};
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
            config.journal_mode.as_str(),
            config.busy_timeout_ms,
        ))?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> Result<(), SqliteError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id          TEXT PRIMARY KEY,
                node_id     TEXT NOT NULL,
                metadata    TEXT NOT NULL DEFAULT '{}',
                created_at  INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            );

            CREATE TABLE IF NOT EXISTS fragments (
                document_id TEXT NOT NULL REFERENCES documents(id),
                timestamp   TEXT NOT NULL,
                table_name  TEXT NOT NULL,
                row_id      TEXT NOT NULL,
                column_name TEXT NOT NULL,
                value       TEXT NOT NULL,
                PRIMARY KEY (document_id, timestamp)
            ) WITHOUT ROWID;",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteError> {
        self.conn.lock().map_err(|_| SqliteError::LockPoisoned)
    }

    /// Document and fragment counts.
    pub fn stats(&self) -> Result<StoreStats, SqliteError> {
        let conn = self.lock()?;
        let documents: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let fragments: i64 = conn.query_row("SELECT COUNT(*) FROM fragments", [], |row| row.get(0))?;
        Ok(StoreStats {
            documents: documents as u64,
            fragments: fragments as u64,
        })
    }

    /// Get the database file size in bytes (0 for in-memory).
    pub fn file_size(&self) -> Result<u64, SqliteError> {
        let conn = self.lock()?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((page_count * page_size) as u64)
    }

    /// Get the current journal mode.
    pub fn journal_mode(&self) -> Result<String, SqliteError> {
        let conn = self.lock()?;
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode)
    }
}

const FRAGMENT_COLUMNS: &str = "document_id, timestamp, table_name, row_id, column_name, value";

/// Raw fragment row; the JSON value is decoded outside the rusqlite closure.
struct FragmentRow {
    document_id: String,
    timestamp: String,
    table: String,
    row: String,
    column: String,
    value: String,
}

impl FragmentRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            document_id: row.get(0)?,
            timestamp: row.get(1)?,
            table: row.get(2)?,
            row: row.get(3)?,
            column: row.get(4)?,
            value: row.get(5)?,
        })
    }

    fn decode(self) -> Result<Fragment, SqliteError> {
        Ok(Fragment {
            document_id: self.document_id,
            timestamp: self.timestamp,
            table: self.table,
            row: self.row,
            column: self.column,
            value: serde_json::from_str(&self.value)?,
        })
    }
}

fn read_document(row: &Row<'_>) -> rusqlite::Result<(String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn decode_document((id, node_id, metadata): (String, String, String)) -> Result<DocumentRecord, SqliteError> {
    Ok(DocumentRecord {
        id,
        node_id,
        metadata: serde_json::from_str(&metadata)?,
    })
}

impl DocumentStore for SqliteStore {
    type Error = SqliteError;

    fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>, Self::Error> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT id, node_id, metadata FROM documents WHERE id = ?1",
                params![id],
                read_document,
            )
            .optional()?;
        raw.map(decode_document).transpose()
    }

    fn list_documents(&self) -> Result<Vec<DocumentRecord>, Self::Error> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, node_id, metadata FROM documents ORDER BY id")?;
        let raw = stmt
            .query_map([], read_document)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(decode_document).collect()
    }

    fn add_document(&self, document: &DocumentRecord) -> Result<bool, Self::Error> {
        let metadata = serde_json::to_string(&document.metadata)?;
        let inserted = {
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR IGNORE INTO documents (id, node_id, metadata) VALUES (?1, ?2, ?3)",
                params![document.id, document.node_id, metadata],
            )?
        };
        if inserted == 0 {
            return Ok(false);
        }
        self.notifier.emit(&StoreEvent::DocumentAdded {
            document_id: document.id.clone(),
        });
        Ok(true)
    }

    fn set_metadata(&self, id: &str, metadata: &Value) -> Result<bool, Self::Error> {
        let metadata = serde_json::to_string(metadata)?;
        let updated = {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE documents SET metadata = ?2 WHERE id = ?1",
                params![id, metadata],
            )?
        };
        if updated == 0 {
            return Ok(false);
        }
        self.notifier.emit(&StoreEvent::MetadataChanged {
            document_id: id.to_string(),
        });
        Ok(true)
    }

    fn add_fragments(&self, id: &str, fragments: &[Fragment]) -> Result<usize, Self::Error> {
        if let Some(foreign) = foreign_fragment(id, fragments) {
            return Err(SqliteError::ForeignFragment {
                expected: id.to_string(),
                found: foreign.document_id.clone(),
            });
        }
        let encoded = fragments
            .iter()
            .map(|f| serde_json::to_string(&f.value).map(|v| (f, v)))
            .collect::<Result<Vec<_>, _>>()?;

        let added = {
            let conn = self.lock()?;
            let tx = conn.unchecked_transaction()?;
            let known: i64 = tx.query_row(
                "SELECT COUNT(*) FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            if known == 0 {
                return Err(SqliteError::UnknownDocument(id.to_string()));
            }
            let mut added = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO fragments
                        (document_id, timestamp, table_name, row_id, column_name, value)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for (fragment, value) in &encoded {
                    added += stmt.execute(params![
                        id,
                        fragment.timestamp,
                        fragment.table,
                        fragment.row,
                        fragment.column,
                        value
                    ])?;
                }
            }
            tx.commit()?;
            added
        };

        debug!(document_id = id, added, offered = fragments.len(), "stored fragments");
        if added > 0 {
            self.notifier.emit(&StoreEvent::FragmentsAdded {
                document_id: id.to_string(),
                count: added,
            });
        }
        Ok(added)
    }

    fn fragments_since(
        &self,
        id: &str,
        since: &str,
        exclude_node: Option<&str>,
    ) -> Result<Vec<Fragment>, Self::Error> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FRAGMENT_COLUMNS} FROM fragments
             WHERE document_id = ?1 AND timestamp > ?2
             ORDER BY timestamp"
        ))?;
        let raw = stmt
            .query_map(params![id, since], FragmentRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .filter(|r| exclude_node.map_or(true, |node| !written_by(&r.timestamp, node)))
            .map(FragmentRow::decode)
            .collect()
    }

    fn fragments_at(&self, id: &str, timestamps: &[String]) -> Result<Vec<Fragment>, Self::Error> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FRAGMENT_COLUMNS} FROM fragments
             WHERE document_id = ?1 AND timestamp = ?2"
        ))?;
        let mut found = Vec::with_capacity(timestamps.len());
        for ts in timestamps {
            if let Some(raw) = stmt.query_row(params![id, ts], FragmentRow::read).optional()? {
                found.push(raw.decode()?);
            }
        }
        found.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        found.dedup_by(|a, b| a.timestamp == b.timestamp);
        Ok(found)
    }

    fn for_each_fragment(
        &self,
        id: &str,
        visit: &mut dyn FnMut(Fragment),
    ) -> Result<(), Self::Error> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FRAGMENT_COLUMNS} FROM fragments
             WHERE document_id = ?1
             ORDER BY timestamp"
        ))?;
        let mut rows = stmt.query(params![id])?;
        while let Some(row) = rows.next()? {
            visit(FragmentRow::read(row)?.decode()?);
        }
        Ok(())
    }

    fn fragment_count(&self, id: &str) -> Result<u64, Self::Error> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM fragments WHERE document_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}
