//! Metadata ledger backed by SQLite.
//!
//! Records which files were ingested (with their content hash) and which
//! chunk ids each file currently owns in the vector index.
use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub mod files;
pub mod models;

pub use models::{ChunkRecord, LedgerStats, TrackedFile, chunk_id};

/// Schema version stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tracked_files (
    file_path TEXT PRIMARY KEY,
    file_hash TEXT NOT NULL,
    file_type TEXT NOT NULL,
    chunk_count INTEGER NOT NULL,
    ingested_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS chunk_records (
    chunk_id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    FOREIGN KEY (file_path) REFERENCES tracked_files(file_path),
    UNIQUE (file_path, ordinal)
);

CREATE INDEX IF NOT EXISTS idx_chunk_file_path ON chunk_records(file_path);
"#;

/// Errors raised by the ledger. All of them are fatal to a synchronization run.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("ledger is corrupt: {0}")]
    Corrupt(String),

    #[error("ledger schema version {found} is newer than supported version {supported}")]
    SchemaMismatch { found: i64, supported: i64 },

    #[error("refusing to track {0} with zero chunks")]
    EmptyChunkSet(String),
}

/// Durable store of tracked files and their chunk records.
pub struct Ledger {
    pub(crate) conn: Connection,
}

impl Ledger {
    /// Open (or create) the ledger database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        info!("Opening ledger: {}", path.display());
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory ledger (useful for testing).
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(LedgerError::Corrupt(check));
        }

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(LedgerError::SchemaMismatch {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(Self { conn })
    }
}
