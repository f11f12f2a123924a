//! Persistent [`VectorIndex`] on SQLite with the sqlite-vec extension.
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use super::{IndexEntry, IndexError, ScoredEntry, VectorIndex};
use crate::embedder::Embedder;
use crate::loader::Metadata;

/// File name of the vector database inside the index directory.
pub const VECTOR_DB_FILE: &str = "vectors.db";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id TEXT NOT NULL UNIQUE,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL
);
"#;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            ::sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Serialize a float32 vector into the little-endian blob vec0 expects.
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub struct SqliteVecIndex {
    conn: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
    dimensions: usize,
}

impl SqliteVecIndex {
    /// Open (or create) `vectors.db` inside `dir`.
    pub fn open<P: AsRef<Path>>(dir: P, embedder: Arc<dyn Embedder>) -> Result<Self, IndexError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| IndexError::Unavailable(format!("{}: {e}", dir.display())))?;
        let path = dir.join(VECTOR_DB_FILE);
        info!("Opening vector index: {}", path.display());

        init_sqlite_vec();
        Self::init(Connection::open(&path)?, embedder)
    }

    /// Open an in-memory index (useful for testing).
    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Result<Self, IndexError> {
        init_sqlite_vec();
        Self::init(Connection::open_in_memory()?, embedder)
    }

    fn init(conn: Connection, embedder: Arc<dyn Embedder>) -> Result<Self, IndexError> {
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        debug!("sqlite-vec version: {}", vec_version);

        let dimensions = embedder.dimensions();
        conn.execute_batch(SCHEMA_SQL)?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match stored.map(|v| v.parse::<usize>()) {
            Some(Ok(found)) if found != dimensions => {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    found,
                });
            }
            Some(Err(e)) => {
                return Err(IndexError::Unavailable(format!("bad dimensions record: {e}")));
            }
            Some(Ok(_)) => {}
            None => {
                conn.execute(
                    "INSERT INTO index_meta (key, value) VALUES ('dimensions', ?)",
                    params![dimensions.to_string()],
                )?;
            }
        }

        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_entries USING vec0(embedding FLOAT[{dimensions}]);"
        ))?;

        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            dimensions,
        })
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                found: vector.len(),
            });
        }
        Ok(())
    }
}

fn delete_by_chunk_id(tx: &rusqlite::Transaction<'_>, chunk_id: &str) -> rusqlite::Result<bool> {
    let rowid: Option<i64> = tx
        .query_row(
            "SELECT id FROM entries WHERE chunk_id = ?",
            params![chunk_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(rowid) = rowid else {
        return Ok(false);
    };
    tx.execute("DELETE FROM vec_entries WHERE rowid = ?", params![rowid])?;
    tx.execute("DELETE FROM entries WHERE id = ?", params![rowid])?;
    Ok(true)
}

impl VectorIndex for SqliteVecIndex {
    fn upsert(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }

        // Embed before taking the connection lock so searches are not blocked.
        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
        let vectors = self.embedder.embed_batch(&texts)?;
        if vectors.len() != entries.len() {
            return Err(IndexError::VectorCount {
                expected: entries.len(),
                found: vectors.len(),
            });
        }
        for vector in &vectors {
            self.check_dimensions(vector)?;
        }

        let mut conn = self.conn.lock().map_err(|_| IndexError::LockPoisoned)?;
        let tx = conn.transaction()?;
        for (entry, vector) in entries.iter().zip(&vectors) {
            delete_by_chunk_id(&tx, &entry.id)?;
            tx.execute(
                "INSERT INTO entries (chunk_id, content, metadata) VALUES (?, ?, ?)",
                params![entry.id, entry.text, serde_json::to_string(&entry.metadata)?],
            )?;
            let rowid = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO vec_entries (rowid, embedding) VALUES (?, ?)",
                params![rowid, serialize_vector(vector)],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, ids: &[String]) -> Result<usize, IndexError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock().map_err(|_| IndexError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        for id in ids {
            if delete_by_chunk_id(&tx, id)? {
                removed += 1;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredEntry>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed(query)?;
        self.check_dimensions(&query_vector)?;

        let conn = self.conn.lock().map_err(|_| IndexError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                e.chunk_id,
                e.content,
                e.metadata,
                vec_distance_cosine(v.embedding, ?) AS distance
            FROM vec_entries v
            JOIN entries e ON v.rowid = e.id
            ORDER BY distance ASC
            LIMIT ?
            "#,
        )?;
        let rows = stmt.query_map(
            params![serialize_vector(&query_vector), k as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            },
        )?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, text, metadata, score) = row?;
            let metadata: Metadata = serde_json::from_str(&metadata)?;
            hits.push(ScoredEntry {
                id,
                text,
                metadata,
                score,
            });
        }
        Ok(hits)
    }

    fn count(&self) -> Result<usize, IndexError> {
        let conn = self.conn.lock().map_err(|_| IndexError::LockPoisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn ids(&self) -> Result<BTreeSet<String>, IndexError> {
        let conn = self.conn.lock().map_err(|_| IndexError::LockPoisoned)?;
        let mut stmt = conn.prepare("SELECT chunk_id FROM entries")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = BTreeSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    fn clear(&self) -> Result<(), IndexError> {
        let mut conn = self.conn.lock().map_err(|_| IndexError::LockPoisoned)?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM vec_entries", [])?;
        tx.execute("DELETE FROM entries", [])?;
        tx.commit()?;
        info!("Vector index cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use tempfile::tempdir;

    fn entry(id: &str, text: &str, page: Option<usize>) -> IndexEntry {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), "/kb/doc.pdf".to_string());
        if let Some(page) = page {
            metadata.insert("page".to_string(), page.to_string());
        }
        IndexEntry {
            id: id.to_string(),
            text: text.to_string(),
            metadata,
        }
    }

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(MockEmbedder::new(64))
    }

    #[test]
    fn test_serialize_vector() {
        let bytes = serialize_vector(&[1.0, 2.0, -3.5]);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x40]);
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
    }

    #[test]
    fn test_upsert_search_roundtrip() {
        let index = SqliteVecIndex::open_in_memory(embedder()).unwrap();
        index
            .upsert(&[
                entry("/kb/doc.pdf_0", "invoice payment terms net thirty", Some(0)),
                entry("/kb/doc.pdf_1", "employee onboarding checklist", Some(1)),
            ])
            .unwrap();
        assert_eq!(index.count().unwrap(), 2);

        let hits = index
            .similarity_search("invoice payment terms net thirty", 2)
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "/kb/doc.pdf_0");
        assert!(hits[0].score < 1e-5);
        assert!(hits[0].score <= hits[1].score);
        assert_eq!(hits[0].metadata.get("page").map(String::as_str), Some("0"));
    }

    #[test]
    fn test_upsert_same_id_replaces() {
        let index = SqliteVecIndex::open_in_memory(embedder()).unwrap();
        index.upsert(&[entry("a_0", "old text", None)]).unwrap();
        index.upsert(&[entry("a_0", "new text", None)]).unwrap();
        assert_eq!(index.count().unwrap(), 1);
        let hits = index.similarity_search("new text", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "new text");
    }

    #[test]
    fn test_delete_ignores_unknown_ids() {
        let index = SqliteVecIndex::open_in_memory(embedder()).unwrap();
        index
            .upsert(&[entry("a_0", "alpha", None), entry("a_1", "beta", None)])
            .unwrap();
        let removed = index
            .delete(&["a_0".to_string(), "nope".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.ids().unwrap(), BTreeSet::from(["a_1".to_string()]));
    }

    #[test]
    fn test_clear() {
        let index = SqliteVecIndex::open_in_memory(embedder()).unwrap();
        index.upsert(&[entry("a_0", "alpha", None)]).unwrap();
        index.clear().unwrap();
        assert_eq!(index.count().unwrap(), 0);
        assert!(index.similarity_search("alpha", 3).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_persists_and_checks_dimensions() {
        let dir = tempdir().unwrap();
        {
            let index = SqliteVecIndex::open(dir.path(), embedder()).unwrap();
            index.upsert(&[entry("a_0", "alpha", None)]).unwrap();
        }
        let index = SqliteVecIndex::open(dir.path(), embedder()).unwrap();
        assert_eq!(index.count().unwrap(), 1);
        drop(index);

        let wider: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(128));
        assert!(matches!(
            SqliteVecIndex::open(dir.path(), wider),
            Err(IndexError::DimensionMismatch {
                expected: 128,
                found: 64
            })
        ));
    }
}
