use super::{Ledger, LedgerError, models::*};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use std::collections::BTreeSet;

fn map_tracked_file(row: &Row<'_>) -> rusqlite::Result<TrackedFile> {
    Ok(TrackedFile {
        path: row.get(0)?,
        hash: row.get(1)?,
        file_type: row.get(2)?,
        chunk_count: row.get::<_, i64>(3)? as usize,
        ingested_at: row.get::<_, DateTime<Utc>>(4)?,
        updated_at: row.get::<_, DateTime<Utc>>(5)?,
    })
}

impl Ledger {
    /// All paths that currently have a tracked file record.
    pub fn tracked_files(&self) -> Result<BTreeSet<String>, LedgerError> {
        let mut stmt = self.conn.prepare("SELECT file_path FROM tracked_files")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut paths = BTreeSet::new();
        for row in rows {
            paths.insert(row?);
        }
        Ok(paths)
    }

    /// Last recorded content hash for `path`, if tracked.
    pub fn stored_hash(&self, path: &str) -> Result<Option<String>, LedgerError> {
        let hash = self
            .conn
            .query_row(
                "SELECT file_hash FROM tracked_files WHERE file_path = ?",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Full record for `path`, if tracked.
    pub fn tracked_file(&self, path: &str) -> Result<Option<TrackedFile>, LedgerError> {
        let file = self
            .conn
            .query_row(
                r#"
                SELECT file_path, file_hash, file_type, chunk_count, ingested_at, updated_at
                FROM tracked_files WHERE file_path = ?
                "#,
                params![path],
                map_tracked_file,
            )
            .optional()?;
        Ok(file)
    }

    /// Chunk ids owned by `path`, ordered by ordinal. Empty if untracked.
    pub fn chunk_ids(&self, path: &str) -> Result<Vec<String>, LedgerError> {
        Ok(self
            .chunk_records(path)?
            .into_iter()
            .map(|record| record.id)
            .collect())
    }

    /// Chunk records owned by `path`, ordered by ordinal.
    pub fn chunk_records(&self, path: &str) -> Result<Vec<ChunkRecord>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT chunk_id, file_path, ordinal FROM chunk_records WHERE file_path = ? ORDER BY ordinal",
        )?;
        let rows = stmt.query_map(params![path], |row| {
            Ok(ChunkRecord {
                id: row.get(0)?,
                path: row.get(1)?,
                ordinal: row.get::<_, i64>(2)? as usize,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Every chunk id in the ledger, across all files.
    pub fn all_chunk_ids(&self) -> Result<BTreeSet<String>, LedgerError> {
        let mut stmt = self.conn.prepare("SELECT chunk_id FROM chunk_records")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = BTreeSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    /// Record `path` as ingested with `hash`, replacing its whole chunk set.
    ///
    /// The file row is upserted (`ingested_at` survives re-ingestion), the old
    /// chunk rows are removed and the new ones inserted in ordinal order, all
    /// inside one transaction.
    pub fn store(
        &mut self,
        path: &str,
        hash: &str,
        chunk_ids: &[String],
        file_type: &str,
    ) -> Result<(), LedgerError> {
        if chunk_ids.is_empty() {
            return Err(LedgerError::EmptyChunkSet(path.to_string()));
        }

        let now = Utc::now();
        let tx = self.conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO tracked_files (file_path, file_hash, file_type, chunk_count, ingested_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(file_path) DO UPDATE SET
                file_hash = excluded.file_hash,
                file_type = excluded.file_type,
                chunk_count = excluded.chunk_count,
                updated_at = excluded.updated_at
            "#,
            params![path, hash, file_type, chunk_ids.len() as i64, now],
        )?;

        tx.execute(
            "DELETE FROM chunk_records WHERE file_path = ?",
            params![path],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunk_records (chunk_id, file_path, ordinal) VALUES (?, ?, ?)",
            )?;
            for (ordinal, id) in chunk_ids.iter().enumerate() {
                stmt.execute(params![id, path, ordinal as i64])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Remove `path` and its chunk records, returning the ids that existed.
    ///
    /// Deleting an untracked path is a no-op that returns an empty list.
    pub fn delete(&mut self, path: &str) -> Result<Vec<String>, LedgerError> {
        let tx = self.conn.transaction()?;

        let ids = {
            let mut stmt = tx.prepare(
                "SELECT chunk_id FROM chunk_records WHERE file_path = ? ORDER BY ordinal",
            )?;
            let rows = stmt.query_map(params![path], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            ids
        };

        // Chunks first, then the owning file row.
        tx.execute(
            "DELETE FROM chunk_records WHERE file_path = ?",
            params![path],
        )?;
        tx.execute(
            "DELETE FROM tracked_files WHERE file_path = ?",
            params![path],
        )?;

        tx.commit()?;
        Ok(ids)
    }

    /// Drop every record. Used by forced rebuilds.
    pub fn clear(&mut self) -> Result<(), LedgerError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM chunk_records", [])?;
        tx.execute("DELETE FROM tracked_files", [])?;
        tx.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let (file_count, chunk_count): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(chunk_count), 0) FROM tracked_files",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(LedgerStats {
            file_count: file_count as usize,
            chunk_count: chunk_count as usize,
        })
    }

    /// Check that every file's chunk count matches its chunk rows, that
    /// ordinals run contiguously from zero, and that no chunk is orphaned.
    pub fn verify(&self) -> Result<(), LedgerError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT f.file_path, f.chunk_count, COUNT(c.chunk_id),
                   COALESCE(MIN(c.ordinal), 0), COALESCE(MAX(c.ordinal), -1)
            FROM tracked_files f
            LEFT JOIN chunk_records c ON c.file_path = f.file_path
            GROUP BY f.file_path
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        for row in rows {
            let (path, chunk_count, rows_found, min_ordinal, max_ordinal) = row?;
            if chunk_count == 0 || rows_found != chunk_count {
                return Err(LedgerError::Corrupt(format!(
                    "{path}: chunk_count {chunk_count} but {rows_found} chunk records"
                )));
            }
            if min_ordinal != 0 || max_ordinal != chunk_count - 1 {
                return Err(LedgerError::Corrupt(format!(
                    "{path}: ordinals {min_ordinal}..={max_ordinal} are not contiguous from 0"
                )));
            }
        }

        let orphans: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chunk_records WHERE file_path NOT IN (SELECT file_path FROM tracked_files)",
            [],
            |row| row.get(0),
        )?;
        if orphans > 0 {
            return Err(LedgerError::Corrupt(format!(
                "{orphans} chunk records without a tracked file"
            )));
        }

        Ok(())
    }
}
