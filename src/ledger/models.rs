use chrono::{DateTime, Utc};
use serde::Serialize;

/// Build the deterministic chunk id for `ordinal` within `path`.
pub fn chunk_id(path: &str, ordinal: usize) -> String {
    format!("{path}_{ordinal}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedFile {
    pub path: String,
    pub hash: String,
    pub file_type: String,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkRecord {
    pub id: String,
    pub path: String,
    pub ordinal: usize,
}

/// Aggregate counts over the whole ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub file_count: usize,
    pub chunk_count: usize,
}
