//! # docsync: incremental document synchronization
//!
//! Keeps a vector index in step with a directory of documents. Files are
//! fingerprinted by content hash; only new, modified or removed files cause
//! index writes, and a SQLite ledger records which chunk ids each file owns.
//!
//! ## Architecture
//!
//! - **[`config`]**: JSON configuration loading and validation
//! - **[`hasher`]**: streamed SHA-256 file fingerprints
//! - **[`ledger`]**: SQLite record of tracked files and their chunk ids
//! - **[`loader`]**: per-format text extraction (txt, md, pdf, docx, csv, json, html)
//! - **[`chunker`]**: recursive character splitter with overlap
//! - **[`embedder`]**: embedding providers (offline mock, OpenAI-compatible HTTP)
//! - **[`index`]**: vector index trait, sqlite-vec and in-memory adapters
//! - **[`sync`]**: scan, classify and reconcile
//! - **[`retriever`]**: threshold-filtered similarity search
//! - **[`engine`]**: async facade serializing synchronization runs

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod engine;
pub mod hasher;
pub mod index;
pub mod ledger;
pub mod loader;
pub mod retriever;
pub mod sync;
