/// End-to-end tests for the docsync pipeline.
///
/// Tests the complete flow:
///   Documents → Scan → Ledger → Vector index → Retrieval
use docsync::chunker::TextSplitter;
use docsync::embedder::mock::MockEmbedder;
use docsync::engine::KnowledgeBase;
use docsync::index::{IndexEntry, IndexError, ScoredEntry, SqliteVecIndex, VectorIndex};
use docsync::ledger::{Ledger, chunk_id};
use docsync::loader::text::TextLoader;
use docsync::loader::{LoadError, Loader, LoaderRegistry, Metadata, Section};
use docsync::retriever::{NoResultsReason, Retrieval};
use docsync::sync::{NotReady, SyncError, path_key};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use tempfile::{TempDir, tempdir};

/// Counts index mutations on top of a real sqlite-vec index.
struct CountingIndex {
    inner: SqliteVecIndex,
    mutations: AtomicUsize,
}

impl CountingIndex {
    fn new() -> Self {
        Self {
            inner: SqliteVecIndex::open_in_memory(Arc::new(MockEmbedder::new(64))).unwrap(),
            mutations: AtomicUsize::new(0),
        }
    }

    fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }
}

impl VectorIndex for CountingIndex {
    fn upsert(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(entries)
    }

    fn delete(&self, ids: &[String]) -> Result<usize, IndexError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(ids)
    }

    fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredEntry>, IndexError> {
        self.inner.similarity_search(query, k)
    }

    fn count(&self) -> Result<usize, IndexError> {
        self.inner.count()
    }

    fn ids(&self) -> Result<BTreeSet<String>, IndexError> {
        self.inner.ids()
    }

    fn clear(&self) -> Result<(), IndexError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner.clear()
    }
}

/// Text loader that takes a while, to keep a run in flight.
struct SlowLoader;

impl Loader for SlowLoader {
    fn load(&self, path: &Path) -> Result<Vec<Section>, LoadError> {
        std::thread::sleep(Duration::from_millis(300));
        TextLoader.load(path)
    }
}

struct FailingLoader;

impl Loader for FailingLoader {
    fn load(&self, _path: &Path) -> Result<Vec<Section>, LoadError> {
        Err(LoadError::Io(std::io::Error::other("simulated read failure")))
    }
}

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    ledger_path: PathBuf,
    index: Arc<CountingIndex>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path().join("kb");
        fs::create_dir_all(&root).unwrap();
        let ledger_path = dir.path().join("metadata.db");
        Self {
            _dir: dir,
            root,
            ledger_path,
            index: Arc::new(CountingIndex::new()),
        }
    }

    fn kb_with(&self, loaders: LoaderRegistry) -> KnowledgeBase {
        KnowledgeBase::with_parts(
            &self.root,
            Ledger::open(&self.ledger_path).unwrap(),
            self.index.clone(),
            loaders,
            TextSplitter::new(500, 100).unwrap(),
        )
    }

    fn kb(&self) -> KnowledgeBase {
        self.kb_with(LoaderRegistry::default())
    }

    /// A second ledger handle for inspection.
    fn ledger(&self) -> Ledger {
        Ledger::open(&self.ledger_path).unwrap()
    }

    fn write(&self, name: &str, content: &str) -> String {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path_key(&path)
    }

    fn assert_mirrored(&self) {
        assert_eq!(
            self.ledger().all_chunk_ids().unwrap(),
            self.index.ids().unwrap(),
            "ledger chunk ids and index ids diverged"
        );
    }
}

fn long_text(words: usize) -> String {
    (0..words)
        .map(|i| format!("word{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::test]
async fn test_full_pipeline() {
    let fx = Fixture::new();
    fx.write(
        "hello.md",
        "# Hello World\n\nThis is a test document about Rust programming.",
    );
    fx.write("notes/guide.txt", "To get started install dependencies and run the server.");
    fx.write(
        "api.html",
        "<html><body><h1>API Reference</h1><script>var x;</script><p>Perform a vector search.</p></body></html>",
    );
    fx.write("image.png", "not really an image");

    let kb = fx.kb();
    let report = kb.synchronize(false).await.unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.new, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.files, 3);
    assert_eq!(report.chunks, fx.index.count().unwrap());
    fx.assert_mirrored();

    let retrieval = kb
        .retrieve(
            "To get started install dependencies and run the server.",
            6,
            0.4,
        )
        .await
        .unwrap();
    let passages = retrieval.passages();
    assert!(!passages.is_empty());
    assert!(passages[0].source.ends_with("notes/guide.txt"));
    assert!(retrieval.render().starts_with("[Document 1] (Score: 0.00) From guide.txt:"));
}

#[tokio::test]
async fn test_second_run_is_noop() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha document");
    fx.write("b.md", "# beta document");
    let kb = fx.kb();

    kb.synchronize(false).await.unwrap();
    let mutations = fx.index.mutations();

    let report = kb.synchronize(false).await.unwrap();
    assert_eq!((report.new, report.changed, report.deleted), (0, 0, 0));
    assert_eq!(report.unchanged, 2);
    assert!(report.is_noop());
    assert_eq!(fx.index.mutations(), mutations, "noop run touched the index");
}

#[tokio::test]
async fn test_new_large_file_is_chunked() {
    let fx = Fixture::new();
    let key = fx.write("big.txt", &"x".repeat(1200));
    let kb = fx.kb();

    let report = kb.synchronize(false).await.unwrap();
    assert_eq!(report.new, 1);

    let ledger = fx.ledger();
    let ids = ledger.chunk_ids(&key).unwrap();
    assert!(ids.len() >= 2);
    assert_eq!(ids[0], chunk_id(&key, 0));
    assert_eq!(ledger.tracked_file(&key).unwrap().unwrap().chunk_count, ids.len());
    fx.assert_mirrored();
}

#[tokio::test]
async fn test_mtime_only_touch_is_unchanged() {
    let fx = Fixture::new();
    fx.write("a.txt", "stable content");
    let kb = fx.kb();
    kb.synchronize(false).await.unwrap();
    let mutations = fx.index.mutations();

    let later = SystemTime::now() + Duration::from_secs(3600);
    filetime::set_file_mtime(
        fx.root.join("a.txt"),
        filetime::FileTime::from_system_time(later),
    )
    .unwrap();

    let report = kb.synchronize(false).await.unwrap();
    assert_eq!(report.changed, 0);
    assert_eq!(report.unchanged, 1);
    assert_eq!(fx.index.mutations(), mutations);
}

#[tokio::test]
async fn test_deleted_file_is_purged() {
    let fx = Fixture::new();
    let key = fx.write("gone.txt", &long_text(300));
    fx.write("kept.txt", "kept");
    let kb = fx.kb();
    kb.synchronize(false).await.unwrap();
    let ids = fx.ledger().chunk_ids(&key).unwrap();
    assert!(!ids.is_empty());

    fs::remove_file(fx.root.join("gone.txt")).unwrap();
    let report = kb.synchronize(false).await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.unchanged, 1);

    let ledger = fx.ledger();
    assert!(!ledger.tracked_files().unwrap().contains(&key));
    assert!(ledger.chunk_ids(&key).unwrap().is_empty());
    let indexed = fx.index.ids().unwrap();
    assert!(ids.iter().all(|id| !indexed.contains(id)));
    fx.assert_mirrored();
}

#[tokio::test]
async fn test_changed_file_replaces_chunk_set() {
    let fx = Fixture::new();
    let key = fx.write("report.txt", &long_text(400));
    let kb = fx.kb();
    kb.synchronize(false).await.unwrap();
    let before = fx.ledger().chunk_ids(&key).unwrap();
    assert!(before.len() >= 3);

    fx.write("report.txt", "now a single short paragraph");
    let report = kb.synchronize(false).await.unwrap();
    assert_eq!(report.changed, 1);

    let after = fx.ledger().chunk_ids(&key).unwrap();
    assert_eq!(after, vec![chunk_id(&key, 0)]);
    let indexed = fx.index.ids().unwrap();
    for stale in &before[1..] {
        assert!(!indexed.contains(stale), "{stale} survived re-ingestion");
    }

    let hits = kb
        .retrieve("now a single short paragraph", 6, 0.4)
        .await
        .unwrap();
    assert_eq!(hits.passages().len(), 1);
    assert_eq!(hits.passages()[0].text, "now a single short paragraph");
    fx.assert_mirrored();
}

#[tokio::test]
async fn test_force_rebuild_drops_stale_state() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha");
    fx.write("b.txt", "beta");
    let kb = fx.kb();
    kb.synchronize(false).await.unwrap();

    // A record whose file no longer exists and an index entry nobody owns.
    let ghost = path_key(&fx.root.join("ghost.txt"));
    fx.ledger()
        .store(&ghost, &"0".repeat(64), &[chunk_id(&ghost, 0)], "txt")
        .unwrap();
    fx.index
        .inner
        .upsert(&[IndexEntry {
            id: "orphan_0".to_string(),
            text: "orphan".to_string(),
            metadata: Metadata::new(),
        }])
        .unwrap();

    let report = kb.synchronize(true).await.unwrap();
    assert!(report.rebuilt);
    assert_eq!(report.new, 2);
    assert_eq!(report.deleted, 0);
    assert_eq!(report.files, 2);

    let ledger = fx.ledger();
    assert!(!ledger.tracked_files().unwrap().contains(&ghost));
    assert!(!fx.index.ids().unwrap().contains("orphan_0"));
    fx.assert_mirrored();
}

#[tokio::test]
async fn test_threshold_filter() {
    let fx = Fixture::new();
    fx.write("pricing.txt", "Enterprise plans include volume discounts and priority support");
    let kb = fx.kb();
    kb.synchronize(false).await.unwrap();

    let close = kb
        .retrieve("Enterprise plans include volume discounts and priority support", 6, 0.4)
        .await
        .unwrap();
    assert_eq!(close.passages().len(), 1);
    assert!(close.passages()[0].score <= 0.4);

    let far = kb
        .retrieve("zebra xylophone quantum marmalade", 6, 0.4)
        .await
        .unwrap();
    assert_eq!(far, Retrieval::NoResults(NoResultsReason::NothingRelevant));
    assert_eq!(
        far.render(),
        "No relevant documents found in knowledge base for this query."
    );
}

#[tokio::test]
async fn test_retrieve_on_empty_index() {
    let fx = Fixture::new();
    let kb = fx.kb();
    assert_eq!(
        kb.retrieve("anything", 6, 0.4).await.unwrap(),
        Retrieval::NoResults(NoResultsReason::EmptyIndex)
    );
}

#[tokio::test]
async fn test_concurrent_synchronize_is_rejected() {
    let fx = Fixture::new();
    fx.write("a.txt", "slow to load");
    let mut loaders = LoaderRegistry::default();
    loaders.register("txt", Arc::new(SlowLoader));
    let kb = fx.kb_with(loaders);

    let (first, second) = tokio::join!(kb.synchronize(false), kb.synchronize(false));
    let results = [first, second];
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(SyncError::Busy)))
        .count();
    let completed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!((busy, completed), (1, 1));

    // The lock is released once the first run finishes.
    let report = kb.synchronize(false).await.unwrap();
    assert!(report.is_noop());
}

#[tokio::test]
async fn test_failing_loader_keeps_ledger_mirrored() {
    let fx = Fixture::new();
    let key = fx.write("a.txt", "first version of the file");
    fx.kb().synchronize(false).await.unwrap();

    fx.write("a.txt", "second version of the file");
    let mut broken = LoaderRegistry::default();
    broken.register("txt", Arc::new(FailingLoader));
    let report = fx.kb_with(broken).synchronize(false).await.unwrap();
    assert_eq!(report.changed, 1);
    assert_eq!(report.failed, 1);
    fx.assert_mirrored();
    assert!(!fx.ledger().tracked_files().unwrap().contains(&key));

    let kb = fx.kb();
    let retry = kb.synchronize(false).await.unwrap();
    assert_eq!(retry.new, 1);
    assert!(kb.verify().await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_missing_root_is_not_ready() {
    let fx = Fixture::new();
    fs::remove_dir_all(&fx.root).unwrap();
    let kb = fx.kb();

    let result = kb.synchronize(false).await;
    assert!(matches!(
        result,
        Err(SyncError::NotReady(NotReady::DocumentRootMissing(_)))
    ));
    assert!(fx.root.is_dir(), "missing root should be created");

    // Empty but present: a normal, empty run.
    let report = kb.synchronize(false).await.unwrap();
    assert_eq!(report.total, 0);
}

#[tokio::test]
async fn test_emptied_root_deletes_everything() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha");
    fx.write("b.txt", "beta");
    let kb = fx.kb();
    kb.synchronize(false).await.unwrap();

    fs::remove_file(fx.root.join("a.txt")).unwrap();
    fs::remove_file(fx.root.join("b.txt")).unwrap();
    let report = kb.synchronize(false).await.unwrap();
    assert_eq!(report.deleted, 2);
    assert_eq!(fx.index.count().unwrap(), 0);
}

#[tokio::test]
async fn test_structured_formats() {
    let fx = Fixture::new();
    fx.write(
        "staff.csv",
        "name,role\nAda,Engineer\nGrace,Admiral\n",
    );
    fx.write(
        "settings.json",
        r#"{"service": {"port": 8080, "hosts": ["a.internal", "b.internal"]}}"#,
    );
    let docx_path = fx.root.join("memo.docx");
    let file = fs::File::create(&docx_path).unwrap();
    docx_rs::Docx::new()
        .add_paragraph(
            docx_rs::Paragraph::new().add_run(docx_rs::Run::new().add_text("Quarterly memo body")),
        )
        .build()
        .pack(file)
        .unwrap();

    let kb = fx.kb();
    let report = kb.synchronize(false).await.unwrap();
    assert_eq!(report.new, 3);
    assert_eq!(report.failed, 0);

    let csv_key = path_key(&fx.root.join("staff.csv"));
    assert_eq!(fx.ledger().chunk_ids(&csv_key).unwrap().len(), 2);
    assert_eq!(
        fx.ledger().tracked_file(&csv_key).unwrap().unwrap().file_type,
        "csv"
    );

    let hit = kb.retrieve("name: Grace\nrole: Admiral", 1, 0.4).await.unwrap();
    assert_eq!(hit.passages().len(), 1);
    assert!(hit.passages()[0].source.ends_with("staff.csv"));

    let memo = kb.retrieve("Quarterly memo body", 1, 0.4).await.unwrap();
    assert!(memo.passages()[0].source.ends_with("memo.docx"));
    fx.assert_mirrored();
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_file_is_not_deleted() {
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new();
    let key = fx.write("secret.txt", "classified");
    let kb = fx.kb();
    kb.synchronize(false).await.unwrap();

    let path = fx.root.join("secret.txt");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read(&path).is_ok() {
        // Running with privileges that ignore file modes.
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        return;
    }

    let report = kb.synchronize(false).await.unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

    assert_eq!(report.deleted, 0);
    assert_eq!(report.unreadable, 1);
    assert!(fx.ledger().tracked_files().unwrap().contains(&key));
    assert_eq!(fx.index.count().unwrap(), 1);
}

#[tokio::test]
async fn test_repair_drops_untracked_entries() {
    let fx = Fixture::new();
    fx.write("a.txt", "alpha");
    let kb = fx.kb();
    kb.synchronize(false).await.unwrap();

    // Left behind by a run that stopped before its ledger commit.
    fx.index
        .inner
        .upsert(&[IndexEntry {
            id: "interrupted_0".to_string(),
            text: "half ingested".to_string(),
            metadata: Metadata::new(),
        }])
        .unwrap();

    let before = kb.verify().await.unwrap();
    assert_eq!(
        before.untracked_in_index,
        BTreeSet::from(["interrupted_0".to_string()])
    );
    assert!(before.missing_from_index.is_empty());

    assert_eq!(kb.repair().await.unwrap(), 1);
    assert!(kb.verify().await.unwrap().is_consistent());
    assert_eq!(kb.repair().await.unwrap(), 0);
    fx.assert_mirrored();
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlinked_document_is_indexed() {
    let fx = Fixture::new();
    let shared = fx.root.parent().unwrap().join("handbook.txt");
    fs::write(&shared, "Vacation requests go through the team lead").unwrap();
    std::os::unix::fs::symlink(&shared, fx.root.join("handbook.txt")).unwrap();

    let kb = fx.kb();
    let report = kb.synchronize(false).await.unwrap();
    assert_eq!((report.new, report.failed, report.files), (1, 0, 1));

    let retrieval = kb
        .retrieve("Vacation requests go through the team lead", 6, 0.4)
        .await
        .unwrap();
    assert_eq!(retrieval.passages().len(), 1);
    assert!(kb.synchronize(false).await.unwrap().is_noop());
    fx.assert_mirrored();
}
