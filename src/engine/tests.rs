use super::*;
use crate::ErrorKind;
use crate::embeddings::{HashingEmbedder, l2_norm};
use crate::store::FlatIndex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const DIM: usize = 64;

struct CountingEmbedder {
    inner: HashingEmbedder,
    calls: AtomicUsize,
}

impl CountingEmbedder {
    fn new() -> Self {
        Self {
            inner: HashingEmbedder::new(DIM).expect("valid dimension"),
            calls: AtomicUsize::new(0),
        }
    }
}

impl Embedder for CountingEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_raw(texts)
    }
}

struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn dimension(&self) -> usize {
        DIM
    }

    fn embed_raw(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::Embedding("model unavailable".to_string()))
    }
}

/// Claims one dimension but produces another
struct LyingEmbedder;

impl Embedder for LyingEmbedder {
    fn dimension(&self) -> usize {
        DIM
    }

    fn embed_raw(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0; DIM / 2]).collect())
    }
}

fn hashing() -> HashingEmbedder {
    HashingEmbedder::new(DIM).expect("valid dimension")
}

fn open(dir: &Path) -> VectorStoreEngine<HashingEmbedder> {
    VectorStoreEngine::open(hashing(), ChunkingConfig::default(), dir).expect("engine opens")
}

fn words(prefix: &str, count: usize) -> String {
    (1..=count)
        .map(|i| format!("{}{}", prefix, i))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Store the artifact and index it, the way an upload does
fn add<E: Embedder>(engine: &VectorStoreEngine<E>, id: &str, text: &str) -> IngestReport {
    engine
        .documents()
        .save(id, text.as_bytes())
        .expect("artifact saved");
    engine.ingest(id, text).expect("ingest succeeds")
}

fn assert_aligned<E: Embedder>(engine: &VectorStoreEngine<E>) {
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.index.count(), snapshot.metadata.len());
}

const POLICY_B: &str = "remote employees may work from home two days each week";

#[test]
fn ingest_then_delete_scenario() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path());

    let report = add(&engine, "A.txt", &words("w", 520));
    assert_eq!(report.chunks_indexed, 2);
    assert_eq!(report.dimension, DIM);

    let report = add(&engine, "B.txt", POLICY_B);
    assert_eq!(report.chunks_indexed, 1);
    assert_eq!(engine.count(), 3);
    assert_aligned(&engine);

    let hits = engine.search(POLICY_B, 1).expect("search succeeds");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].filename, "B.txt");
    assert!((hits[0].score - 1.0).abs() < 1e-5);

    let deleted = engine.delete("A.txt").expect("delete succeeds");
    assert_eq!(deleted.removed_chunks, 2);
    assert_eq!(engine.count(), 1);
    assert_aligned(&engine);

    let hits = engine.search("anything at all", 5).expect("search succeeds");
    assert_eq!(hits.len(), 1);
    assert!(hits.iter().all(|hit| hit.filename == "B.txt"));
    assert!(!engine.documents().exists("A.txt").expect("valid id"));
}

#[test]
fn chunk_metadata_matches_chunker_output() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path());
    let text = words("w", 520);
    add(&engine, "A.txt", &text);

    let expected = chunk_text(&text, &ChunkingConfig::default()).expect("valid config");
    let snapshot = engine.snapshot();
    let stored: Vec<&str> = snapshot
        .metadata
        .records()
        .iter()
        .map(|r| r.text.as_str())
        .collect();
    assert_eq!(stored, expected);
    assert!(stored[1].starts_with("w451 "));
}

#[test]
fn stored_vectors_are_unit_length() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path());
    add(&engine, "A.txt", &words("w", 1200));
    add(&engine, "B.txt", POLICY_B);

    let snapshot = engine.snapshot();
    for position in 0..snapshot.count() {
        let vector = snapshot.index.reconstruct(position).expect("position exists");
        assert!((l2_norm(&vector) - 1.0).abs() < 1e-5);
    }
}

#[test]
fn empty_store_search_skips_embedder() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let embedder = Arc::new(CountingEmbedder::new());
    let engine = VectorStoreEngine::open(
        Arc::clone(&embedder),
        ChunkingConfig::default(),
        temp_dir.path(),
    )
    .expect("engine opens");

    assert!(engine.search("anything", 5).expect("search succeeds").is_empty());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);

    add(&engine, "B.txt", POLICY_B);
    assert_eq!(engine.search("remote work", 0).expect("k = 0").len(), 0);
    assert_eq!(engine.search("remote work", 3).expect("search").len(), 1);
}

#[test]
fn search_orders_results_and_breaks_ties_by_position() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path());
    add(&engine, "first.txt", POLICY_B);
    add(&engine, "other.txt", "quarterly expense reports are due on friday");
    add(&engine, "second.txt", POLICY_B);

    let hits = engine.search(POLICY_B, 3).expect("search succeeds");
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].filename, "first.txt");
    assert_eq!(hits[1].filename, "second.txt");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert!((hits[1].score - 1.0).abs() < 1e-5);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn deleting_one_document_leaves_other_results_unchanged() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path());
    add(&engine, "A.txt", &words("w", 700));
    add(&engine, "B.txt", POLICY_B);
    add(&engine, "C.txt", "vacation requests need two weeks notice for approval");

    let query = "employees vacation from home";
    let before: Vec<SearchHit> = engine
        .search(query, 100)
        .expect("search succeeds")
        .into_iter()
        .filter(|hit| hit.filename != "A.txt")
        .collect();

    engine.delete("A.txt").expect("delete succeeds");
    let after = engine.search(query, 100).expect("search succeeds");

    assert_eq!(before, after);
}

#[test]
fn delete_unknown_document_is_not_found() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path());
    add(&engine, "B.txt", POLICY_B);
    let generation = engine.generation();

    for id in ["missing.txt", "../B.txt", ""] {
        let err = engine.delete(id).expect_err("nothing to delete");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    assert_eq!(engine.generation(), generation);
    assert_eq!(engine.count(), 1);
}

#[test]
fn deleting_last_document_leaves_empty_index_of_same_dimension() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    {
        let engine = open(temp_dir.path());
        add(&engine, "B.txt", POLICY_B);
        engine.delete("B.txt").expect("delete succeeds");
        assert_eq!(engine.count(), 0);
        assert_eq!(engine.dimension(), DIM);
        assert!(engine.search(POLICY_B, 5).expect("search succeeds").is_empty());
    }

    let reopened = open(temp_dir.path());
    assert_eq!(reopened.count(), 0);
    assert_eq!(reopened.dimension(), DIM);
    assert!(reopened.generation() > 0);
}

#[test]
fn persisted_state_survives_reopen() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let (snapshot, hits) = {
        let engine = open(temp_dir.path());
        add(&engine, "A.txt", &words("w", 520));
        add(&engine, "B.txt", POLICY_B);
        (engine.snapshot(), engine.search("w3 w4 remote", 3).expect("search"))
    };

    let reopened = open(temp_dir.path());
    let reloaded = reopened.snapshot();
    assert_eq!(reloaded.index, snapshot.index);
    assert_eq!(reloaded.metadata, snapshot.metadata);
    assert_eq!(reloaded.generation, snapshot.generation);
    assert_eq!(reopened.search("w3 w4 remote", 3).expect("search"), hits);
}

#[test]
fn reopening_with_another_dimension_fails() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    add(&open(temp_dir.path()), "B.txt", POLICY_B);

    let result = VectorStoreEngine::open(
        HashingEmbedder::new(DIM / 2).expect("valid dimension"),
        ChunkingConfig::default(),
        temp_dir.path(),
    );
    let err = result.err().expect("dimension differs");
    assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
}

#[test]
fn invalid_chunking_is_rejected_at_open() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let result = VectorStoreEngine::open(hashing(), ChunkingConfig::new(10, 10), temp_dir.path());
    let err = result.err().expect("overlap equals chunk size");
    assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
}

#[test]
fn empty_document_is_rejected() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path());

    let err = engine.ingest("blank.txt", " \n\t ").expect_err("no words");
    assert_eq!(err.kind(), ErrorKind::EmptyDocument);
    assert_eq!(engine.generation(), 0);
}

#[test]
fn embedding_failure_writes_nothing() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = VectorStoreEngine::open(FailingEmbedder, ChunkingConfig::default(), temp_dir.path())
        .expect("engine opens");

    let err = engine.ingest("B.txt", POLICY_B).expect_err("embedder fails");
    assert_eq!(err.kind(), ErrorKind::EmbeddingFailure);
    assert_eq!(engine.count(), 0);
    assert!(!temp_dir.path().join("vector_store").join("CURRENT").exists());
}

#[test]
fn wrong_vector_length_is_a_dimension_mismatch() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = VectorStoreEngine::open(LyingEmbedder, ChunkingConfig::default(), temp_dir.path())
        .expect("engine opens");

    let err = engine.ingest("B.txt", POLICY_B).expect_err("vectors too short");
    assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
    assert_eq!(engine.count(), 0);
}

#[test]
fn persist_failure_keeps_previous_state() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path());
    add(&engine, "B.txt", POLICY_B);
    let before = engine.snapshot();

    let blocker = temp_dir
        .path()
        .join("vector_store")
        .join(format!("gen-{:020}", before.generation + 1));
    std::fs::write(&blocker, b"in the way").expect("should write blocker");

    let err = engine
        .ingest("C.txt", "a completely different document")
        .expect_err("generation directory is blocked");
    assert_eq!(err.kind(), ErrorKind::PersistFailure);
    assert_eq!(*engine.snapshot(), *before);

    std::fs::remove_file(&blocker).expect("should remove blocker");
    let reopened = open(temp_dir.path());
    assert_eq!(reopened.snapshot().metadata, before.metadata);
}

#[test]
fn ingest_file_stores_and_indexes() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path().join("home").as_path());

    let source = temp_dir.path().join("policy.txt");
    std::fs::write(&source, POLICY_B).expect("should write source");

    let report = engine.ingest_file(&source, None).expect("ingest succeeds");
    assert_eq!(report.document_id, "policy.txt");
    assert!(engine.documents().exists("policy.txt").expect("valid id"));

    let err = engine
        .ingest_file(&source, None)
        .expect_err("id already stored");
    assert_eq!(err.kind(), ErrorKind::DuplicateDocument);

    let renamed = engine
        .ingest_file(&source, Some("renamed.txt"))
        .expect("new id succeeds");
    assert_eq!(renamed.document_id, "renamed.txt");
    assert_eq!(engine.count(), 2);
}

#[test]
fn ingest_file_failure_removes_artifact() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path().join("home").as_path());

    let blank = temp_dir.path().join("blank.txt");
    std::fs::write(&blank, "   ").expect("should write source");
    let err = engine.ingest_file(&blank, None).expect_err("no text");
    assert_eq!(err.kind(), ErrorKind::EmptyDocument);
    assert!(!engine.documents().exists("blank.txt").expect("valid id"));

    let pdf = temp_dir.path().join("policy.pdf");
    std::fs::write(&pdf, b"%PDF").expect("should write source");
    let err = engine.ingest_file(&pdf, None).expect_err("pdf unsupported");
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    assert!(engine.documents().list().expect("listable").is_empty());
}

#[test]
fn list_documents_joins_counts_and_artifacts() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path());
    add(&engine, "b.txt", &words("w", 520));
    add(&engine, "a.txt", POLICY_B);
    engine
        .documents()
        .save("unindexed.txt", b"stored only")
        .expect("artifact saved");
    engine.ingest("ghost.txt", "indexed without artifact").expect("ingest");

    let listed = engine.list_documents().expect("listable");
    let rows: Vec<(&str, usize, bool)> = listed
        .iter()
        .map(|d| (d.id.as_str(), d.chunks, d.size.is_some()))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("a.txt", 1, true),
            ("b.txt", 2, true),
            ("unindexed.txt", 0, true),
            ("ghost.txt", 1, false)
        ]
    );

    let report = engine.consistency_report().expect("report");
    assert!(!report.is_consistent);
    assert_eq!(report.documents_without_artifact, vec!["ghost.txt".to_string()]);
    assert_eq!(report.artifacts_without_chunks, vec!["unindexed.txt".to_string()]);
}

#[test]
fn engines_sharing_a_directory_see_each_others_writes() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let writer = open(temp_dir.path());
    let reader = open(temp_dir.path());

    add(&writer, "B.txt", POLICY_B);
    let hits = reader.search(POLICY_B, 1).expect("search succeeds");
    assert_eq!(hits[0].filename, "B.txt");
    assert_eq!(reader.generation(), writer.generation());

    // The reader's delete must rebuild from the writer's generation
    add(&writer, "C.txt", "expense reports are due friday");
    reader.delete("B.txt").expect("delete succeeds");
    writer.refresh().expect("refresh succeeds");
    assert_eq!(writer.count(), 1);
    assert_eq!(writer.snapshot().metadata.records()[0].filename, "C.txt");
}

#[test]
fn concurrent_ingest_and_search_stay_consistent() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = Arc::new(open(temp_dir.path()));

    let writers: Vec<_> = (0..4)
        .map(|i| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let id = format!("doc{}.txt", i);
                add(engine.as_ref(), &id, &words(&format!("d{}x", i), 120));
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for _ in 0..20 {
                    let snapshot = engine.snapshot();
                    assert_eq!(snapshot.index.count(), snapshot.metadata.len());
                    engine.search("d1x5 d2x7", 3).expect("search succeeds");
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().expect("thread should not panic");
    }

    assert_eq!(engine.count(), 4);
    assert_eq!(engine.list_documents().expect("listable").len(), 4);
    assert!(engine.consistency_report().expect("report").is_consistent);
}

#[test]
fn rebuild_index_keeps_survivors_in_order() {
    let mut index = FlatIndex::new(2).expect("valid dimension");
    index
        .add(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]])
        .expect("vectors fit");

    let rebuilt = rebuild_index(&index, &[0, 2]).expect("positions exist");
    assert_eq!(rebuilt.count(), 2);
    assert_eq!(rebuilt.reconstruct(1).expect("position 1"), vec![0.6, 0.8]);

    let emptied = rebuild_index(&index, &[]).expect("nothing kept");
    assert!(emptied.is_empty());
    assert_eq!(emptied.dimension(), 2);

    let err = rebuild_index(&index, &[3]).expect_err("position 3 missing");
    assert_eq!(err.kind(), ErrorKind::OutOfRange);
}

#[test]
fn replace_file_swaps_chunks_in_one_generation() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path().join("home").as_path());
    add(&engine, "A.txt", &words("a", 520));

    let source = temp_dir.path().join("leave.txt");
    std::fs::write(&source, "annual leave is twenty days per year").expect("should write source");
    engine.ingest_file(&source, None).expect("ingest succeeds");
    let before = engine.generation();

    std::fs::write(&source, "annual leave is twenty five days per year").expect("should write source");
    let report = engine
        .replace_file("leave.txt", &source)
        .expect("replace succeeds");
    assert_eq!(report.removed_chunks, 1);
    assert_eq!(report.chunks_indexed, 1);
    assert_eq!(engine.generation(), before + 1);

    let snapshot = engine.snapshot();
    let filenames: Vec<&str> = snapshot
        .metadata
        .records()
        .iter()
        .map(|r| r.filename.as_str())
        .collect();
    assert_eq!(filenames, vec!["A.txt", "A.txt", "leave.txt"]);
    assert!(snapshot.metadata.records()[2].text.contains("five"));
    assert_aligned(&engine);

    let stored = std::fs::read_to_string(
        engine.documents().path_for("leave.txt").expect("valid id"),
    )
    .expect("artifact readable");
    assert!(stored.contains("five"));
}

#[test]
fn rejected_replacement_keeps_previous_version() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path().join("home").as_path());

    let source = temp_dir.path().join("leave.txt");
    std::fs::write(&source, "annual leave is twenty days per year").expect("should write source");
    engine.ingest_file(&source, None).expect("ingest succeeds");
    let before = engine.snapshot();

    let pdf = temp_dir.path().join("leave.pdf");
    std::fs::write(&pdf, b"%PDF-1.7").expect("should write source");
    let err = engine
        .replace_file("leave.txt", &pdf)
        .expect_err("pdf unsupported");
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);

    let blank = temp_dir.path().join("blank.txt");
    std::fs::write(&blank, "  \n ").expect("should write source");
    let err = engine
        .replace_file("leave.txt", &blank)
        .expect_err("no text");
    assert_eq!(err.kind(), ErrorKind::EmptyDocument);

    assert_eq!(*engine.snapshot(), *before);
    assert!(engine.documents().exists("leave.txt").expect("valid id"));
    assert_eq!(engine.search("annual leave", 1).expect("search").len(), 1);
}

#[test]
fn replace_unknown_document_is_not_found() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path());

    let source = temp_dir.path().join("leave.txt");
    std::fs::write(&source, POLICY_B).expect("should write source");

    for id in ["missing.txt", "../escape"] {
        let err = engine.replace_file(id, &source).expect_err("nothing to replace");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    assert_eq!(engine.count(), 0);
}

#[test]
fn concurrent_uploads_of_one_id_store_it_once() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = Arc::new(open(temp_dir.path().join("home").as_path()));

    let source = temp_dir.path().join("policy.txt");
    std::fs::write(&source, POLICY_B).expect("should write source");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let source = source.clone();
            std::thread::spawn(move || engine.ingest_file(&source, None))
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread should not panic"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(result.kind(), ErrorKind::DuplicateDocument);
    }

    assert_eq!(engine.count(), 1);
    assert!(engine.documents().exists("policy.txt").expect("valid id"));
    assert!(engine.consistency_report().expect("report").is_consistent);
}

#[test]
fn held_writer_lock_times_out_without_writing() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let engine = open(temp_dir.path()).with_lock_options(LockOptions {
        timeout: std::time::Duration::from_millis(50),
        ..LockOptions::default()
    });
    assert_eq!(engine.embedder().dimension(), DIM);
    assert_eq!(engine.chunking(), ChunkingConfig::default());

    let lock_path = temp_dir.path().join("vector_store").join(".writer.lock");
    let held = WriterLock::acquire(&lock_path, LockOptions::default()).expect("lock is free");

    let err = engine.ingest("B.txt", POLICY_B).expect_err("lock is held");
    assert_eq!(err.kind(), ErrorKind::PersistFailure);
    assert_eq!(engine.count(), 0);

    drop(held);
    add(&engine, "B.txt", POLICY_B);
    assert_eq!(engine.count(), 1);
}
