#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Full pipeline tests against a mocked Ollama HTTP API, plus opt-in tests
// against a real instance.
// Run the real ones with: cargo test --test integration_ollama -- --ignored

use policy_rag::config::OllamaConfig;
use policy_rag::embeddings::chunking::ChunkingConfig;
use policy_rag::embeddings::{Embedder, HashingEmbedder, OllamaClient};
use policy_rag::engine::VectorStoreEngine;
use policy_rag::qa::{NO_CONTEXT_ANSWER, answer_question};
use serde_json::{Value, json};
use std::env;
use std::time::Duration;
use tempfile::TempDir;
use tracing::info;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const MOCK_DIMENSION: usize = 48;
const TEST_MODEL: &str = "all-minilm:latest";
const DEFAULT_OLLAMA_HOST: &str = "localhost";
const DEFAULT_OLLAMA_PORT: u16 = 11434;

/// Answers `/api/embed` with hashing-embedder vectors scaled by 3, so the
/// client has to normalize them
struct HashingResponder {
    embedder: HashingEmbedder,
}

impl Respond for HashingResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).expect("request body is json");
        let inputs: Vec<String> = body["input"]
            .as_array()
            .expect("input is an array")
            .iter()
            .map(|v| v.as_str().expect("input is text").to_string())
            .collect();

        let embeddings: Vec<Vec<f32>> = self
            .embedder
            .embed(&inputs)
            .expect("hashing never fails")
            .into_iter()
            .map(|v| v.into_iter().map(|x| x * 3.0).collect())
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok(); // Ignore error if already initialized
}

async fn mock_ollama() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(HashingResponder {
            embedder: HashingEmbedder::new(MOCK_DIMENSION).expect("valid dimension"),
        })
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "test-chat",
            "message": {"role": "assistant", "content": "Two days per week [remote.txt]."},
            "done": true
        })))
        .mount(&server)
        .await;

    server
}

fn mock_client(server: &MockServer) -> OllamaClient {
    let address = server.address();
    let config = OllamaConfig {
        host: address.ip().to_string(),
        port: address.port(),
        model: "test-embed".to_string(),
        batch_size: 2,
        embedding_dimension: MOCK_DIMENSION as u32,
        generation_model: "test-chat".to_string(),
        ..OllamaConfig::default()
    };
    OllamaClient::new(&config)
        .expect("Failed to create Ollama client")
        .with_retry_attempts(1)
}

#[tokio::test(flavor = "multi_thread")]
async fn ingest_search_and_answer_through_mocked_ollama() {
    init_test_tracing();
    let server = mock_ollama().await;
    let client = mock_client(&server);
    let temp_dir = TempDir::new().expect("should create temp dir");
    let base_dir = temp_dir.path().to_path_buf();

    let (hits, answer) = tokio::task::spawn_blocking(move || {
        let engine = VectorStoreEngine::open(client.clone(), ChunkingConfig::new(20, 5), &base_dir)
            .expect("engine opens");

        let long_text = (1..=50)
            .map(|i| format!("clause{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let report = engine.ingest("handbook.txt", &long_text).expect("ingest");
        // 50 words, windows of 20 stepping 15: starts at 0, 15, 30
        assert_eq!(report.chunks_indexed, 3);
        assert_eq!(report.dimension, MOCK_DIMENSION);

        engine
            .ingest("remote.txt", "employees may work remotely two days per week")
            .expect("ingest");

        let hits = engine
            .search("employees may work remotely two days per week", 2)
            .expect("search");
        let answer = answer_question(&engine, &client, "How many remote days?", 2).expect("answer");
        (hits, answer)
    })
    .await
    .expect("blocking task should not panic");

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].filename, "remote.txt");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert_eq!(answer.answer, "Two days per week [remote.txt].");
    assert!(!answer.context.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_store_never_calls_ollama() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let temp_dir = TempDir::new().expect("should create temp dir");
    let base_dir = temp_dir.path().to_path_buf();

    let answer = tokio::task::spawn_blocking(move || {
        let engine = VectorStoreEngine::open(client.clone(), ChunkingConfig::default(), &base_dir)
            .expect("engine opens");
        assert!(engine.search("anything", 5).expect("search").is_empty());
        answer_question(&engine, &client, "anything?", 5).expect("answer")
    })
    .await
    .expect("blocking task should not panic");

    assert_eq!(answer.answer, NO_CONTEXT_ANSWER);
}

#[tokio::test(flavor = "multi_thread")]
async fn embedding_outage_leaves_store_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let temp_dir = TempDir::new().expect("should create temp dir");
    let base_dir = temp_dir.path().to_path_buf();
    let store_dir = base_dir.join("vector_store");

    let kind = tokio::task::spawn_blocking(move || {
        let engine = VectorStoreEngine::open(client, ChunkingConfig::default(), &base_dir)
            .expect("engine opens");
        let err = engine.ingest("a.txt", "some text").expect_err("backend is down");
        assert_eq!(engine.count(), 0);
        err.kind()
    })
    .await
    .expect("blocking task should not panic");

    assert_eq!(kind, policy_rag::ErrorKind::EmbeddingFailure);
    assert!(!store_dir.join("CURRENT").exists());
}

fn real_client() -> OllamaClient {
    let host = env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string());
    let port = env::var("OLLAMA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_OLLAMA_PORT);
    let model = env::var("OLLAMA_MODEL").unwrap_or_else(|_| TEST_MODEL.to_string());

    let config = OllamaConfig {
        host,
        port,
        model,
        batch_size: 5, // Smaller batch size for testing
        ..OllamaConfig::default()
    };

    OllamaClient::new(&config)
        .expect("Failed to create Ollama client")
        .with_timeout(Duration::from_secs(60)) // Longer timeout for embedding generation
        .with_retry_attempts(3)
}

#[test]
#[ignore = "requires a running Ollama instance"]
fn real_ollama_health_check() {
    init_test_tracing();

    let client = real_client();
    info!("Testing health check against real Ollama instance");
    let result = client.health_check();

    assert!(
        result.is_ok(),
        "Health check should succeed with local Ollama: {:?}",
        result
    );
}

#[test]
#[ignore = "requires a running Ollama instance"]
fn real_ollama_embeddings_are_normalized() {
    init_test_tracing();

    let client = real_client();
    let texts = vec![
        "Employees accrue vacation monthly.".to_string(),
        "Expense reports are due on Fridays.".to_string(),
    ];
    let vectors = client.embed(&texts).expect("embedding should succeed");

    assert_eq!(vectors.len(), 2);
    for vector in &vectors {
        assert_eq!(vector.len(), client.dimension());
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
