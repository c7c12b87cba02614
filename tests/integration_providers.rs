#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Full pipeline against a mocked Ollama server
// Blocking provider calls need the multi-threaded runtime so the mock keeps serving

use std::fs;

use ragchat::answer::{RagRequest, RagResponse};
use ragchat::commands::create_composer;
use ragchat::config::{Config, ProviderKind};
use ragchat::embeddings::create_embedder;
use ragchat::index::build_index;
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Embeds each input as `[mentions of "capo", mentions of "chord", 1]`
struct KeywordEmbeddings;

impl Respond for KeywordEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let embeddings: Vec<Vec<f32>> = body["input"]
            .as_array()
            .map(|inputs| {
                inputs
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|text| {
                        let lower = text.to_lowercase();
                        vec![
                            lower.matches("capo").count() as f32,
                            lower.matches("chord").count() as f32,
                            1.0,
                        ]
                    })
                    .collect()
            })
            .unwrap_or_default();

        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

fn ollama_config(server: &MockServer, base_dir: &std::path::Path) -> Config {
    let mut config = Config::load(base_dir).expect("defaults should load");
    config.embedding.provider = ProviderKind::Ollama;
    config.generation.provider = ProviderKind::Ollama;
    config.embedding.batch_size = 2;
    config.ollama.host = server.address().ip().to_string();
    config.ollama.port = server.address().port();
    config
}

fn write_corpus(config: &Config) {
    let text_dir = config.text_dir();
    fs::create_dir_all(&text_dir).expect("mkdir");
    fs::write(
        text_dir.join("gear.txt"),
        "Title: Capo\nContent: Clamp the capo near the fret.\n\n\
         Title: Chords\nContent: Practice one chord change at a time.\n\n\
         Title: Picks\nContent: Start with a medium pick.",
    )
    .expect("write corpus");
}

#[tokio::test(flavor = "multi_thread")]
async fn ollama_build_and_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(KeywordEmbeddings)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({"model": "llama3.2:latest", "stream": false})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"response": "Put the capo just behind the fret."})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = ollama_config(&server, temp_dir.path());
    write_corpus(&config);

    let embedder = create_embedder(&config).expect("embedder");
    let report = build_index(&config, embedder.as_ref())
        .await
        .expect("build should succeed");
    assert_eq!(report.indexed, 3);
    assert_eq!(report.dimension, 3);

    let composer = create_composer(&config).expect("composer");
    let response = composer
        .handle(&RagRequest::new("Which capo? Any capo?"))
        .await;

    let RagResponse::Answer(answer) = response else {
        panic!("expected an answer, got {:?}", response);
    };
    assert_eq!(answer.answer, "Put the capo just behind the fret.");
    assert_eq!(answer.knowledge_docs[0].title, "Capo");
    assert_eq!(answer.knowledge_docs[0].source, "gear.txt");
    assert_eq!(answer.total_chats, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn ollama_generation_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(KeywordEmbeddings)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = ollama_config(&server, temp_dir.path());
    write_corpus(&config);

    let embedder = create_embedder(&config).expect("embedder");
    build_index(&config, embedder.as_ref())
        .await
        .expect("build should succeed");

    let response = create_composer(&config)
        .expect("composer")
        .handle(&RagRequest::new("Which pick?"))
        .await;

    assert!(response.is_error());
}

#[tokio::test(flavor = "multi_thread")]
async fn embedding_outage_fails_build_after_one_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = ollama_config(&server, temp_dir.path());
    write_corpus(&config);

    let embedder = create_embedder(&config).expect("embedder");
    let result = build_index(&config, embedder.as_ref()).await;

    assert!(result.is_err());
    assert!(!config.index_location().sidecar_path.exists());
}
