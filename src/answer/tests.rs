use std::fs;
use std::path::Path;
use std::sync::Mutex;

use super::*;
use crate::config::IndexLocation;
use crate::corpus::CorpusLoad;
use crate::embeddings::{Embedder, EmbeddingMatrix};
use crate::index::build_from_corpus;
use tempfile::TempDir;

/// Embeds every text as `[len, 1]`
struct LengthEmbedder;

impl Embedder for LengthEmbedder {
    fn name(&self) -> &str {
        "test/length"
    }

    fn encode(&self, texts: &[String]) -> Result<EmbeddingMatrix> {
        EmbeddingMatrix::from_rows(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

/// Records prompts and replies with a fixed answer or error
struct RecordingGenerator {
    prompts: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingGenerator {
    fn replying() -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock").clone()
    }
}

impl Generator for RecordingGenerator {
    fn name(&self) -> &str {
        "test/recording"
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().expect("lock").push(prompt.to_string());
        if self.fail {
            Err(RagError::Generation("quota exceeded".to_string()))
        } else {
            Ok("Use a clip-on tuner.".to_string())
        }
    }
}

fn passage(text: &str, source: &str) -> RetrievedPassage {
    RetrievedPassage {
        text: text.to_string(),
        source: source.to_string(),
        distance: 0.0,
    }
}

fn write_chat(dir: &Path, name: &str, messages: &[(&str, &str)]) {
    let messages: Vec<serde_json::Value> = messages
        .iter()
        .map(|(sender, text)| serde_json::json!({"sender": sender, "text": text}))
        .collect();
    fs::write(
        dir.join(name),
        serde_json::json!({ "messages": messages }).to_string(),
    )
    .expect("write chat");
}

struct Fixture {
    composer: AnswerComposer,
    generator: Arc<RecordingGenerator>,
    chat_dir: PathBuf,
    _temp_dir: TempDir,
}

async fn fixture(generator: Arc<RecordingGenerator>, config: AnswerConfig) -> Fixture {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let chat_dir = temp_dir.path().join("saved_chats");
    fs::create_dir_all(&chat_dir).expect("mkdir");

    let location = IndexLocation {
        vectors_dir: temp_dir.path().join("index").join("vectors"),
        table: "chat_index".to_string(),
        sidecar_path: temp_dir.path().join("index").join("chat_meta.json"),
    };
    let load = CorpusLoad {
        documents: vec![
            Document::new("Tuning\nUse standard EADGBE.", "basics.txt"),
            Document::new("Chords\nStart with G, C and D.", "basics.txt"),
        ],
        ..CorpusLoad::default()
    };
    build_from_corpus(&location, load, &LengthEmbedder)
        .await
        .expect("build should succeed");

    let retriever = Arc::new(Retriever::new(location, Arc::new(LengthEmbedder)));
    let composer = AnswerComposer::new(
        retriever,
        Arc::clone(&generator) as Arc<dyn Generator>,
        chat_dir.clone(),
        config,
    );

    Fixture {
        composer,
        generator,
        chat_dir,
        _temp_dir: temp_dir,
    }
}

#[test]
fn remaining_chats_never_negative() {
    assert_eq!(remaining_chats(100, 0), 100);
    assert_eq!(remaining_chats(100, 42), 58);
    assert_eq!(remaining_chats(100, 100), 0);
    assert_eq!(remaining_chats(100, 250), 0);
}

#[test]
fn context_lists_chats_then_knowledge() {
    let chats = vec![Document::new("Try a lighter pick", "c1.json")];
    let passages = vec![passage("Capo\nRaises pitch.", "gear.txt")];

    let context = build_context(&chats, 7, &passages);

    assert_eq!(
        context,
        "### Saved Conversations (1 of 7):\n\n\
         Try a lighter pick (source: c1.json)\n\n\
         ### Relevant Knowledge:\n\n\
         Capo\nRaises pitch. (source: gear.txt)"
    );
}

#[test]
fn context_omits_empty_sections() {
    let passages = vec![passage("Strings", "gear.txt")];

    assert_eq!(
        build_context(&[], 0, &passages),
        "### Relevant Knowledge:\n\nStrings (source: gear.txt)"
    );
    assert_eq!(build_context(&[], 0, &[]), "");
}

#[test]
fn prompt_restricts_topic_and_ends_with_answer() {
    let config = AnswerConfig::default();
    let prompt = build_prompt(&config, "CTX", "How do I strum?");

    assert!(prompt.starts_with("You are a beginner guitar assistant."));
    assert!(prompt.contains("Only use guitar-related information."));
    assert!(prompt.contains("gracefully say you don't know"));
    assert!(prompt.contains("Context:\nCTX\n\nQuestion:\nHow do I strum?\n\nAnswer:"));
    assert!(prompt.ends_with("Answer:"));
}

#[test]
fn request_accepts_q_alias() {
    let request: RagRequest =
        serde_json::from_str(r#"{"q": "What is a capo?"}"#).expect("should parse");
    assert_eq!(request.query, "What is a capo?");
    assert_eq!(request.chat_filename, None);

    let request: RagRequest =
        serde_json::from_str(r#"{"query": "Hi", "chat_filename": "s.json"}"#).expect("parse");
    assert_eq!(request.chat_filename.as_deref(), Some("s.json"));
}

#[test]
fn request_with_both_query_keys() {
    let request: RagRequest =
        serde_json::from_str(r#"{"query": "Which strings?", "q": "ignored"}"#)
            .expect("both keys should parse");
    assert_eq!(request.query, "Which strings?");

    let request: RagRequest =
        serde_json::from_str(r#"{"query": "  ", "q": "Fallback"}"#).expect("should parse");
    assert_eq!(request.query, "Fallback");

    let request: RagRequest = serde_json::from_str("{}").expect("should parse");
    assert_eq!(request, RagRequest::default());
}

#[test]
fn error_response_serializes_flat() {
    let value = serde_json::to_value(RagResponse::error("boom")).expect("serialize");
    assert_eq!(value, serde_json::json!({"error": "boom"}));
}

#[tokio::test]
async fn blank_query_is_rejected_without_generation() {
    let fixture = fixture(RecordingGenerator::replying(), AnswerConfig::default()).await;

    let response = fixture.composer.handle(&RagRequest::new("   ")).await;

    assert_eq!(response, RagResponse::error(NO_QUERY_MESSAGE));
    assert!(fixture.generator.prompts().is_empty());
}

#[tokio::test]
async fn answer_carries_provenance_and_counts() {
    let fixture = fixture(RecordingGenerator::replying(), AnswerConfig::default()).await;
    write_chat(
        &fixture.chat_dir,
        "session.json",
        &[("user", "How do I tune?"), ("ai", "Use a tuner")],
    );

    let request = RagRequest {
        query: "How do I tune?".to_string(),
        chat_filename: Some("session.json".to_string()),
    };
    let response = fixture.composer.handle(&request).await;

    let RagResponse::Answer(answer) = response else {
        panic!("expected an answer, got {:?}", response);
    };
    assert_eq!(answer.answer, "Use a clip-on tuner.");
    assert_eq!(answer.total_chats, 1);
    assert_eq!(answer.remaining_chats, 99);

    let mut titles: Vec<&str> = answer
        .knowledge_docs
        .iter()
        .map(|doc| doc.title.as_str())
        .collect();
    titles.sort_unstable();
    assert_eq!(titles, vec!["Chords", "Tuning"]);
    assert!(answer.knowledge_docs.iter().all(|doc| doc.source == "basics.txt"));

    let session_ref = SourceRef {
        title: "session.json".to_string(),
        source: "session.json".to_string(),
    };
    assert_eq!(answer.saved_chats, vec![session_ref.clone(), session_ref]);

    let prompts = fixture.generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("### Saved Conversations (1 of 1):"));
    assert!(prompts[0].contains("Use a tuner (source: session.json)"));
    assert!(prompts[0].contains("### Relevant Knowledge:"));
    assert!(prompts[0].contains("Question:\nHow do I tune?"));
}

#[tokio::test]
async fn saved_chats_are_capped() {
    let config = AnswerConfig {
        saved_chat_limit: 2,
        ..AnswerConfig::default()
    };
    let fixture = fixture(RecordingGenerator::replying(), config).await;
    write_chat(
        &fixture.chat_dir,
        "long.json",
        &[("ai", "one"), ("ai", "two"), ("ai", "three")],
    );

    let summary = fixture.composer.saved_chat_summary();
    assert_eq!(summary.chats.len(), 2);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.remaining, 0);

    let request = RagRequest {
        query: "Strumming?".to_string(),
        chat_filename: Some("long.json".to_string()),
    };
    let RagResponse::Answer(answer) = fixture.composer.handle(&request).await else {
        panic!("expected an answer");
    };
    assert_eq!(answer.saved_chats.len(), 2);
    assert_eq!(answer.total_chats, 3);
    assert_eq!(answer.remaining_chats, 0);
    assert!(fixture.generator.prompts()[0].contains("(2 of 3)"));
}

#[tokio::test]
async fn generator_failure_becomes_error_payload() {
    let fixture = fixture(RecordingGenerator::failing(), AnswerConfig::default()).await;

    let response = fixture.composer.handle(&RagRequest::new("Hello?")).await;

    match response {
        RagResponse::Error { error } => assert!(error.contains("quota exceeded")),
        RagResponse::Answer(answer) => panic!("expected an error, got {:?}", answer),
    }
    assert_eq!(fixture.generator.prompts().len(), 1);
}

#[tokio::test]
async fn invalid_session_name_becomes_error_payload() {
    let fixture = fixture(RecordingGenerator::replying(), AnswerConfig::default()).await;

    let request = RagRequest {
        query: "Hello?".to_string(),
        chat_filename: Some("../etc/passwd".to_string()),
    };
    assert!(fixture.composer.handle(&request).await.is_error());
}

#[tokio::test]
async fn missing_index_becomes_error_payload() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let location = IndexLocation {
        vectors_dir: temp_dir.path().join("vectors"),
        table: "chat_index".to_string(),
        sidecar_path: temp_dir.path().join("chat_meta.json"),
    };
    let generator = RecordingGenerator::replying();
    let composer = AnswerComposer::new(
        Arc::new(Retriever::new(location, Arc::new(LengthEmbedder))),
        Arc::clone(&generator) as Arc<dyn Generator>,
        temp_dir.path().join("saved_chats"),
        AnswerConfig::default(),
    );

    assert!(composer.handle(&RagRequest::new("Hello?")).await.is_error());
    assert!(generator.prompts().is_empty());
}
