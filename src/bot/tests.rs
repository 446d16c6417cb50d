use std::fs;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use super::*;
use crate::llm::types::ChatRequest;
use crate::retriever::{write_artifacts, ChunkRecord};

/// Provider stub with a fixed query embedding and a canned chat outcome.
/// Every chat request is recorded for inspection.
struct StubProvider {
    query_vector: Vec<f32>,
    reply: Result<String, String>,
    seen_requests: Mutex<Vec<ChatRequest>>,
}

impl StubProvider {
    fn new(query_vector: Vec<f32>, reply: &str) -> Self {
        Self {
            query_vector,
            reply: Ok(reply.to_string()),
            seen_requests: Mutex::new(Vec::new()),
        }
    }

    fn failing(query_vector: Vec<f32>, error: &str) -> Self {
        Self {
            query_vector,
            reply: Err(error.to_string()),
            seen_requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.seen_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn chat(&self, request: ChatRequest, _model_id: &str) -> Result<String, ApiError> {
        self.seen_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        self.reply.clone().map_err(ApiError::Upstream)
    }

    async fn embed(&self, inputs: &[String], _model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        Ok(inputs.iter().map(|_| self.query_vector.clone()).collect())
    }
}

/// Provider that must never be reached; short-circuit paths use it.
struct PanickingProvider;

#[async_trait]
impl LlmProvider for PanickingProvider {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn chat(&self, _request: ChatRequest, _model_id: &str) -> Result<String, ApiError> {
        panic!("chat must not be called on this path");
    }

    async fn embed(&self, _inputs: &[String], _model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        panic!("embed must not be called on this path");
    }
}

fn test_settings(tmp: &TempDir) -> Settings {
    Settings {
        openai_api_key: "test-key".to_string(),
        index_dir: tmp.path().join("index"),
        kb_dir: tmp.path().join("kb"),
        tickets_path: tmp.path().join("tickets.jsonl"),
        log_dir: tmp.path().join("logs"),
        ..Settings::default()
    }
}

fn seed_index(settings: &Settings, entries: &[(&str, &str, Vec<f32>)]) {
    fs::create_dir_all(&settings.index_dir).expect("index dir");
    let records: Vec<ChunkRecord> = entries
        .iter()
        .map(|(text, source, _)| ChunkRecord::new(*text, source))
        .collect();
    let vectors: Vec<Vec<f32>> = entries.iter().map(|(_, _, vec)| vec.clone()).collect();
    write_artifacts(&settings.index_dir, &vectors, &records).expect("write artifacts");
}

fn make_bot(settings: Settings, provider: Arc<dyn LlmProvider>) -> (AnswerBot, MemoryStore) {
    let history = MemoryStore::new();
    let bot = AnswerBot::new(Arc::new(settings), provider, history.clone());
    (bot, history)
}

// cos(query, [1, 0]) == target once both are unit length
fn query_with_similarity(target: f32) -> Vec<f32> {
    vec![target, (1.0 - target * target).sqrt()]
}

const REFUND_REPLY: &str =
    r#"{"answer":"5 business days","action":"OK","confidence":0.9,"sources":["faq.md"]}"#;

#[tokio::test]
async fn empty_question_short_circuits_without_any_calls() {
    let tmp = TempDir::new().expect("tempdir");
    let (bot, history) = make_bot(test_settings(&tmp), Arc::new(PanickingProvider));

    for question in ["", "   ", "\n\t "] {
        let response = bot.answer(question, "s1").await;
        assert_eq!(response.answer, EMPTY_QUESTION_MESSAGE);
        assert_eq!(response.action, Action::Ok);
        assert_eq!(response.confidence, 0.0);
        assert!(response.sources.is_empty());
        assert_eq!(response.top_score, 0.0);
    }
    assert_eq!(history.message_count("s1"), 0);
}

#[tokio::test]
async fn missing_credential_short_circuits_without_any_calls() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = Settings {
        openai_api_key: String::new(),
        ..test_settings(&tmp)
    };
    let (bot, history) = make_bot(settings, Arc::new(PanickingProvider));

    let response = bot.answer("How long do refunds take?", "s1").await;
    assert_eq!(response.answer, MISSING_KEY_MESSAGE);
    assert_eq!(response.action, Action::Ok);
    assert_eq!(response.confidence, 0.0);
    assert_eq!(history.message_count("s1"), 0);
}

#[tokio::test]
async fn missing_index_yields_rebuild_guidance() {
    let tmp = TempDir::new().expect("tempdir");
    let provider = Arc::new(StubProvider::new(vec![1.0, 0.0], REFUND_REPLY));
    let (bot, history) = make_bot(test_settings(&tmp), provider);

    let response = bot.answer("How long do refunds take?", "s1").await;
    assert!(response.answer.contains("Rebuild"));
    assert_eq!(response.action, Action::Ok);
    assert_eq!(history.message_count("s1"), 0);
}

#[tokio::test]
async fn answers_from_the_knowledge_base() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = test_settings(&tmp);
    seed_index(
        &settings,
        &[("Refunds take 5 business days.", "faq.md", vec![1.0, 0.0])],
    );

    let provider = Arc::new(StubProvider::new(query_with_similarity(0.81), REFUND_REPLY));
    let (bot, _history) = make_bot(settings, provider);

    let response = bot.answer("How long do refunds take?", "s1").await;
    assert_eq!(response.answer, "5 business days");
    assert_eq!(response.action, Action::Ok);
    assert_eq!(response.confidence, 0.9);
    assert_eq!(response.sources, vec!["faq.md".to_string()]);
    assert!((response.top_score - 0.81).abs() < 1e-4);
}

#[tokio::test]
async fn low_similarity_forces_ticket_over_model_opinion() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = test_settings(&tmp);
    seed_index(
        &settings,
        &[("Refunds take 5 business days.", "faq.md", vec![1.0, 0.0])],
    );

    // The model (wrongly) claims everything is fine; top_score 0.1 < 0.25.
    let reply = r#"{"answer":"Everything is fine.","action":"OK","confidence":0.8,"sources":[]}"#;
    let provider = Arc::new(StubProvider::new(query_with_similarity(0.1), reply));
    let (bot, _history) = make_bot(settings, provider);

    let response = bot.answer("Something unrelated?", "s1").await;
    assert_eq!(response.action, Action::Ticket);
    assert!(response.answer.contains("Everything is fine."));
    assert!(response.answer.contains(TICKET_OFFER_MESSAGE));
}

#[tokio::test]
async fn ticket_offer_is_not_duplicated_when_model_already_mentions_it() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = test_settings(&tmp);
    seed_index(
        &settings,
        &[("Refunds take 5 business days.", "faq.md", vec![1.0, 0.0])],
    );

    let reply =
        r#"{"answer":"I do not know; I can open a ticket for you.","action":"TICKET","confidence":0.2,"sources":[]}"#;
    let provider = Arc::new(StubProvider::new(query_with_similarity(0.1), reply));
    let (bot, _history) = make_bot(settings, provider);

    let response = bot.answer("Something unrelated?", "s1").await;
    assert_eq!(response.action, Action::Ticket);
    assert!(!response.answer.contains(TICKET_OFFER_MESSAGE));
}

#[tokio::test]
async fn malformed_output_falls_back_to_raw_text_and_citations() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = test_settings(&tmp);
    seed_index(
        &settings,
        &[("Refunds take 5 business days.", "faq.md", vec![1.0, 0.0])],
    );

    let provider = Arc::new(StubProvider::new(
        query_with_similarity(0.9),
        "Refunds are processed in about a week.",
    ));
    let (bot, _history) = make_bot(settings, provider);

    let response = bot.answer("How long do refunds take?", "s1").await;
    assert_eq!(response.answer, "Refunds are processed in about a week.");
    assert_eq!(response.action, Action::Ok);
    assert_eq!(response.confidence, 0.0);
    assert_eq!(response.sources.len(), 1);
    assert!(response.sources[0].starts_with("faq.md: "));
}

#[tokio::test]
async fn empty_model_sources_fall_back_to_citations() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = test_settings(&tmp);
    seed_index(
        &settings,
        &[("Refunds take 5 business days.", "faq.md", vec![1.0, 0.0])],
    );

    let reply = r#"{"answer":"5 business days","action":"OK","confidence":0.9,"sources":[]}"#;
    let provider = Arc::new(StubProvider::new(query_with_similarity(0.9), reply));
    let (bot, _history) = make_bot(settings, provider);

    let response = bot.answer("How long do refunds take?", "s1").await;
    assert_eq!(response.sources.len(), 1);
    assert!(response.sources[0].starts_with("faq.md: Refunds take"));
}

#[tokio::test]
async fn model_error_is_terminal_and_leaves_history_untouched() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = test_settings(&tmp);
    seed_index(
        &settings,
        &[("Refunds take 5 business days.", "faq.md", vec![1.0, 0.0])],
    );

    let provider = Arc::new(StubProvider::failing(
        query_with_similarity(0.9),
        "connection reset",
    ));
    let (bot, history) = make_bot(settings, provider);

    let response = bot.answer("How long do refunds take?", "s1").await;
    assert!(response.answer.contains("Error while calling the model"));
    assert!(response.answer.contains("connection reset"));
    assert_eq!(response.action, Action::Ok);
    assert_eq!(response.confidence, 0.0);
    assert_eq!(history.message_count("s1"), 0);
}

#[tokio::test]
async fn confidence_is_clamped_to_unit_interval() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = test_settings(&tmp);
    seed_index(
        &settings,
        &[("Refunds take 5 business days.", "faq.md", vec![1.0, 0.0])],
    );

    let reply = r#"{"answer":"x","action":"OK","confidence":3.5,"sources":["faq.md"]}"#;
    let provider = Arc::new(StubProvider::new(query_with_similarity(0.9), reply));
    let (bot, _history) = make_bot(settings.clone(), provider);
    let response = bot.answer("q", "s1").await;
    assert_eq!(response.confidence, 1.0);

    let reply = r#"{"answer":"x","action":"OK","confidence":-0.5,"sources":["faq.md"]}"#;
    let provider = Arc::new(StubProvider::new(query_with_similarity(0.9), reply));
    let (bot, _history) = make_bot(settings, provider);
    let response = bot.answer("q", "s1").await;
    assert_eq!(response.confidence, 0.0);
}

#[tokio::test]
async fn history_records_the_post_processed_answer() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = test_settings(&tmp);
    seed_index(
        &settings,
        &[("Refunds take 5 business days.", "faq.md", vec![1.0, 0.0])],
    );

    let reply = r#"{"answer":"No idea.","action":"OK","confidence":0.1,"sources":[]}"#;
    let provider = Arc::new(StubProvider::new(query_with_similarity(0.1), reply));
    let (bot, history) = make_bot(settings, provider);

    bot.answer("Something unrelated?", "s1").await;

    let turns = history.get_history("s1");
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, "user");
    assert_eq!(turns[0].content, "Something unrelated?");
    assert_eq!(turns[1].role, "assistant");
    // The enforced ticket offer, not the raw model reply, lands in memory.
    assert!(turns[1].content.contains(TICKET_OFFER_MESSAGE));
}

#[tokio::test]
async fn sessions_are_isolated_and_history_reaches_the_prompt() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = test_settings(&tmp);
    seed_index(
        &settings,
        &[("Refunds take 5 business days.", "faq.md", vec![1.0, 0.0])],
    );

    let provider = Arc::new(StubProvider::new(query_with_similarity(0.9), REFUND_REPLY));
    let (bot, history) = make_bot(settings, provider.clone());

    bot.answer("How long do refunds take?", "alice").await;
    bot.answer("And for card payments?", "alice").await;
    bot.answer("How long do refunds take?", "bob").await;

    assert_eq!(history.message_count("alice"), 4);
    assert_eq!(history.message_count("bob"), 2);

    let requests = provider.requests();
    assert_eq!(requests.len(), 3);
    // First question in a session: system + question turn only.
    assert_eq!(requests[0].messages.len(), 2);
    // Second question in the same session carries the prior turn pair.
    assert_eq!(requests[1].messages.len(), 4);
    // A different session starts clean.
    assert_eq!(requests[2].messages.len(), 2);
    assert!(!requests[2]
        .messages
        .iter()
        .any(|m| m.content.contains("card payments")));
}

#[tokio::test]
async fn context_is_truncated_with_a_visible_marker() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = Settings {
        max_context_chars: 20,
        ..test_settings(&tmp)
    };
    seed_index(
        &settings,
        &[(
            "Refunds take 5 business days unless the bank is slow.",
            "faq.md",
            vec![1.0, 0.0],
        )],
    );

    let provider = Arc::new(StubProvider::new(query_with_similarity(0.9), REFUND_REPLY));
    let (bot, _history) = make_bot(settings, provider.clone());

    bot.answer("How long do refunds take?", "s1").await;

    let requests = provider.requests();
    let last_turn = &requests[0].messages.last().expect("question turn").content;
    assert!(last_turn.contains("...[truncated]"));
}

#[test]
fn previews_flatten_newlines_and_cap_length() {
    let long = "line one\nline two ".repeat(30);
    let flattened = preview(&long);
    assert!(!flattened.contains('\n'));
    assert!(flattened.ends_with("..."));
    assert_eq!(flattened.chars().count(), 203);
}

#[test]
fn truncate_is_a_no_op_under_the_budget() {
    assert_eq!(truncate("short".to_string(), 100), "short");
    let cut = truncate("x".repeat(10), 4);
    assert_eq!(cut, format!("xxxx{}", "\n...[truncated]"));
}
