//! End-to-end exchange tests against an in-memory backend.
//!
//! Each test builds its own orchestrator on the paused tokio clock, so reveal
//! ticks advance deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::broadcast::Receiver;

use dataverse_chat::{
    AnswerResponse, AssistantBackend, ChatError, ChatOrchestrator, QueryExecution,
};
use dataverse_core::config::StreamingConfig;
use dataverse_core::events::ChatEvent;
use dataverse_core::types::{Channel, ExchangePhase, Message, Role};

// =============================================================================
// Helpers
// =============================================================================

const QUESTION: &str = "How many users signed up last week?";

/// Backend returning canned responses and recording every executed query.
struct MockBackend {
    answer: AnswerResponse,
    execution: Result<QueryExecution, String>,
    latency: Duration,
    executed: Mutex<Vec<String>>,
}

impl MockBackend {
    fn new(summary: &str, sql: Option<&str>) -> Self {
        Self {
            answer: AnswerResponse {
                sql: sql.map(str::to_string),
                md_summary: Some(summary.to_string()),
                ..AnswerResponse::default()
            },
            execution: Ok(QueryExecution::default()),
            latency: Duration::from_millis(20),
            executed: Mutex::new(Vec::new()),
        }
    }

    fn with_rows(mut self, rows: serde_json::Value) -> Self {
        self.execution = Ok(serde_json::from_value(rows).unwrap());
        self
    }

    fn failing_execution(mut self) -> Self {
        self.execution = Err("connection refused".to_string());
        self
    }
}

#[async_trait]
impl AssistantBackend for MockBackend {
    async fn generate_answer(&self, _question: &str) -> Result<AnswerResponse, ChatError> {
        tokio::time::sleep(self.latency).await;
        Ok(self.answer.clone())
    }

    async fn execute_query(&self, query: &str) -> Result<QueryExecution, ChatError> {
        self.executed.lock().unwrap().push(query.to_string());
        tokio::time::sleep(self.latency).await;
        self.execution.clone().map_err(ChatError::Backend)
    }
}

fn make_chat(backend: Arc<MockBackend>) -> ChatOrchestrator {
    ChatOrchestrator::new(backend, StreamingConfig::default())
}

fn drain(rx: &mut Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn assistant_message(chat: &ChatOrchestrator) -> Message {
    chat.store()
        .snapshot()
        .into_iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .unwrap()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_answer_revealed_while_not_responding() {
    let backend = Arc::new(MockBackend::new("Here you go", Some("SELECT 1")));
    let chat = make_chat(Arc::clone(&backend));
    let mut rx = chat.subscribe();

    chat.set_draft(QUESTION).unwrap();
    let report = chat.submit().await.unwrap();

    let message = assistant_message(&chat);
    assert_eq!(message.content, "Here you go");
    assert_eq!(message.detail.as_deref(), Some("SELECT 1"));
    assert_eq!(report.phase, ExchangePhase::Done);
    assert!(!report.query_failed);
    assert_eq!(*backend.executed.lock().unwrap(), vec!["SELECT 1".to_string()]);

    // Every fragment lands while the responding flag is down.
    let mut responding = false;
    let mut fragments = 0;
    for event in drain(&mut rx) {
        match event {
            ChatEvent::RespondingChanged { responding: now } => responding = now,
            ChatEvent::FragmentAppended { .. } | ChatEvent::ScrollToLatest { .. } => {
                assert!(!responding, "fragment revealed while responding");
                fragments += 1;
            }
            _ => {}
        }
    }
    assert!(fragments > 0);
    assert!(!chat.is_responding());
}

#[tokio::test(start_paused = true)]
async fn test_responding_toggles_around_both_calls() {
    let backend = Arc::new(MockBackend::new("Here you go", Some("SELECT 1")));
    let chat = make_chat(backend);
    let mut rx = chat.subscribe();

    chat.set_draft(QUESTION).unwrap();
    chat.submit().await.unwrap();

    let toggles: Vec<bool> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            ChatEvent::RespondingChanged { responding } => Some(responding),
            _ => None,
        })
        .collect();
    assert_eq!(toggles, vec![true, false, true, false]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_row_set_reports_no_rows() {
    let backend = Arc::new(
        MockBackend::new("Nothing matched", Some("SELECT * FROM users WHERE 1 = 0"))
            .with_rows(json!({"data": [], "row_count": 0})),
    );
    let chat = make_chat(backend);

    chat.set_draft(QUESTION).unwrap();
    chat.submit().await.unwrap();

    let result = assistant_message(&chat).result.unwrap();
    assert!(result.ends_with("No rows returned."), "{:?}", result);
    assert!(result.contains("Rows returned: 0"));
}

#[tokio::test(start_paused = true)]
async fn test_execution_failure_writes_fallback() {
    let backend = Arc::new(MockBackend::new("Here you go", Some("SELECT 1")).failing_execution());
    let chat = make_chat(backend);

    chat.set_draft(QUESTION).unwrap();
    let report = chat.submit().await.unwrap();

    assert_eq!(
        assistant_message(&chat).result.as_deref(),
        Some("Failed to execute query. Please try again.")
    );
    assert!(!chat.is_responding());
    assert!(report.query_failed);
    assert_eq!(report.phase, ExchangePhase::Done);
    assert!(!report.history.contains(&ExchangePhase::RevealingResult));
}

#[tokio::test(start_paused = true)]
async fn test_rows_rendered_as_table_in_order() {
    let backend = Arc::new(
        MockBackend::new("Two rows", Some("SELECT a, b FROM t"))
            .with_rows(json!({"data": [{"a": 1, "b": "x"}, {"a": 2, "b": "y"}]})),
    );
    let chat = make_chat(backend);

    chat.set_draft(QUESTION).unwrap();
    chat.submit().await.unwrap();

    let result = assistant_message(&chat).result.unwrap();
    assert_eq!(
        result,
        "\n\n### Query Results\n| a | b |\n| --- | --- |\n| 1 | x |\n| 2 | y |"
    );
    let header = result.find("| a | b |").unwrap();
    let first = result.find("| 1 | x |").unwrap();
    let second = result.find("| 2 | y |").unwrap();
    assert!(header < first && first < second);
}

// =============================================================================
// Pipeline edges
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_answer_without_query_skips_execution() {
    let backend = Arc::new(MockBackend::new("Just prose, no query needed here", None));
    let chat = make_chat(Arc::clone(&backend));

    chat.set_draft(QUESTION).unwrap();
    let report = chat.submit().await.unwrap();

    let message = assistant_message(&chat);
    assert_eq!(message.content, "Just prose, no query needed here");
    assert!(message.detail.is_none());
    assert!(message.result.is_none());
    assert!(backend.executed.lock().unwrap().is_empty());
    assert_eq!(
        report.history,
        vec![
            ExchangePhase::Idle,
            ExchangePhase::AwaitingAnswer,
            ExchangePhase::RevealingAnswer,
            ExchangePhase::Done
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_crlf_query_normalised_and_revealed_whole() {
    let backend = Arc::new(MockBackend::new(
        "Here you go",
        Some("SELECT id,\r\n       email\r\nFROM users"),
    ));
    let chat = make_chat(Arc::clone(&backend));

    chat.set_draft(QUESTION).unwrap();
    chat.submit().await.unwrap();

    let message = assistant_message(&chat);
    assert_eq!(
        message.detail.as_deref(),
        Some("SELECT id,\n       email\nFROM users")
    );
    // The query is executed as returned.
    assert_eq!(
        backend.executed.lock().unwrap()[0],
        "SELECT id,\r\n       email\r\nFROM users"
    );
}

#[tokio::test(start_paused = true)]
async fn test_detail_fragments_are_whole_lines() {
    let sql = "SELECT name\nFROM pipelines\nWHERE status = 'failed'\nORDER BY name";
    let backend = Arc::new(MockBackend::new("Failed pipelines", Some(sql)));
    let chat = make_chat(backend);
    let mut rx = chat.subscribe();

    chat.set_draft(QUESTION).unwrap();
    chat.submit().await.unwrap();

    let detail_fragments: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            ChatEvent::FragmentAppended {
                channel: Channel::Detail,
                fragment,
                ..
            } => Some(fragment),
            _ => None,
        })
        .collect();
    assert_eq!(detail_fragments.concat(), sql);
    for fragment in &detail_fragments[..detail_fragments.len() - 1] {
        assert!(fragment.ends_with('\n'), "partial line: {:?}", fragment);
    }
}

#[tokio::test(start_paused = true)]
async fn test_reveal_takes_one_tick_per_fragment() {
    // 6 content fragments: 5 intervals after the immediate first tick.
    let backend = Arc::new(MockBackend::new(
        "alpha beta gamma delta epsilon zeta eta theta",
        None,
    ));
    let chat = make_chat(backend);

    chat.set_draft(QUESTION).unwrap();
    let start = tokio::time::Instant::now();
    chat.submit().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(elapsed, Duration::from_millis(20 + 5 * 50));
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_exchanges_keep_history() {
    let backend = Arc::new(MockBackend::new("Here you go", None));
    let chat = make_chat(backend);

    chat.set_draft("first question").unwrap();
    chat.submit().await.unwrap();
    chat.set_draft("second question").unwrap();
    chat.submit().await.unwrap();

    let roles: Vec<Role> = chat.store().snapshot().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::Assistant,
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant
        ]
    );
}
