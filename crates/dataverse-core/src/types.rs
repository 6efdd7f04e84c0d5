use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Text typed by the person using the client.
    User,
    /// Text generated by the backend.
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One of the three independently revealed text fields of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Narrative summary.
    Content,
    /// Generated query text.
    Detail,
    /// Rendered query result.
    Result,
}

impl Channel {
    /// All channels in the order a reveal tick visits them.
    pub const ALL: [Channel; 3] = [Channel::Content, Channel::Detail, Channel::Result];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Content => write!(f, "content"),
            Channel::Detail => write!(f, "detail"),
            Channel::Result => write!(f, "result"),
        }
    }
}

/// Lifecycle of a single submitted question.
///
/// ```text
/// Idle -> AwaitingAnswer -> RevealingAnswer -> ExecutingQuery -> RevealingResult -> Done
///              |                  |                  |
///              v                  v                  v
///            Failed             Done               Done (failure absorbed)
/// ```
///
/// Both reveal phases may also end in `Cancelled` when the session is torn
/// down or taken over before it finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangePhase {
    Idle,
    AwaitingAnswer,
    RevealingAnswer,
    ExecutingQuery,
    RevealingResult,
    Done,
    Failed,
    Cancelled,
}

impl ExchangePhase {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &ExchangePhase) -> bool {
        use ExchangePhase::*;
        matches!(
            (self, target),
            (Idle, AwaitingAnswer)
                | (AwaitingAnswer, RevealingAnswer)
                | (AwaitingAnswer, Failed)
                | (RevealingAnswer, ExecutingQuery)
                | (RevealingAnswer, Done)
                | (RevealingAnswer, Cancelled)
                | (ExecutingQuery, RevealingResult)
                | (ExecutingQuery, Done)
                | (RevealingResult, Done)
                | (RevealingResult, Cancelled)
                // Recovery back to the resting state
                | (Failed, Idle)
        )
    }

    /// Whether no further transition (other than recovery) is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExchangePhase::Done | ExchangePhase::Failed | ExchangePhase::Cancelled
        )
    }
}

impl fmt::Display for ExchangePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangePhase::Idle => "idle",
            ExchangePhase::AwaitingAnswer => "awaiting_answer",
            ExchangePhase::RevealingAnswer => "revealing_answer",
            ExchangePhase::ExecutingQuery => "executing_query",
            ExchangePhase::RevealingResult => "revealing_result",
            ExchangePhase::Done => "done",
            ExchangePhase::Failed => "failed",
            ExchangePhase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Newtype Wrappers
// =============================================================================

/// Unique identifier for a chat message. Immutable once assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unix timestamp in seconds since epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }
}

// =============================================================================
// Domain Structs
// =============================================================================

/// Title shown on the greeting that opens every conversation.
pub const WELCOME_TITLE: &str = "Welcome to DataVerse Chat";

/// Body of the greeting that opens every conversation.
pub const WELCOME_CONTENT: &str = "Hi there! Ask me anything about your data pipelines.\n\n\
I can help you explore datasets, generate SQL, or summarize experiments.";

const WELCOME_TOKENS: u32 = 386;

/// A single entry in the conversation.
///
/// The three text fields only ever grow by append while a reveal is running.
/// `detail` and `result` are absent until a reveal phase creates them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,
}

impl Message {
    /// A user message holding the trimmed question, titled with its first
    /// `title_max_chars` characters.
    pub fn user(question: &str, title_max_chars: usize) -> Self {
        let content = question.trim().to_string();
        let title: String = content.chars().take(title_max_chars).collect();
        Self {
            id: MessageId::new(),
            role: Role::User,
            content,
            detail: None,
            result: None,
            created_at: Timestamp::now(),
            title: Some(title),
            tokens: None,
        }
    }

    /// An empty assistant message ready to be revealed into.
    ///
    /// The detail field exists only when the answer carried a generated query.
    pub fn assistant(with_detail: bool) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: String::new(),
            detail: with_detail.then(String::new),
            result: None,
            created_at: Timestamp::now(),
            title: None,
            tokens: None,
        }
    }

    /// The greeting every fresh conversation starts with.
    pub fn welcome() -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: WELCOME_CONTENT.to_string(),
            detail: None,
            result: None,
            created_at: Timestamp::now(),
            title: Some(WELCOME_TITLE.to_string()),
            tokens: Some(WELCOME_TOKENS),
        }
    }

    /// Current text of a channel, if the field exists.
    pub fn field(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Content => Some(&self.content),
            Channel::Detail => self.detail.as_deref(),
            Channel::Result => self.result.as_deref(),
        }
    }

    /// Append a fragment to a channel, creating the field if it is absent.
    pub fn append(&mut self, channel: Channel, fragment: &str) {
        match channel {
            Channel::Content => self.content.push_str(fragment),
            Channel::Detail => self.detail.get_or_insert_with(String::new).push_str(fragment),
            Channel::Result => self.result.get_or_insert_with(String::new).push_str(fragment),
        }
    }

    /// Replace a channel's text outright. Used only to start a new reveal
    /// phase or to write a fallback sentence.
    pub fn reset(&mut self, channel: Channel, value: &str) {
        match channel {
            Channel::Content => self.content = value.to_string(),
            Channel::Detail => self.detail = Some(value.to_string()),
            Channel::Result => self.result = Some(value.to_string()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
