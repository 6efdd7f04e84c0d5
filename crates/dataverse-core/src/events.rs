use serde::{Deserialize, Serialize};

use crate::types::{Channel, ExchangePhase, MessageId};

/// Everything an observer of the conversation can see happen.
///
/// Events are emitted by the exchange pipeline and the reveal engine after
/// each mutation of the message store, and consumed by:
/// - The terminal renderer (fragments go straight to stdout)
/// - Any UI that needs to follow the latest message
/// - Tests asserting on ordering
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ChatEvent {
    /// A message was appended to the conversation.
    MessageCreated { id: MessageId },

    /// One reveal tick appended a fragment to a message field.
    FragmentAppended {
        id: MessageId,
        channel: Channel,
        fragment: String,
    },

    /// A message field was replaced outright (new phase or fallback text).
    FieldReset {
        id: MessageId,
        channel: Channel,
        value: String,
    },

    /// A reveal tick finished; observers should follow the latest output.
    ScrollToLatest { id: MessageId },

    /// The "assistant is responding" flag changed.
    RespondingChanged { responding: bool },

    /// The message shown in the detail panel changed.
    SelectionChanged { id: Option<MessageId> },

    /// An exchange moved to a new phase. `exchange` is the id of the user
    /// message that started it.
    PhaseChanged {
        exchange: MessageId,
        phase: ExchangePhase,
    },

    /// The conversation was reset to the greeting.
    ConversationReset,
}

impl ChatEvent {
    /// Returns a short event name for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            ChatEvent::MessageCreated { .. } => "message_created",
            ChatEvent::FragmentAppended { .. } => "fragment_appended",
            ChatEvent::FieldReset { .. } => "field_reset",
            ChatEvent::ScrollToLatest { .. } => "scroll_to_latest",
            ChatEvent::RespondingChanged { .. } => "responding_changed",
            ChatEvent::SelectionChanged { .. } => "selection_changed",
            ChatEvent::PhaseChanged { .. } => "phase_changed",
            ChatEvent::ConversationReset => "conversation_reset",
        }
    }

    /// The message this event concerns, if any.
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            ChatEvent::MessageCreated { id }
            | ChatEvent::FragmentAppended { id, .. }
            | ChatEvent::FieldReset { id, .. }
            | ChatEvent::ScrollToLatest { id } => Some(*id),
            ChatEvent::SelectionChanged { id } => *id,
            ChatEvent::PhaseChanged { exchange, .. } => Some(*exchange),
            ChatEvent::RespondingChanged { .. } | ChatEvent::ConversationReset => None,
        }
    }
}
