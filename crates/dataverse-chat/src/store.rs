//! The ordered conversation that reveals write into and observers watch.

use std::sync::Mutex;

use tokio::sync::broadcast;

use dataverse_core::events::ChatEvent;
use dataverse_core::types::{Channel, Message, MessageId};

use crate::error::ChatError;

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Ordered list of messages plus the broadcast channel that announces every
/// change to it.
///
/// Fields are only ever mutated through `create`, `append` and `reset_field`;
/// each mutation is followed by a matching [`ChatEvent`].
pub struct MessageStore {
    messages: Mutex<Vec<Message>>,
    events: broadcast::Sender<ChatEvent>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    /// A store holding only the welcome message.
    pub fn new() -> Self {
        Self::with_messages(vec![Message::welcome()])
    }

    /// A store seeded with the given messages.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            messages: Mutex::new(messages),
            events,
        }
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn notify(&self, event: ChatEvent) {
        tracing::trace!(event = event.event_name(), "chat event");
        let _ = self.events.send(event);
    }

    /// Append a message to the end of the conversation.
    pub fn create(&self, message: Message) -> Result<MessageId, ChatError> {
        let id = message.id;
        self.lock()?.push(message);
        self.notify(ChatEvent::MessageCreated { id });
        Ok(id)
    }

    /// Append a fragment to one field of a message.
    pub fn append(&self, id: MessageId, channel: Channel, fragment: &str) -> Result<(), ChatError> {
        self.with_message(id, |message| message.append(channel, fragment))?;
        self.notify(ChatEvent::FragmentAppended {
            id,
            channel,
            fragment: fragment.to_string(),
        });
        Ok(())
    }

    /// Replace one field of a message.
    pub fn reset_field(&self, id: MessageId, channel: Channel, value: &str) -> Result<(), ChatError> {
        self.with_message(id, |message| message.reset(channel, value))?;
        self.notify(ChatEvent::FieldReset {
            id,
            channel,
            value: value.to_string(),
        });
        Ok(())
    }

    /// Snapshot of a single message.
    pub fn get(&self, id: MessageId) -> Option<Message> {
        self.messages
            .lock()
            .ok()
            .and_then(|messages| messages.iter().find(|m| m.id == id).cloned())
    }

    /// Snapshot of the whole conversation, oldest first.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// Number of messages in the conversation.
    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the conversation and start over from the welcome message.
    pub fn reset(&self) -> Result<(), ChatError> {
        *self.lock()? = vec![Message::welcome()];
        self.notify(ChatEvent::ConversationReset);
        Ok(())
    }

    fn with_message<F>(&self, id: MessageId, f: F) -> Result<(), ChatError>
    where
        F: FnOnce(&mut Message),
    {
        let mut messages = self.lock()?;
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(ChatError::MessageNotFound(id))?;
        f(message);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Message>>, ChatError> {
        self.messages
            .lock()
            .map_err(|e| ChatError::Store(format!("message lock poisoned: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataverse_core::types::Role;

    #[test]
    fn test_new_store_has_welcome_message() {
        let store = MessageStore::new();
        let messages = store.snapshot();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].tokens, Some(386));
    }

    #[test]
    fn test_create_preserves_order() {
        let store = MessageStore::with_messages(vec![]);
        assert!(store.is_empty());
        let first = store.create(Message::user("first", 60)).unwrap();
        let second = store.create(Message::assistant(false)).unwrap();
        let ids: Vec<MessageId> = store.snapshot().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_append_accumulates() {
        let store = MessageStore::new();
        let id = store.create(Message::assistant(true)).unwrap();
        store.append(id, Channel::Content, "Here ").unwrap();
        store.append(id, Channel::Content, "you go").unwrap();
        store.append(id, Channel::Detail, "SELECT 1").unwrap();

        let message = store.get(id).unwrap();
        assert_eq!(message.content, "Here you go");
        assert_eq!(message.detail.as_deref(), Some("SELECT 1"));
        assert!(message.result.is_none());
    }

    #[test]
    fn test_append_unknown_message() {
        let store = MessageStore::new();
        let missing = MessageId::new();
        let err = store.append(missing, Channel::Content, "x").unwrap_err();
        assert!(matches!(err, ChatError::MessageNotFound(id) if id == missing));
    }

    #[test]
    fn test_reset_field_overwrites() {
        let store = MessageStore::new();
        let id = store.create(Message::assistant(true)).unwrap();
        store.append(id, Channel::Result, "partial").unwrap();
        store.reset_field(id, Channel::Result, "").unwrap();
        assert_eq!(store.get(id).unwrap().result.as_deref(), Some(""));
    }

    #[test]
    fn test_mutations_emit_events_in_order() {
        let store = MessageStore::new();
        let mut rx = store.subscribe();

        let id = store.create(Message::assistant(false)).unwrap();
        store.append(id, Channel::Content, "hi").unwrap();
        store.reset_field(id, Channel::Result, "").unwrap();

        assert_eq!(rx.try_recv().unwrap(), ChatEvent::MessageCreated { id });
        assert_eq!(
            rx.try_recv().unwrap(),
            ChatEvent::FragmentAppended {
                id,
                channel: Channel::Content,
                fragment: "hi".to_string()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ChatEvent::FieldReset {
                id,
                channel: Channel::Result,
                value: String::new()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notify_without_subscribers_is_fine() {
        let store = MessageStore::new();
        store.notify(ChatEvent::ConversationReset);
    }

    #[test]
    fn test_reset_restores_welcome() {
        let store = MessageStore::new();
        store.create(Message::user("hello", 60)).unwrap();
        assert_eq!(store.len(), 2);

        store.reset().unwrap();
        let messages = store.snapshot();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].title.as_deref(), Some("Welcome to DataVerse Chat"));
    }
}
