//! Terminal rendering of conversation events.
//!
//! Summary and result fragments are written as they arrive. Query fragments
//! interleave with the summary tick by tick, so they are held back and
//! printed as one block when the summary is done.

use std::io::{self, Write};

use dataverse_core::events::ChatEvent;
use dataverse_core::types::{Channel, ExchangePhase};

pub struct TerminalRenderer<W: Write> {
    out: W,
    pending_query: String,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            pending_query: String::new(),
        }
    }

    pub fn handle(&mut self, event: &ChatEvent) -> io::Result<()> {
        match event {
            ChatEvent::FragmentAppended {
                channel, fragment, ..
            } => match channel {
                Channel::Content | Channel::Result => write!(self.out, "{}", fragment)?,
                Channel::Detail => self.pending_query.push_str(fragment),
            },
            ChatEvent::FieldReset {
                channel: Channel::Result,
                value,
                ..
            } => {
                self.flush_query()?;
                write!(self.out, "{}", value)?;
            }
            ChatEvent::PhaseChanged { phase, .. } => match phase {
                ExchangePhase::ExecutingQuery => self.flush_query()?,
                ExchangePhase::Done | ExchangePhase::Cancelled => {
                    self.flush_query()?;
                    writeln!(self.out)?;
                }
                ExchangePhase::Failed => {
                    self.pending_query.clear();
                    writeln!(self.out, "Failed to fetch an answer. Please try again.")?;
                }
                _ => {}
            },
            ChatEvent::ConversationReset => {
                self.pending_query.clear();
                writeln!(self.out, "-- new chat --")?;
            }
            _ => return Ok(()),
        }
        self.out.flush()
    }

    fn flush_query(&mut self) -> io::Result<()> {
        if self.pending_query.is_empty() {
            return Ok(());
        }
        let query = std::mem::take(&mut self.pending_query);
        write!(self.out, "\n\n```sql\n{}\n```", query)
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataverse_core::types::MessageId;

    fn fragment(channel: Channel, text: &str) -> ChatEvent {
        ChatEvent::FragmentAppended {
            id: MessageId::new(),
            channel,
            fragment: text.to_string(),
        }
    }

    fn phase(phase: ExchangePhase) -> ChatEvent {
        ChatEvent::PhaseChanged {
            exchange: MessageId::new(),
            phase,
        }
    }

    fn render(events: &[ChatEvent]) -> String {
        let mut renderer = TerminalRenderer::new(Vec::new());
        for event in events {
            renderer.handle(event).unwrap();
        }
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn test_query_printed_after_summary() {
        let out = render(&[
            fragment(Channel::Content, "Here you "),
            fragment(Channel::Detail, "SELECT 1"),
            fragment(Channel::Content, "go"),
            phase(ExchangePhase::ExecutingQuery),
            ChatEvent::FieldReset {
                id: MessageId::new(),
                channel: Channel::Result,
                value: String::new(),
            },
            fragment(Channel::Result, "\n\n### Query Results\n"),
            fragment(Channel::Result, "No rows returned."),
            phase(ExchangePhase::Done),
        ]);
        assert_eq!(
            out,
            "Here you go\n\n```sql\nSELECT 1\n```\n\n### Query Results\nNo rows returned.\n"
        );
    }

    #[test]
    fn test_fallback_text_printed() {
        let out = render(&[ChatEvent::FieldReset {
            id: MessageId::new(),
            channel: Channel::Result,
            value: "Failed to execute query. Please try again.".to_string(),
        }]);
        assert_eq!(out, "Failed to execute query. Please try again.");
    }

    #[test]
    fn test_new_chat_drops_pending_query() {
        let out = render(&[
            fragment(Channel::Detail, "SELECT"),
            ChatEvent::ConversationReset,
            phase(ExchangePhase::Cancelled),
        ]);
        assert_eq!(out, "-- new chat --\n\n");
    }

    #[test]
    fn test_other_events_ignored() {
        let out = render(&[
            ChatEvent::RespondingChanged { responding: true },
            ChatEvent::ScrollToLatest { id: MessageId::new() },
        ]);
        assert!(out.is_empty());
    }
}
