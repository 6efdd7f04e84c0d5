//! Chat orchestrator: runs one question through answer, reveal, query, reveal.
//!
//! Owns the message store, the stream session registry and the reveal engine,
//! and talks to the backend through [`AssistantBackend`]. The "responding"
//! flag is set exactly while a backend call is outstanding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;

use dataverse_core::config::StreamingConfig;
use dataverse_core::events::ChatEvent;
use dataverse_core::types::{Channel, ExchangePhase, Message, MessageId};

use crate::backend::{AnswerResponse, AssistantBackend};
use crate::chunker::{chunk_by_whitespace, chunk_preserving_newlines, normalize_newlines};
use crate::error::ChatError;
use crate::registry::StreamRegistry;
use crate::reveal::{RevealEngine, RevealOutcome, RevealPlan};
use crate::state::ExchangeMachine;
use crate::store::MessageStore;
use crate::table::{result_section, QUERY_FAILED};

/// What happened to one submitted question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeReport {
    /// Id of the user message that started the exchange.
    pub exchange: MessageId,
    /// Id of the assistant message, once one was created.
    pub message: Option<MessageId>,
    /// Final phase.
    pub phase: ExchangePhase,
    /// Every phase visited, starting with `Idle`.
    pub history: Vec<ExchangePhase>,
    /// The query ran and failed; the fallback sentence was written instead.
    pub query_failed: bool,
}

/// Central coordinator for the conversation.
pub struct ChatOrchestrator {
    store: Arc<MessageStore>,
    registry: Arc<StreamRegistry>,
    engine: RevealEngine,
    backend: Arc<dyn AssistantBackend>,
    config: StreamingConfig,
    responding: AtomicBool,
    draft: Mutex<String>,
    selected: Mutex<Option<MessageId>>,
}

impl ChatOrchestrator {
    /// Create an orchestrator with a fresh conversation.
    pub fn new(backend: Arc<dyn AssistantBackend>, config: StreamingConfig) -> Self {
        Self::with_parts(
            Arc::new(MessageStore::new()),
            Arc::new(StreamRegistry::new()),
            backend,
            config,
        )
    }

    /// Create an orchestrator around an existing store and registry.
    pub fn with_parts(
        store: Arc<MessageStore>,
        registry: Arc<StreamRegistry>,
        backend: Arc<dyn AssistantBackend>,
        config: StreamingConfig,
    ) -> Self {
        let engine = RevealEngine::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Duration::from_millis(config.interval_ms),
        );
        Self {
            store,
            registry,
            engine,
            backend,
            config,
            responding: AtomicBool::new(false),
            draft: Mutex::new(String::new()),
            selected: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Receive every conversation event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.store.subscribe()
    }

    /// Whether a backend call is outstanding.
    pub fn is_responding(&self) -> bool {
        self.responding.load(Ordering::SeqCst)
    }

    /// Replace the draft text.
    pub fn set_draft(&self, text: &str) -> Result<(), ChatError> {
        *self.lock_draft()? = text.to_string();
        Ok(())
    }

    pub fn draft(&self) -> String {
        self.draft.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Show `id` in the detail panel.
    pub fn select(&self, id: MessageId) -> Result<(), ChatError> {
        if self.store.get(id).is_none() {
            return Err(ChatError::MessageNotFound(id));
        }
        *self.lock_selected()? = Some(id);
        self.store.notify(ChatEvent::SelectionChanged { id: Some(id) });
        Ok(())
    }

    pub fn clear_selection(&self) -> Result<(), ChatError> {
        *self.lock_selected()? = None;
        self.store.notify(ChatEvent::SelectionChanged { id: None });
        Ok(())
    }

    /// Live snapshot of the selected message, including text appended since
    /// it was selected.
    pub fn selected_message(&self) -> Option<Message> {
        let id = (*self.selected.lock().ok()?)?;
        self.store.get(id)
    }

    /// Start over: stop every reveal, restore the welcome message and clear
    /// the selection and the draft.
    pub fn new_chat(&self) -> Result<(), ChatError> {
        let cancelled = self.registry.cancel_all();
        self.store.reset()?;
        self.clear_selection()?;
        self.lock_draft()?.clear();
        tracing::info!(cancelled, "new chat started");
        Ok(())
    }

    /// Tear down: no reveal tick fires after this returns.
    pub fn shutdown(&self) {
        let cancelled = self.registry.cancel_all();
        tracing::info!(cancelled, "chat orchestrator shut down");
    }

    /// Submit the current draft and drive the exchange to its end.
    ///
    /// A failed answer fetch is returned as an error once the responding flag
    /// is cleared. A failed query execution is not an error: the fallback
    /// sentence is written into the result field and the report says so.
    pub async fn submit(&self) -> Result<ExchangeReport, ChatError> {
        let question = {
            let mut draft = self.lock_draft()?;
            if draft.trim().is_empty() {
                return Err(ChatError::EmptyMessage);
            }
            if self
                .responding
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Err(ChatError::Busy);
            }
            std::mem::take(&mut *draft)
        };
        let awaiting_answer = RespondingGuard { chat: self };

        let user = Message::user(&question, self.config.title_max_chars);
        let question = user.content.clone();
        let mut machine = ExchangeMachine::new(user.id);

        self.store.create(user)?;
        self.store.notify(ChatEvent::RespondingChanged { responding: true });
        self.advance(&mut machine, ExchangePhase::AwaitingAnswer)?;
        tracing::info!(exchange = %machine.exchange(), "question submitted");

        let answer = match self.backend.generate_answer(&question).await {
            Ok(answer) => answer,
            Err(e) => {
                drop(awaiting_answer);
                tracing::warn!(exchange = %machine.exchange(), error = %e, "failed to fetch answer");
                self.advance(&mut machine, ExchangePhase::Failed)?;
                self.advance(&mut machine, ExchangePhase::Idle)?;
                return Err(e);
            }
        };
        drop(awaiting_answer);

        let message_id = self.reveal_answer(&mut machine, &answer).await?;
        if machine.current().is_terminal() {
            return Ok(report(&machine, Some(message_id), false));
        }

        let Some(query) = answer.query() else {
            self.advance(&mut machine, ExchangePhase::Done)?;
            return Ok(report(&machine, Some(message_id), false));
        };

        let query_failed = self.run_query(&mut machine, message_id, query).await?;
        Ok(report(&machine, Some(message_id), query_failed))
    }

    /// Create the assistant message and reveal the summary and query into it.
    async fn reveal_answer(
        &self,
        machine: &mut ExchangeMachine,
        answer: &AnswerResponse,
    ) -> Result<MessageId, ChatError> {
        self.advance(machine, ExchangePhase::RevealingAnswer)?;

        let summary = normalize_newlines(answer.summary());
        let query = answer.query().map(normalize_newlines);

        let content = chunk_by_whitespace(&summary, self.config.content_chunk_size);
        let detail = query
            .as_deref()
            .map(|q| chunk_preserving_newlines(q, self.config.detail_chunk_size))
            .unwrap_or_default();

        let message = Message::assistant(query.is_some());
        let message_id = self.store.create(message)?;
        if answer.has_visible_query() {
            self.select(message_id)?;
        }

        let outcome = self
            .engine
            .reveal(message_id, RevealPlan::new(content, detail, Vec::new()))
            .await;
        if outcome == RevealOutcome::Cancelled {
            tracing::info!(message_id = %message_id, "answer reveal cancelled");
            self.advance(machine, ExchangePhase::Cancelled)?;
        }
        Ok(message_id)
    }

    /// Execute the generated query and reveal its rows. Returns whether the
    /// execution failed.
    async fn run_query(
        &self,
        machine: &mut ExchangeMachine,
        message_id: MessageId,
        query: &str,
    ) -> Result<bool, ChatError> {
        self.advance(machine, ExchangePhase::ExecutingQuery)?;
        self.store.reset_field(message_id, Channel::Result, "")?;
        self.set_responding(true);
        let executing = RespondingGuard { chat: self };

        let execution = match self.backend.execute_query(query).await {
            Ok(execution) => execution,
            Err(e) => {
                drop(executing);
                tracing::warn!(message_id = %message_id, error = %e, "failed to execute query");
                // The message is gone if the conversation was reset meanwhile.
                match self
                    .store
                    .reset_field(message_id, Channel::Result, QUERY_FAILED)
                {
                    Ok(()) | Err(ChatError::MessageNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                self.advance(machine, ExchangePhase::Done)?;
                return Ok(true);
            }
        };
        drop(executing);
        self.advance(machine, ExchangePhase::RevealingResult)?;

        let section = result_section(&execution.data, execution.row_count.as_ref());
        let chunks = chunk_preserving_newlines(&section, self.config.result_chunk_size);
        tracing::debug!(
            message_id = %message_id,
            rows = execution.data.len(),
            fragments = chunks.len(),
            "revealing query result"
        );

        let next = match self
            .engine
            .reveal(message_id, RevealPlan::result_only(chunks))
            .await
        {
            RevealOutcome::Completed => ExchangePhase::Done,
            RevealOutcome::Cancelled => ExchangePhase::Cancelled,
        };
        self.advance(machine, next)?;
        Ok(false)
    }

    fn advance(&self, machine: &mut ExchangeMachine, phase: ExchangePhase) -> Result<(), ChatError> {
        machine.transition(phase)?;
        self.store.notify(ChatEvent::PhaseChanged {
            exchange: machine.exchange(),
            phase,
        });
        Ok(())
    }

    fn set_responding(&self, responding: bool) {
        if self.responding.swap(responding, Ordering::SeqCst) != responding {
            self.store.notify(ChatEvent::RespondingChanged { responding });
        }
    }

    fn lock_draft(&self) -> Result<MutexGuard<'_, String>, ChatError> {
        self.draft
            .lock()
            .map_err(|e| ChatError::Store(format!("draft lock poisoned: {}", e)))
    }

    fn lock_selected(&self) -> Result<MutexGuard<'_, Option<MessageId>>, ChatError> {
        self.selected
            .lock()
            .map_err(|e| ChatError::Store(format!("selection lock poisoned: {}", e)))
    }
}

impl Drop for ChatOrchestrator {
    fn drop(&mut self) {
        self.registry.cancel_all();
    }
}

/// Lowers the responding flag when a backend call ends, including when the
/// awaiting future is dropped mid-call.
struct RespondingGuard<'a> {
    chat: &'a ChatOrchestrator,
}

impl Drop for RespondingGuard<'_> {
    fn drop(&mut self) {
        self.chat.set_responding(false);
    }
}

fn report(machine: &ExchangeMachine, message: Option<MessageId>, query_failed: bool) -> ExchangeReport {
    ExchangeReport {
        exchange: machine.exchange(),
        message,
        phase: machine.current(),
        history: machine.history().to_vec(),
        query_failed,
    }
}
