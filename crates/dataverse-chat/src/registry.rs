//! Stream session registry: at most one live reveal loop per message.
//!
//! Starting a session for a message that already has one aborts the old loop
//! first, so two loops never write to the same message. Every session carries
//! a generation number; a loop only mutates the store while its ticket is
//! still the current one, which closes the window between `abort()` and the
//! aborted task actually stopping.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

use dataverse_core::types::MessageId;

/// Proof that a reveal loop owns the session for a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionTicket {
    pub id: MessageId,
    generation: u64,
}

struct ActiveSession {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct RegistryInner {
    next_generation: u64,
    sessions: HashMap<MessageId, ActiveSession>,
}

/// Map from message id to its running reveal loop.
///
/// Owned by the orchestrator and shared with the reveal engine. Mutation
/// discipline is "start replaces, cancel removes". Running sessions hold a
/// handle to the registry, so teardown goes through `cancel_all` rather than
/// `Drop`.
#[derive(Default)]
pub struct StreamRegistry {
    inner: Mutex<RegistryInner>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `run` as the session for `id`, cancelling any existing one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, id: MessageId, run: F) -> SessionTicket
    where
        F: FnOnce(SessionTicket) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.lock();
        if let Some(previous) = inner.sessions.remove(&id) {
            tracing::debug!(message_id = %id, generation = previous.generation, "replacing reveal session");
            previous.handle.abort();
        }

        inner.next_generation += 1;
        let ticket = SessionTicket {
            id,
            generation: inner.next_generation,
        };
        // The lock is held until the session is recorded, so the spawned loop
        // cannot observe itself as stale on its first tick.
        let handle = tokio::spawn(run(ticket));
        inner.sessions.insert(
            id,
            ActiveSession {
                generation: ticket.generation,
                handle,
            },
        );
        tracing::debug!(message_id = %id, generation = ticket.generation, "reveal session started");
        ticket
    }

    /// Cancel the session for `id`. Returns whether one was running.
    pub fn cancel(&self, id: MessageId) -> bool {
        match self.lock().sessions.remove(&id) {
            Some(session) => {
                session.handle.abort();
                tracing::debug!(message_id = %id, "reveal session cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every session. Returns how many were running.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(MessageId, ActiveSession)> = self.lock().sessions.drain().collect();
        let count = drained.len();
        for (_, session) in drained {
            session.handle.abort();
        }
        if count > 0 {
            tracing::debug!(count, "all reveal sessions cancelled");
        }
        count
    }

    /// Deregister a session that ran to completion. A stale ticket is ignored.
    pub fn finish(&self, ticket: SessionTicket) -> bool {
        let mut inner = self.lock();
        let current = inner
            .sessions
            .get(&ticket.id)
            .is_some_and(|s| s.generation == ticket.generation);
        if current {
            // Dropping the handle detaches the task; it is returning anyway.
            inner.sessions.remove(&ticket.id);
        }
        current
    }

    /// Run `f` only while `ticket` still owns its session.
    ///
    /// The registry stays locked for the duration of `f`, so a concurrent
    /// `start` or `cancel` either happens entirely before or entirely after.
    pub fn run_if_current<R>(&self, ticket: SessionTicket, f: impl FnOnce() -> R) -> Option<R> {
        let inner = self.lock();
        let current = inner
            .sessions
            .get(&ticket.id)
            .is_some_and(|s| s.generation == ticket.generation);
        current.then(f)
    }

    /// Whether a reveal loop is running for `id`.
    pub fn is_active(&self, id: MessageId) -> bool {
        self.lock().sessions.contains_key(&id)
    }

    /// Number of running reveal loops.
    pub fn active_count(&self) -> usize {
        self.lock().sessions.len()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // Every critical section leaves the map consistent, so a panic while
        // holding the lock does not invalidate it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn pending_forever() -> impl Future<Output = ()> + Send + 'static {
        std::future::pending::<()>()
    }

    #[tokio::test]
    async fn test_start_registers_session() {
        let registry = StreamRegistry::new();
        let id = MessageId::new();
        let ticket = registry.start(id, |_| pending_forever());
        assert_eq!(ticket.id, id);
        assert!(registry.is_active(id));
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn test_start_replaces_existing_session() {
        let registry = StreamRegistry::new();
        let id = MessageId::new();
        let first = registry.start(id, |_| pending_forever());
        let second = registry.start(id, |_| pending_forever());

        assert_ne!(first, second);
        assert_eq!(registry.active_count(), 1);
        assert!(registry.run_if_current(first, || ()).is_none());
        assert!(registry.run_if_current(second, || ()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_session_stops_running() {
        let registry = StreamRegistry::new();
        let id = MessageId::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ticks);
        registry.start(id, move |_| async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });
        tokio::time::sleep(Duration::from_millis(120)).await;
        let before = ticks.load(Ordering::SeqCst);
        assert!(before > 0);

        registry.start(id, |_| pending_forever());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_cancel_missing_id_is_noop() {
        let registry = StreamRegistry::new();
        assert!(!registry.cancel(MessageId::new()));
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_removes_session() {
        let registry = StreamRegistry::new();
        let id = MessageId::new();
        let ticket = registry.start(id, |_| pending_forever());
        assert!(registry.cancel(id));
        assert!(!registry.is_active(id));
        assert!(registry.run_if_current(ticket, || ()).is_none());
        assert!(!registry.cancel(id));
    }

    #[tokio::test]
    async fn test_cancel_all_leaves_nothing_pending() {
        let registry = StreamRegistry::new();
        for _ in 0..5 {
            registry.start(MessageId::new(), |_| pending_forever());
        }
        assert_eq!(registry.active_count(), 5);
        assert_eq!(registry.cancel_all(), 5);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.cancel_all(), 0);
    }

    #[tokio::test]
    async fn test_finish_ignores_stale_ticket() {
        let registry = StreamRegistry::new();
        let id = MessageId::new();
        let stale = registry.start(id, |_| pending_forever());
        let current = registry.start(id, |_| pending_forever());

        assert!(!registry.finish(stale));
        assert!(registry.is_active(id));
        assert!(registry.finish(current));
        assert!(!registry.is_active(id));
    }

    #[tokio::test]
    async fn test_session_can_deregister_itself() {
        let registry = Arc::new(StreamRegistry::new());
        let id = MessageId::new();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let reg = Arc::clone(&registry);
        registry.start(id, move |ticket| async move {
            let finished = reg.finish(ticket);
            let _ = done_tx.send(finished);
        });

        assert!(done_rx.await.unwrap());
        assert!(!registry.is_active(id));
    }
}
