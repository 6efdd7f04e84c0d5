//! Reveal engine: appends pre-chunked text to a message one tick at a time.
//!
//! Each tick advances up to three independent cursors (content, detail,
//! result). A channel with fewer fragments simply finishes early; there is no
//! barrier between channels. The cursor arithmetic lives in
//! [`RevealCursors`] and never touches the store, so the only side effects are
//! the appends and the scroll notification in [`run_session`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use dataverse_core::events::ChatEvent;
use dataverse_core::types::{Channel, MessageId};

use crate::error::ChatError;
use crate::registry::{SessionTicket, StreamRegistry};
use crate::store::MessageStore;

/// Fragment sequences for one reveal, one per channel. Any may be empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RevealPlan {
    pub content: Vec<String>,
    pub detail: Vec<String>,
    pub result: Vec<String>,
}

impl RevealPlan {
    pub fn new(content: Vec<String>, detail: Vec<String>, result: Vec<String>) -> Self {
        Self {
            content,
            detail,
            result,
        }
    }

    /// A plan that only reveals into the result field.
    pub fn result_only(result: Vec<String>) -> Self {
        Self {
            result,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.detail.is_empty() && self.result.is_empty()
    }

    pub fn sequence(&self, channel: Channel) -> &[String] {
        match channel {
            Channel::Content => &self.content,
            Channel::Detail => &self.detail,
            Channel::Result => &self.result,
        }
    }
}

/// Per-channel read positions into a [`RevealPlan`].
#[derive(Clone, Debug)]
pub struct RevealCursors {
    plan: RevealPlan,
    positions: [usize; 3],
}

impl RevealCursors {
    pub fn new(plan: RevealPlan) -> Self {
        Self {
            plan,
            positions: [0; 3],
        }
    }

    /// Take the next fragment from every channel that still has one.
    pub fn step(&mut self) -> Vec<(Channel, String)> {
        let mut fragments = Vec::with_capacity(3);
        for channel in Channel::ALL {
            let position = self.positions[slot(channel)];
            if let Some(fragment) = self.plan.sequence(channel).get(position) {
                fragments.push((channel, fragment.clone()));
                self.positions[slot(channel)] = position + 1;
            }
        }
        fragments
    }

    /// Fragments not yet taken from `channel`.
    pub fn remaining(&self, channel: Channel) -> usize {
        self.plan.sequence(channel).len() - self.positions[slot(channel)]
    }

    pub fn is_exhausted(&self) -> bool {
        Channel::ALL.into_iter().all(|c| self.remaining(c) == 0)
    }
}

fn slot(channel: Channel) -> usize {
    match channel {
        Channel::Content => 0,
        Channel::Detail => 1,
        Channel::Result => 2,
    }
}

/// How a reveal ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevealOutcome {
    /// Every fragment was appended.
    Completed,
    /// The session was cancelled or taken over; remaining fragments were
    /// discarded.
    Cancelled,
}

/// Resolves once the reveal it was returned from ends.
#[must_use = "a reveal keeps running, but its outcome is lost unless awaited"]
pub struct Completion {
    rx: oneshot::Receiver<()>,
}

impl Completion {
    fn ready() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        Self { rx }
    }
}

impl Future for Completion {
    type Output = RevealOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The session drops its sender without sending when it is aborted.
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(()) => RevealOutcome::Completed,
            Err(_) => RevealOutcome::Cancelled,
        })
    }
}

/// Shortest tick period; `tokio::time::interval` rejects a zero period.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Drives reveal sessions against a shared store.
#[derive(Clone)]
pub struct RevealEngine {
    store: Arc<MessageStore>,
    registry: Arc<StreamRegistry>,
    interval: Duration,
}

impl RevealEngine {
    /// An `interval` below [`MIN_INTERVAL`] is raised to it.
    pub fn new(store: Arc<MessageStore>, registry: Arc<StreamRegistry>, interval: Duration) -> Self {
        Self {
            store,
            registry,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Reveal `plan` into message `id`.
    ///
    /// The first tick runs as soon as the session is scheduled, the rest
    /// every `interval`. An empty plan completes immediately without touching
    /// the registry. A second call for the same id replaces the running
    /// session; the first call's completion then resolves to `Cancelled`.
    pub fn reveal(&self, id: MessageId, plan: RevealPlan) -> Completion {
        if plan.is_empty() {
            return Completion::ready();
        }

        tracing::debug!(
            message_id = %id,
            content = plan.content.len(),
            detail = plan.detail.len(),
            result = plan.result.len(),
            "starting reveal"
        );

        let (done_tx, done_rx) = oneshot::channel();
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let interval = self.interval;
        let cursors = RevealCursors::new(plan);

        self.registry.start(id, move |ticket| {
            run_session(store, registry, ticket, cursors, interval, done_tx)
        });

        Completion { rx: done_rx }
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }
}

async fn run_session(
    store: Arc<MessageStore>,
    registry: Arc<StreamRegistry>,
    ticket: SessionTicket,
    mut cursors: RevealCursors,
    interval: Duration,
    done: oneshot::Sender<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let fragments = cursors.step();
        let applied = registry.run_if_current(ticket, || -> Result<(), ChatError> {
            for (channel, fragment) in &fragments {
                store.append(ticket.id, *channel, fragment)?;
            }
            Ok(())
        });

        match applied {
            None => {
                tracing::debug!(message_id = %ticket.id, "reveal session superseded");
                return;
            }
            Some(Err(e)) => {
                tracing::warn!(message_id = %ticket.id, error = %e, "reveal aborted");
                registry.finish(ticket);
                return;
            }
            Some(Ok(())) => {}
        }

        store.notify(ChatEvent::ScrollToLatest { id: ticket.id });

        if cursors.is_exhausted() {
            registry.finish(ticket);
            tracing::debug!(message_id = %ticket.id, "reveal complete");
            let _ = done.send(());
            return;
        }
    }
}
