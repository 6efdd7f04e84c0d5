//! Per-question exchange state machine with validated transitions.
//!
//! Enforces the lifecycle of one submitted question:
//! - Idle -> AwaitingAnswer (question sent)
//! - AwaitingAnswer -> RevealingAnswer (answer received)
//! - AwaitingAnswer -> Failed (answer could not be fetched)
//! - RevealingAnswer -> ExecutingQuery (a query was generated)
//! - RevealingAnswer -> Done (no query to run)
//! - ExecutingQuery -> RevealingResult (rows received)
//! - ExecutingQuery -> Done (execution failed, fallback text written)
//! - RevealingResult -> Done
//! - RevealingAnswer / RevealingResult -> Cancelled (reveal torn down)

use dataverse_core::types::{ExchangePhase, MessageId};

use crate::error::ChatError;

/// Tracks where one exchange is, and where it has been.
#[derive(Debug, Clone)]
pub struct ExchangeMachine {
    exchange: MessageId,
    phase: ExchangePhase,
    history: Vec<ExchangePhase>,
}

impl ExchangeMachine {
    /// A machine for the exchange started by user message `exchange`.
    pub fn new(exchange: MessageId) -> Self {
        Self {
            exchange,
            phase: ExchangePhase::Idle,
            history: vec![ExchangePhase::Idle],
        }
    }

    pub fn exchange(&self) -> MessageId {
        self.exchange
    }

    pub fn current(&self) -> ExchangePhase {
        self.phase
    }

    /// Every phase visited so far, starting with `Idle`.
    pub fn history(&self) -> &[ExchangePhase] {
        &self.history
    }

    /// Attempt to move to `target`, leaving the phase untouched on error.
    pub fn transition(&mut self, target: ExchangePhase) -> Result<(), ChatError> {
        if !self.phase.can_transition_to(&target) {
            return Err(ChatError::InvalidTransition(self.phase, target));
        }
        tracing::debug!(exchange = %self.exchange, "Exchange phase: {} -> {}", self.phase, target);
        self.phase = target;
        self.history.push(target);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
