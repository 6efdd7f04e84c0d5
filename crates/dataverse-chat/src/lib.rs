//! Streaming chat engine for DataVerse.
//!
//! Turns a question into a progressively revealed answer: the summary and the
//! generated query stream into the assistant message on a fixed cadence, then
//! the query's rows stream in as a markdown table.

pub mod backend;
pub mod chunker;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod reveal;
pub mod state;
pub mod store;
pub mod table;

pub use backend::{AnswerMetadata, AnswerResponse, AssistantBackend, HttpBackend, QueryExecution};
pub use chunker::{chunk_by_whitespace, chunk_preserving_newlines, normalize_newlines};
pub use error::ChatError;
pub use orchestrator::{ChatOrchestrator, ExchangeReport};
pub use registry::{SessionTicket, StreamRegistry};
pub use reveal::{Completion, RevealCursors, RevealEngine, RevealOutcome, RevealPlan};
pub use state::ExchangeMachine;
pub use store::MessageStore;
pub use table::{markdown_table, result_section, Row};
