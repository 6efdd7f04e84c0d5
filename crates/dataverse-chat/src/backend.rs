//! Backend seam: the "generate answer" and "execute query" calls.
//!
//! Defines the `AssistantBackend` async trait and the HTTP implementation
//! used by the binary. Tests substitute their own implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

use dataverse_core::config::ApiConfig;

use crate::error::ChatError;
use crate::table::Row;

/// Structured answer to a question.
///
/// Only `sql` and `md_summary` drive the exchange; the rest is carried for
/// display. Fields of the wrong JSON type are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerResponse {
    #[serde(default, deserialize_with = "string_or_none")]
    pub sql: Option<String>,
    #[serde(default, deserialize_with = "string_or_none")]
    pub md_summary: Option<String>,
    #[serde(default)]
    pub tables_used: Vec<String>,
    #[serde(default, deserialize_with = "string_or_none")]
    pub question: Option<String>,
    #[serde(default)]
    pub metadata: Option<AnswerMetadata>,
}

impl AnswerResponse {
    /// The narrative summary, empty when absent.
    pub fn summary(&self) -> &str {
        self.md_summary.as_deref().unwrap_or("")
    }

    /// The generated query, if one was returned at all.
    pub fn query(&self) -> Option<&str> {
        self.sql.as_deref().filter(|sql| !sql.is_empty())
    }

    /// Whether the generated query has visible content worth showing.
    pub fn has_visible_query(&self) -> bool {
        self.query().is_some_and(|sql| !sql.trim().is_empty())
    }
}

/// Bookkeeping the backend reports about how an answer was produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerMetadata {
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default)]
    pub model_used: String,
    #[serde(default)]
    pub tables_considered: u32,
    #[serde(default)]
    pub has_conversation_context: bool,
}

/// Rows returned by executing a generated query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryExecution {
    #[serde(default, deserialize_with = "rows_or_empty")]
    pub data: Vec<Row>,
    #[serde(default, deserialize_with = "number_or_none")]
    pub row_count: Option<Number>,
}

/// The two remote calls an exchange depends on.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Turn a question into a summary and, optionally, a query.
    async fn generate_answer(&self, question: &str) -> Result<AnswerResponse, ChatError>;

    /// Run a previously generated query.
    async fn execute_query(&self, query: &str) -> Result<QueryExecution, ChatError>;
}

#[derive(Serialize)]
struct AnswerRequest<'a> {
    question: &'a str,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    sql: &'a str,
}

/// JSON-over-HTTP backend.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    chat_url: String,
    execute_url: String,
}

impl HttpBackend {
    pub fn new(config: &ApiConfig) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            chat_url: config.chat_url(),
            execute_url: config.execute_url(),
        })
    }

    async fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<reqwest::Response, ChatError> {
        let response = self.client.post(url).json(body).send().await?;
        if !response.status().is_success() {
            return Err(ChatError::Backend(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl AssistantBackend for HttpBackend {
    async fn generate_answer(&self, question: &str) -> Result<AnswerResponse, ChatError> {
        let response = self.post(&self.chat_url, &AnswerRequest { question }).await?;
        let answer: AnswerResponse = response.json().await?;
        tracing::debug!(
            has_query = answer.query().is_some(),
            tables = answer.tables_used.len(),
            "answer received"
        );
        Ok(answer)
    }

    async fn execute_query(&self, query: &str) -> Result<QueryExecution, ChatError> {
        let response = self.post(&self.execute_url, &ExecuteRequest { sql: query }).await?;
        let execution: QueryExecution = response.json().await?;
        tracing::debug!(rows = execution.data.len(), "query executed");
        Ok(execution)
    }
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

fn rows_or_empty<'de, D>(deserializer: D) -> Result<Vec<Row>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => row,
                _ => Row::new(),
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn number_or_none<'de, D>(deserializer: D) -> Result<Option<Number>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => Some(n),
        _ => None,
    })
}
