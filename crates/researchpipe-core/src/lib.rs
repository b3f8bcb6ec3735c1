use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("index error: {0}")]
    Index(String),
    #[error("sink error: {0}")]
    Sink(String),
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),
}

/// Failure modes of the structured output parser. All three are recoverable
/// by contract: callers fall back to a default value, never abort the run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no json object found in text")]
    NoJsonFound,
    #[error("malformed json: {0}")]
    MalformedJson(String),
    #[error("schema violation: {0}")]
    SchemaViolation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub source: String,
}

/// A fixed-size, source-tagged slice of extracted document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_url: String,
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub url: String,
    pub title: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Concise,
    Detailed,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Concise => "concise",
            ReportType::Detailed => "detailed",
        }
    }
}

/// Outcome of the query-approval gate. Rejection may carry a replacement
/// research question; round-scoped state is reset by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Reject { new_query: Option<String> },
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message], max_tokens: Option<u64>) -> Result<String>;
}

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}

#[async_trait::async_trait]
pub trait PageScraper: Send + Sync {
    async fn scrape(&self, url: &str, timeout: Duration) -> Result<ScrapedPage>;
}

/// Loader for document-type URLs (PDFs and friends) that need type-specific
/// extraction instead of the generic page scraper.
#[async_trait::async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, url: &str, timeout: Duration) -> Result<String>;
}

/// Builds an ephemeral similarity index over one round's chunks. No
/// cross-run persistence is required of implementations.
pub trait IndexBuilder: Send + Sync {
    fn build(&self, chunks: Vec<Chunk>) -> Result<Box<dyn SimilarityIndex>>;
}

pub trait SimilarityIndex: Send + Sync {
    fn query(&self, text: &str, k: usize) -> Result<Vec<Chunk>>;
}

/// A report destination. `write` returns a human-readable location or
/// status message (a file path for file-backed sinks).
#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn write(&self, content: &str, name: &str) -> Result<String>;
}

#[async_trait::async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn review(
        &self,
        query: &str,
        rationale: &str,
        queries: &[String],
    ) -> Result<ApprovalDecision>;
}

#[async_trait::async_trait]
pub trait ReportTypePicker: Send + Sync {
    async fn pick(&self) -> Result<ReportType>;
}
