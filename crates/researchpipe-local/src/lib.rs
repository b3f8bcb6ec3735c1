//! Local collaborator implementations for researchpipe.
//!
//! Everything here speaks to the outside world with reqwest (or a child
//! process) and plugs into the engine through the researchpipe-core traits:
//!
//! - [`OpenAiCompatClient`]: chat completions against any OpenAI-compatible
//!   endpoint.
//! - [`SerperSearchProvider`] / [`SearxngSearchProvider`]: web search.
//! - [`HttpPageScraper`]: HTML fetch + text extraction.
//! - [`HttpDocumentLoader`]: PDF fetch + text-layer extraction.
//! - [`LexicalIndexBuilder`]: deterministic token-overlap retrieval.
//! - [`MarkdownFileSink`] / [`PandocPdfSink`]: report delivery.
//! - [`AutoApprove`] / [`ScriptedApproval`] / [`FixedReportType`]:
//!   non-interactive approval and report-type decisions.

use researchpipe_core::{Error, Result};
use std::time::Duration;

pub mod gates;
pub mod index;
pub mod llm;
pub mod pdf;
pub mod scrape;
pub mod search;
pub mod sink;

pub use gates::{AutoApprove, FixedReportType, ScriptedApproval};
pub use index::{LexicalIndex, LexicalIndexBuilder};
pub use llm::OpenAiCompatClient;
pub use pdf::HttpDocumentLoader;
pub use scrape::HttpPageScraper;
pub use search::{SearxngSearchProvider, SerperSearchProvider};
pub use sink::{MarkdownFileSink, PandocPdfSink};

/// Shared reqwest client with safety defaults: bounded redirects, and
/// connect/total timeouts so nothing hangs forever on DNS or TLS stalls.
/// Per-request timeouts still override the total.
pub fn default_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("researchpipe-local/0.1")
        .redirect(reqwest::redirect::Policy::limited(10))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| Error::Fetch(e.to_string()))
}
