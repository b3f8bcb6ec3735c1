//! The single mutable research-state record threaded through the pipeline.
//!
//! The orchestrator owns one `ResearchState` per run and lends it to each
//! stage; stages mutate only the fields they own. Collections keyed by URL
//! use ordered maps so a run's behavior is deterministic given the same
//! collaborator responses.

use researchpipe_core::{Chunk, Error, ReportType, SearchResult};
use std::collections::{BTreeMap, BTreeSet};

use crate::prompts::PromptProfile;

/// Pipeline stages, used for routing and for tagging recorded errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    GenerateQueries,
    Approve,
    SearchFilter,
    Fetch,
    IndexRetrieve,
    Judge,
    ChooseReportType,
    Synthesize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::GenerateQueries => "generate_queries",
            Stage::Approve => "approve",
            Stage::SearchFilter => "search_filter",
            Stage::Fetch => "fetch",
            Stage::IndexRetrieve => "index_retrieve",
            Stage::Judge => "judge",
            Stage::ChooseReportType => "choose_report_type",
            Stage::Synthesize => "synthesize",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeout / rate limit / network failure of an external call.
    TransientCallFailure,
    /// Malformed or schema-violating structured output.
    ParseFailure,
    /// A required collaborator is missing; the stage degraded to empty.
    ResourceUnavailable,
    /// An iteration or word cap forced termination of a loop.
    BudgetExceeded,
}

impl From<&Error> for ErrorKind {
    fn from(e: &Error) -> Self {
        match e {
            Error::Parse(_) => ErrorKind::ParseFailure,
            Error::NotConfigured(_) => ErrorKind::ResourceUnavailable,
            Error::BudgetExceeded(_) => ErrorKind::BudgetExceeded,
            _ => ErrorKind::TransientCallFailure,
        }
    }
}

/// A tagged error record. Failures never abort the run; they accumulate
/// here so tests and callers can assert on kind and stage.
#[derive(Debug, Clone)]
pub struct StageError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug)]
pub struct ResearchState {
    /// Current research question; replaceable on approval rejection.
    pub query: String,
    pub prompt_profile: PromptProfile,
    /// Verbose/interpretive vs terse/factual synthesis style.
    pub reasoning_mode: bool,

    // Round-scoped: cleared and regenerated each loop.
    pub search_queries: Vec<String>,
    pub rationale: String,
    pub relevant_content: BTreeMap<String, String>,
    pub relevant_chunks: Vec<Chunk>,

    // Accumulating across rounds, deduplicated by URL.
    pub results: BTreeMap<String, SearchResult>,
    pub visited_urls: BTreeSet<String>,
    /// URLs that failed permanently; never retried within this run.
    pub failed_urls: BTreeSet<String>,
    /// Relevance verdicts keyed by sha-256 of (url, snippet); persists
    /// across rounds within a run.
    pub snippet_verdict_cache: BTreeMap<String, bool>,

    pub approval_loops: usize,
    pub refinement_loops: usize,

    // Judge output.
    pub sufficiency_verdict: Option<bool>,
    pub knowledge_gap: String,
    pub follow_up_queries: Vec<String>,

    pub report_type: Option<ReportType>,
    pub report: String,

    pub errors: Vec<StageError>,
}

impl ResearchState {
    pub fn new(query: impl Into<String>, profile: PromptProfile, reasoning_mode: bool) -> Self {
        Self {
            query: query.into(),
            prompt_profile: profile,
            reasoning_mode,
            search_queries: Vec::new(),
            rationale: String::new(),
            relevant_content: BTreeMap::new(),
            relevant_chunks: Vec::new(),
            results: BTreeMap::new(),
            visited_urls: BTreeSet::new(),
            failed_urls: BTreeSet::new(),
            snippet_verdict_cache: BTreeMap::new(),
            approval_loops: 0,
            refinement_loops: 0,
            sufficiency_verdict: None,
            knowledge_gap: String::new(),
            follow_up_queries: Vec::new(),
            report_type: None,
            report: String::new(),
            errors: Vec::new(),
        }
    }

    /// Append a failure record; failures accumulate, they never overwrite.
    pub fn record_error(&mut self, stage: Stage, error: &Error) {
        self.errors.push(StageError {
            stage,
            kind: ErrorKind::from(error),
            message: error.to_string(),
        });
    }

    pub fn record_message(&mut self, stage: Stage, kind: ErrorKind, message: impl Into<String>) {
        self.errors.push(StageError {
            stage,
            kind,
            message: message.into(),
        });
    }

    /// Joined error log for display; `None` when the run was clean.
    pub fn last_error(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(|e| format!("[{}] {}", e.stage.as_str(), e.message))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    /// Approval rejection: drop everything round-scoped and start over with
    /// a possibly-updated query. Permanently failed URLs and cached snippet
    /// verdicts survive (they are run-scoped, not round-scoped).
    pub fn reset_for_new_query(&mut self, new_query: Option<String>) {
        if let Some(q) = new_query {
            if !q.trim().is_empty() {
                self.query = q;
            }
        }
        self.search_queries.clear();
        self.rationale.clear();
        self.results.clear();
        self.relevant_content.clear();
        self.relevant_chunks.clear();
        self.visited_urls.clear();
        self.refinement_loops = 0;
        self.approval_loops = 0;
        self.sufficiency_verdict = None;
        self.knowledge_gap.clear();
        self.follow_up_queries.clear();
    }

    /// Post-synthesis cleanup: the report stands alone, intermediates go.
    pub fn clear_round_data(&mut self) {
        self.search_queries.clear();
        self.rationale.clear();
        self.results.clear();
        self.relevant_content.clear();
        self.relevant_chunks.clear();
        self.follow_up_queries.clear();
        self.knowledge_gap.clear();
        self.refinement_loops = 0;
    }
}
