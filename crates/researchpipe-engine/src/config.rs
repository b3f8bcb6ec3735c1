use researchpipe_core::ReportType;
use std::time::Duration;

/// Word budget and pacing knobs for one report type.
#[derive(Debug, Clone)]
pub struct ReportBudget {
    /// Hard cap on total words; output is truncated to this.
    pub max_words: usize,
    pub min_sections: usize,
    pub max_sections: usize,
    /// Default per-section target when the outline omits or mangles one.
    pub default_section_words: usize,
    /// Floor for the smallest sanitized section target.
    pub min_section_words: usize,
    /// Fraction of the outline's target below which an expansion pass runs.
    pub min_fill_ratio: f64,
    /// Absolute word floor used together with `min_fill_ratio`.
    pub min_words: usize,
    pub max_expansions: usize,
}

impl ReportBudget {
    pub fn concise() -> Self {
        Self {
            max_words: 1200,
            min_sections: 2,
            max_sections: 4,
            default_section_words: 300,
            min_section_words: 50,
            min_fill_ratio: 0.6,
            min_words: 600,
            max_expansions: 1,
        }
    }

    pub fn detailed() -> Self {
        Self {
            max_words: 3000,
            min_sections: 3,
            max_sections: 8,
            default_section_words: 600,
            min_section_words: 100,
            min_fill_ratio: 0.8,
            min_words: 800,
            max_expansions: 2,
        }
    }

    /// A section never gets more than half (concise) or a third (detailed)
    /// of the whole budget.
    pub fn max_section_words(&self, report_type: ReportType) -> usize {
        match report_type {
            ReportType::Concise => self.max_words / 2,
            ReportType::Detailed => self.max_words / 3,
        }
    }
}

/// Every tunable of the pipeline, as named options. Callers construct this
/// once per run; nothing here reads the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Call gate.
    pub max_concurrent_calls: usize,
    pub max_calls_per_second: usize,
    pub max_retries: usize,
    pub base_backoff: Duration,
    pub call_timeout: Duration,

    // Search + snippet filter.
    pub max_search_queries: usize,
    pub max_results_per_query: usize,
    pub snippet_verdict_timeout: Duration,

    // Fetch stage.
    pub max_concurrent_fetches: usize,
    pub url_timeout: Duration,
    pub max_fetch_candidates: usize,
    pub content_char_cap: usize,
    pub blocked_domains: Vec<String>,
    pub blocked_extensions: Vec<String>,

    // Index + retrieve.
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retrieval_top_k: usize,

    // Loop caps. Enforced only by the orchestrator's routing.
    pub max_refinement_loops: usize,
    pub max_approval_loops: usize,

    pub concise_budget: ReportBudget,
    pub detailed_budget: ReportBudget,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 10,
            max_calls_per_second: 30,
            max_retries: 5,
            base_backoff: Duration::from_secs(1),
            call_timeout: Duration::from_secs(120),
            max_search_queries: 5,
            max_results_per_query: 10,
            snippet_verdict_timeout: Duration::from_secs(15),
            max_concurrent_fetches: 5,
            url_timeout: Duration::from_secs(60),
            max_fetch_candidates: 30,
            content_char_cap: 10_000,
            blocked_domains: vec!["youtube.com".to_string(), "youtu.be".to_string()],
            blocked_extensions: Vec::new(),
            chunk_size: 1000,
            chunk_overlap: 100,
            retrieval_top_k: 10,
            max_refinement_loops: 3,
            max_approval_loops: 3,
            concise_budget: ReportBudget::concise(),
            detailed_budget: ReportBudget::detailed(),
        }
    }
}

impl EngineConfig {
    pub fn budget(&self, report_type: ReportType) -> &ReportBudget {
        match report_type {
            ReportType::Concise => &self.concise_budget,
            ReportType::Detailed => &self.detailed_budget,
        }
    }
}
