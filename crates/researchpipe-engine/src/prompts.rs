//! Prompt profiles and instruction templates.
//!
//! A profile selects domain-flavored instructions for query generation and
//! report writing. The wording here is deliberately short; it is not
//! load-bearing for the pipeline's control flow.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptProfile {
    General,
    Legal,
    Macro,
    DeepSearch,
    PersonSearch,
    Investment,
}

impl Default for PromptProfile {
    fn default() -> Self {
        PromptProfile::General
    }
}

impl PromptProfile {
    fn query_flavor(&self) -> &'static str {
        match self {
            PromptProfile::General => "Cover the main facets of the topic from independent angles.",
            PromptProfile::Legal => {
                "Favor statutes, case law, regulator guidance, and authoritative legal commentary."
            }
            PromptProfile::Macro => {
                "Favor macroeconomic data, central bank publications, and market analysis."
            }
            PromptProfile::DeepSearch => {
                "Probe beyond surface coverage: primary sources, technical reports, archives."
            }
            PromptProfile::PersonSearch => {
                "Focus on biographical facts, affiliations, and public statements; avoid speculation."
            }
            PromptProfile::Investment => {
                "Favor filings, earnings material, analyst coverage, and market data."
            }
        }
    }

    fn report_flavor(&self) -> &'static str {
        match self {
            PromptProfile::General => "Write a balanced research report for a general reader.",
            PromptProfile::Legal => {
                "Write with legal precision; cite sources for every claim of law."
            }
            PromptProfile::Macro => {
                "Write for an economics-literate reader; quantify wherever the sources allow."
            }
            PromptProfile::DeepSearch => {
                "Write an exhaustive treatment; surface disagreements between sources."
            }
            PromptProfile::PersonSearch => {
                "Write a factual profile; attribute every biographical claim to a source."
            }
            PromptProfile::Investment => {
                "Write for an investor; separate reported figures from commentary."
            }
        }
    }
}

/// System instructions for the query-generation call. The reply contract
/// (a JSON object with `rationale` and `query`) is what the structured
/// output parser expects.
pub fn query_writer_instructions(profile: PromptProfile, topic: &str, n_queries: usize) -> String {
    format!(
        "You are a research assistant generating web search queries for the topic: {topic}\n\
         {flavor}\n\
         Respond with a single JSON object with keys \"rationale\" (string) and \
         \"query\" (a list of at most {n_queries} search query strings). JSON only.",
        topic = topic,
        flavor = profile.query_flavor(),
    )
}

/// System instructions for the yes/no snippet relevance check.
pub fn snippet_relevance_instructions(query: &str) -> String {
    format!(
        "You judge whether a web search snippet is relevant to the research query: {query}\n\
         Answer with the single word \"yes\" or \"no\"."
    )
}

/// System instructions for the sufficiency judgment over gathered chunks.
pub fn reflection_instructions(topic: &str) -> String {
    format!(
        "You assess whether the extracted information below is sufficient to answer \
         the research topic: {topic}\n\
         Respond with a single JSON object with keys \"is_sufficient\" (boolean), \
         \"knowledge_gap\" (string), and \"follow_up_queries\" (list of strings). JSON only."
    )
}

/// Base system instructions for all report-writing calls.
pub fn report_writer_instructions(profile: PromptProfile, topic: &str) -> String {
    format!(
        "{flavor}\nResearch topic: {topic}\n\
         Ground every statement in the provided source extracts; do not invent sources.",
        flavor = profile.report_flavor(),
    )
}

/// Style addendum selected by `reasoning_mode`.
pub fn synthesis_style(reasoning_mode: bool) -> &'static str {
    if reasoning_mode {
        "Be verbose and comprehensive. Interpret and connect findings across sources, \
         attribute specific information to individual source URLs with in-line citations, \
         and prefer domain-specific language over generic phrasing."
    } else {
        "Compile a factual digest. Present information clearly and concisely organized \
         by source or theme, attribute each fact to its source URL, and avoid \
         speculation, synthesis, or inferred connections."
    }
}
