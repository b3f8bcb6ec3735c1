//! Query generation and the approval gate.

use researchpipe_core::{ApprovalDecision, Error, Message};
use serde::Deserialize;
use tracing::{info, warn};

use crate::collab::Collaborators;
use crate::config::EngineConfig;
use crate::gate::CallGate;
use crate::parse::parse_json;
use crate::prompts;
use crate::state::{ResearchState, Stage};

/// Structured reply contract for the query-writer call.
#[derive(Debug, Deserialize)]
struct QueryPlan {
    #[serde(default)]
    rationale: String,
    query: Vec<String>,
}

/// Run the GenerateQueries stage. On any failure the raw research question
/// itself becomes the single search query, so the round still proceeds.
pub async fn generate_queries(
    cfg: &EngineConfig,
    gate: &CallGate,
    collab: &Collaborators,
    state: &mut ResearchState,
) {
    state.search_queries.clear();
    state.rationale.clear();

    let fallback = |state: &mut ResearchState| {
        state.search_queries = vec![state.query.clone()];
    };

    let Some(llm) = collab.llm.as_ref() else {
        state.record_error(Stage::GenerateQueries, &Error::NotConfigured("llm".to_string()));
        fallback(state);
        return;
    };

    let instructions =
        prompts::query_writer_instructions(state.prompt_profile, &state.query, cfg.max_search_queries);
    let out = gate
        .call("generate_queries", || {
            let llm = llm.clone();
            let messages = vec![
                Message::system(instructions.clone()),
                Message::user(state.query.clone()),
            ];
            async move { llm.complete(&messages, None).await }
        })
        .await;

    let raw = match out {
        Ok(raw) => raw,
        Err(e) => {
            state.record_error(Stage::GenerateQueries, &e);
            fallback(state);
            return;
        }
    };

    match parse_json::<QueryPlan>(&raw) {
        Ok(plan) => {
            let mut queries: Vec<String> = plan
                .query
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .collect();
            queries.dedup();
            queries.truncate(cfg.max_search_queries);
            if queries.is_empty() {
                warn!("query plan parsed but contained no usable queries");
                fallback(state);
            } else {
                info!(count = queries.len(), "generated search queries");
                state.search_queries = queries;
            }
            state.rationale = plan.rationale;
        }
        Err(e) => {
            warn!(error = %e, "query plan did not parse, falling back to raw question");
            state.record_error(Stage::GenerateQueries, &Error::Parse(e));
            fallback(state);
        }
    }
}

/// Run the Approve stage. A missing gate auto-approves; a failing gate
/// records the failure and auto-approves rather than stalling the run.
pub async fn approve(collab: &Collaborators, state: &mut ResearchState) -> ApprovalDecision {
    let Some(gate) = collab.approval.as_ref() else {
        return ApprovalDecision::Approve;
    };
    match gate
        .review(&state.query, &state.rationale, &state.search_queries)
        .await
    {
        Ok(decision) => decision,
        Err(e) => {
            warn!(error = %e, "approval gate failed, proceeding as approved");
            state.record_error(Stage::Approve, &e);
            ApprovalDecision::Approve
        }
    }
}
