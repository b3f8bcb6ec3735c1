//! Search execution plus snippet/URL filtering (one round).
//!
//! Runs the round's queries through the search provider, drops results that
//! are already visited, already failed, snippetless, or on a blocked
//! domain, and pre-screens the rest with a cheap LLM yes/no relevance call.
//! Verdicts are memoized by a stable hash of (url, snippet) so identical
//! snippets are never judged twice within a run.

use futures_util::future::join_all;
use researchpipe_core::{Error, SearchResult};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::collab::Collaborators;
use crate::config::EngineConfig;
use crate::gate::{CallGate, CallOptions};
use crate::prompts;
use crate::state::{ErrorKind, ResearchState, Stage};

/// Stable verdict-cache key for a (url, snippet) pair.
pub fn snippet_hash(url: &str, snippet: &str) -> String {
    let mut h = Sha256::new();
    h.update(url.as_bytes());
    h.update(b"\n");
    h.update(snippet.as_bytes());
    hex::encode(h.finalize())
}

pub(crate) fn is_blocked_domain(url: &str, cfg: &EngineConfig) -> bool {
    let lower = url.to_ascii_lowercase();
    cfg.blocked_domains.iter().any(|d| lower.contains(d.as_str()))
}

/// Run the SearchFilter stage. Accepted results merge into
/// `state.results`, deduplicated by URL; all failures are recorded, never
/// raised.
pub async fn search_filter(
    cfg: &EngineConfig,
    gate: &CallGate,
    collab: &Collaborators,
    state: &mut ResearchState,
) {
    let queries: Vec<String> = state
        .search_queries
        .iter()
        .take(cfg.max_search_queries)
        .cloned()
        .collect();

    if queries.is_empty() {
        state.record_message(
            Stage::SearchFilter,
            ErrorKind::ResourceUnavailable,
            "no search queries to run this round",
        );
        return;
    }
    let Some(search) = collab.search.as_ref() else {
        state.record_error(
            Stage::SearchFilter,
            &Error::NotConfigured("search provider".to_string()),
        );
        return;
    };

    // Fan out one search per query; failures are isolated per query.
    let searches = join_all(queries.iter().map(|q| {
        let search = search.clone();
        let q = q.clone();
        async move {
            let out = gate
                .call("search", || async {
                    search.search(&q, cfg.max_results_per_query).await
                })
                .await;
            (q, out)
        }
    }))
    .await;

    // Screen results against round state, reusing cached verdicts. Results
    // that still need an LLM verdict are collected for a concurrent pass.
    let mut accepted: Vec<SearchResult> = Vec::new();
    let mut pending: Vec<(String, String, SearchResult)> = Vec::new(); // (query, hash, result)
    let mut seen_this_round: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

    for (query, outcome) in searches {
        let results = match outcome {
            Ok(r) => r,
            Err(e) => {
                state.record_error(
                    Stage::SearchFilter,
                    &Error::Search(format!("query '{query}': {e}")),
                );
                continue;
            }
        };
        if results.is_empty() {
            state.record_message(
                Stage::SearchFilter,
                ErrorKind::TransientCallFailure,
                format!("no results returned for query: {query}"),
            );
            continue;
        }
        for r in results {
            let Some(snippet) = r.snippet.as_deref() else {
                continue;
            };
            if snippet.trim().is_empty() {
                continue;
            }
            if state.visited_urls.contains(&r.url) || state.failed_urls.contains(&r.url) {
                debug!(url = %r.url, "skipping visited or failed url");
                continue;
            }
            if is_blocked_domain(&r.url, cfg) {
                debug!(url = %r.url, "skipping blocked domain");
                continue;
            }
            if !seen_this_round.insert(r.url.clone()) {
                continue;
            }
            let hash = snippet_hash(&r.url, snippet);
            match state.snippet_verdict_cache.get(&hash) {
                Some(true) => accepted.push(r),
                Some(false) => {}
                None => pending.push((query.clone(), hash, r)),
            }
        }
    }

    // Concurrent relevance calls for the uncached remainder. Each task
    // returns its own (hash, verdict) so nothing shared is mutated until
    // after the join.
    let llm = collab.llm.clone();
    let verdicts = join_all(pending.into_iter().map(|(query, hash, result)| {
        let llm = llm.clone();
        async move {
            let Some(llm) = llm else {
                return (hash, result, None);
            };
            let snippet = result.snippet.clone().unwrap_or_default();
            let opts = CallOptions {
                timeout: Some(cfg.snippet_verdict_timeout),
                retry_on_timeout: false,
                max_retries: Some(1),
            };
            let out = gate
                .call_with("snippet_relevance", opts, || {
                    let messages = vec![
                        researchpipe_core::Message::system(prompts::snippet_relevance_instructions(
                            &query,
                        )),
                        researchpipe_core::Message::user(format!("Snippet: {snippet}")),
                    ];
                    let llm = llm.clone();
                    async move { llm.complete(&messages, None).await }
                })
                .await;
            let verdict = match out {
                Ok(answer) => Some(answer.to_ascii_lowercase().contains("yes")),
                // Timeout or call failure: treat as "no" but do NOT cache,
                // so the same snippet can be retried next round.
                Err(_) => None,
            };
            (hash, result, verdict)
        }
    }))
    .await;

    let mut no_llm = false;
    for (hash, result, verdict) in verdicts {
        match verdict {
            Some(v) => {
                state.snippet_verdict_cache.insert(hash, v);
                if v {
                    accepted.push(result);
                }
            }
            None => {
                if llm.is_none() {
                    no_llm = true;
                }
            }
        }
    }
    if no_llm {
        state.record_error(
            Stage::SearchFilter,
            &Error::NotConfigured("llm for snippet relevance".to_string()),
        );
    }

    let added = accepted.len();
    for r in accepted {
        state.visited_urls.insert(r.url.clone());
        // Last write wins on metadata; the key set itself stays unique.
        state.results.insert(r.url.clone(), r);
    }
    info!(
        accepted = added,
        total = state.results.len(),
        "search filter merged round results"
    );
}
