//! Content fetch and extraction stage.
//!
//! Pulls page text for the round's accepted URLs, routing PDF links to the
//! document loader and everything else to the page scraper. Fetches run
//! concurrently under a stage-local bound that is tighter than the global
//! call gate. A URL that fails here goes on the permanent failed list for
//! the rest of the run.

use futures_util::future::join_all;
use researchpipe_core::Error;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::collab::Collaborators;
use crate::config::EngineConfig;
use crate::gate::{CallGate, CallOptions};
use crate::state::{ErrorKind, ResearchState, Stage};

/// Path component of a URL, lowercased, with query and fragment removed.
fn url_path_lower(url: &str) -> String {
    let no_fragment = url.split('#').next().unwrap_or(url);
    let no_query = no_fragment.split('?').next().unwrap_or(no_fragment);
    no_query.to_ascii_lowercase()
}

pub(crate) fn is_pdf_url(url: &str) -> bool {
    url_path_lower(url).ends_with(".pdf")
}

fn has_blocked_extension(url: &str, cfg: &EngineConfig) -> bool {
    let path = url_path_lower(url);
    cfg.blocked_extensions.iter().any(|ext| path.ends_with(ext.as_str()))
}

/// Whitespace cleanup for extracted text: normalized line endings, no run
/// of more than one blank line, no trailing space, interior space runs
/// collapsed.
pub fn clean_text(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0usize;
    for line in raw.replace("\r\n", "\n").replace('\r', "\n").lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            lines.push(String::new());
        } else {
            blank_run = 0;
            lines.push(collapsed);
        }
    }
    lines.join("\n").trim().to_string()
}

/// Cap text at `limit` characters on a char boundary.
fn cap_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect()
}

fn tokens(s: &str) -> Vec<String> {
    let mut out: Vec<String> = s
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_ascii_lowercase())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn snippet_relevance(query_toks: &[String], snippet: &str) -> usize {
    let toks = tokens(snippet);
    query_toks.iter().filter(|t| toks.binary_search(t).is_ok()).count()
}

/// Unfetched candidate URLs, most query-relevant snippets first, capped at
/// the candidate budget. Blocked extensions are excluded here, before any
/// fetch, so they are filtered rather than failed. Ties break by URL so
/// rounds are deterministic.
fn ranked_candidates(cfg: &EngineConfig, state: &ResearchState) -> Vec<String> {
    let query_toks = tokens(&state.query);
    let mut scored: Vec<(usize, &String)> = state
        .results
        .iter()
        .filter(|(u, _)| !state.relevant_content.contains_key(*u))
        .filter(|(u, _)| !state.failed_urls.contains(*u))
        .filter(|(u, _)| !has_blocked_extension(u.as_str(), cfg))
        .map(|(u, r)| {
            let score = r
                .snippet
                .as_deref()
                .map(|s| snippet_relevance(&query_toks, s))
                .unwrap_or(0);
            (score, u)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(cfg.max_fetch_candidates)
        .map(|(_, u)| u.clone())
        .collect()
}

/// Permanent failure handling: the URL is never retried this run, but its
/// search snippet still counts as (thin) source material when present.
fn fall_back_to_snippet(state: &mut ResearchState, url: String) {
    state.failed_urls.insert(url.clone());
    if let Some(snippet) = state
        .results
        .get(&url)
        .and_then(|r| r.snippet.as_deref())
        .map(str::to_string)
    {
        state.relevant_content.entry(url).or_insert(snippet);
    }
}

/// Run the Fetch stage. Extracted text lands in `state.relevant_content`;
/// failed URLs land in `state.failed_urls` and are never retried.
pub async fn fetch_content(
    cfg: &EngineConfig,
    gate: &CallGate,
    collab: &Collaborators,
    state: &mut ResearchState,
) {
    let candidates = ranked_candidates(cfg, state);

    if candidates.is_empty() {
        debug!("no new urls to fetch this round");
        return;
    }
    if collab.scraper.is_none() && collab.documents.is_none() {
        state.record_error(
            Stage::Fetch,
            &Error::NotConfigured("page scraper and document loader".to_string()),
        );
        return;
    }

    // Stage-local bound; the global gate still applies underneath.
    let limiter = Arc::new(Semaphore::new(cfg.max_concurrent_fetches.max(1)));
    let scraper = collab.scraper.clone();
    let documents = collab.documents.clone();

    let fetches = join_all(candidates.into_iter().map(|url| {
        let limiter = limiter.clone();
        let scraper = scraper.clone();
        let documents = documents.clone();
        async move {
            let _permit = match limiter.acquire().await {
                Ok(p) => p,
                Err(e) => {
                    return (url, Err(Error::Fetch(format!("fetch limiter closed: {e}"))));
                }
            };
            let opts = CallOptions {
                timeout: Some(cfg.url_timeout),
                retry_on_timeout: false,
                max_retries: Some(1),
            };
            let out = if is_pdf_url(&url) {
                match documents {
                    Some(loader) => {
                        gate.call_with("load_document", opts, || {
                            let loader = loader.clone();
                            let url = url.clone();
                            async move { loader.load(&url, cfg.url_timeout).await }
                        })
                        .await
                    }
                    None => Err(Error::NotConfigured("document loader".to_string())),
                }
            } else {
                match scraper {
                    Some(scraper) => {
                        gate.call_with("scrape_page", opts, || {
                            let scraper = scraper.clone();
                            let url = url.clone();
                            async move { scraper.scrape(&url, cfg.url_timeout).await }
                        })
                        .await
                        .map(|page| page.text)
                    }
                    None => Err(Error::NotConfigured("page scraper".to_string())),
                }
            };
            (url, out)
        }
    }))
    .await;

    let mut fetched = 0usize;
    for (url, outcome) in fetches {
        match outcome {
            Ok(raw) => {
                let text = cap_chars(&clean_text(&raw), cfg.content_char_cap);
                if text.is_empty() {
                    warn!(url = %url, "extraction produced empty text");
                    state.record_message(
                        Stage::Fetch,
                        ErrorKind::TransientCallFailure,
                        format!("empty extraction for {url}"),
                    );
                    fall_back_to_snippet(state, url);
                    continue;
                }
                state.relevant_content.insert(url, text);
                fetched += 1;
            }
            Err(e) => {
                warn!(url = %url, error = %e, "fetch failed");
                state.record_message(
                    Stage::Fetch,
                    ErrorKind::from(&e),
                    format!("{url}: {e}"),
                );
                fall_back_to_snippet(state, url);
            }
        }
    }
    info!(
        fetched,
        total_sources = state.relevant_content.len(),
        failed = state.failed_urls.len(),
        "fetch stage complete"
    );
}
