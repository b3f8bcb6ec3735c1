//! Chunking, indexing, and retrieval stage.
//!
//! Splits each extracted source into overlapping character windows, hands
//! the chunks to the injected index builder, and queries the resulting
//! index with the research question. Without an index builder the stage
//! degrades to taking chunks in source order so synthesis still has
//! material to work with.

use researchpipe_core::{Chunk, Error};
use tracing::{debug, info};

use crate::collab::Collaborators;
use crate::config::EngineConfig;
use crate::state::{ErrorKind, ResearchState, Stage};

/// Split `text` into windows of at most `size` chars overlapping by
/// `overlap` chars. Window boundaries back up to the nearest whitespace
/// when one exists in the tail quarter of the window.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || size == 0 {
        return Vec::new();
    }
    let overlap = overlap.min(size.saturating_sub(1));
    let mut out = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let hard_end = (start + size).min(chars.len());
        let mut end = hard_end;
        if hard_end < chars.len() {
            // Prefer a whitespace break near the end of the window.
            let floor = start + (size * 3) / 4;
            if let Some(pos) = (floor..hard_end).rev().find(|&i| chars[i].is_whitespace()) {
                end = pos;
            }
        }
        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    out
}

/// Chunk every extracted source, in URL order, tagging each chunk with its
/// source and position.
pub fn chunk_sources(state: &ResearchState, cfg: &EngineConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for (url, text) in &state.relevant_content {
        for (i, piece) in chunk_text(text, cfg.chunk_size, cfg.chunk_overlap)
            .into_iter()
            .enumerate()
        {
            chunks.push(Chunk {
                text: piece,
                source_url: url.clone(),
                index: i,
            });
        }
    }
    chunks
}

/// Run the IndexRetrieve stage: build an index over this round's corpus and
/// keep the top-k chunks for the research question.
pub fn index_and_retrieve(cfg: &EngineConfig, collab: &Collaborators, state: &mut ResearchState) {
    // Any failure below leaves the round with no retrieved chunks.
    state.relevant_chunks.clear();
    let chunks = chunk_sources(state, cfg);
    if chunks.is_empty() {
        debug!("no extracted content to index");
        state.record_message(
            Stage::IndexRetrieve,
            ErrorKind::ResourceUnavailable,
            "no extracted content to index",
        );
        return;
    }

    state.relevant_chunks = match collab.index.as_ref() {
        Some(builder) => {
            // Fold the judge's gap into the retrieval query on later rounds.
            let query = if state.knowledge_gap.is_empty() {
                state.query.clone()
            } else {
                format!("{}\n{}", state.query, state.knowledge_gap)
            };
            let retrieved = builder
                .build(chunks)
                .and_then(|index| index.query(&query, cfg.retrieval_top_k));
            match retrieved {
                Ok(chunks) => chunks,
                Err(e) => {
                    state.record_error(Stage::IndexRetrieve, &Error::Index(e.to_string()));
                    return;
                }
            }
        }
        None => {
            debug!("no index builder configured, taking chunks in source order");
            chunks.into_iter().take(cfg.retrieval_top_k).collect()
        }
    };
    info!(
        retrieved = state.relevant_chunks.len(),
        "index stage selected chunks"
    );
}
