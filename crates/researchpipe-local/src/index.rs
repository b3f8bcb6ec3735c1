//! Lexical similarity index.
//!
//! Self-contained token-overlap scoring, no embeddings backend. Often good
//! enough to order chunks by relevance without network calls, and fully
//! deterministic, which the engine relies on for reproducible runs.

use researchpipe_core::{Chunk, IndexBuilder, Result, SimilarityIndex};

fn tokenize(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for ch in s.chars() {
        let c = ch.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            cur.push(c);
        } else if !cur.is_empty() {
            if cur.len() >= 2 {
                out.push(cur.clone());
            }
            cur.clear();
        }
    }
    if !cur.is_empty() && cur.len() >= 2 {
        out.push(cur);
    }
    out.sort();
    out.dedup();
    out
}

fn overlap_score(query_toks: &[String], text_toks: &[String]) -> f32 {
    if query_toks.is_empty() || text_toks.is_empty() {
        return 0.0;
    }
    let mut i = 0usize;
    let mut j = 0usize;
    let mut inter = 0u64;
    while i < query_toks.len() && j < text_toks.len() {
        match query_toks[i].cmp(&text_toks[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                inter += 1;
                i += 1;
                j += 1;
            }
        }
    }
    // Normalize by query size so covering the query scores highly.
    inter as f32 / (query_toks.len() as f32)
}

pub struct LexicalIndex {
    entries: Vec<(Vec<String>, Chunk)>,
}

impl SimilarityIndex for LexicalIndex {
    fn query(&self, text: &str, k: usize) -> Result<Vec<Chunk>> {
        let q_toks = tokenize(text);
        let mut scored: Vec<(f32, &Chunk)> = self
            .entries
            .iter()
            .map(|(toks, chunk)| (overlap_score(&q_toks, toks), chunk))
            .collect();
        // Stable: score desc, then source/position asc.
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.source_url.cmp(&b.1.source_url))
                .then_with(|| a.1.index.cmp(&b.1.index))
        });
        Ok(scored
            .into_iter()
            .take(k.max(1))
            .map(|(_, c)| c.clone())
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LexicalIndexBuilder;

impl LexicalIndexBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl IndexBuilder for LexicalIndexBuilder {
    fn build(&self, chunks: Vec<Chunk>) -> Result<Box<dyn SimilarityIndex>> {
        let entries = chunks
            .into_iter()
            .map(|c| (tokenize(&c.text), c))
            .collect();
        Ok(Box::new(LexicalIndex { entries }))
    }
}
