//! Sufficiency judgment over the retrieved chunks.
//!
//! One LLM call decides whether the gathered material answers the research
//! question; if not, it names the gap and proposes follow-up queries for
//! the next refinement round. Any failure here defaults to "sufficient" so
//! a broken judge can never trap the run in the refinement loop.

use researchpipe_core::{Error, Message};
use serde::Deserialize;
use tracing::{info, warn};

use crate::collab::Collaborators;
use crate::config::EngineConfig;
use crate::gate::CallGate;
use crate::parse::parse_json;
use crate::prompts;
use crate::state::{ResearchState, Stage};

/// Structured reply contract for the reflection call.
#[derive(Debug, Deserialize)]
struct Reflection {
    is_sufficient: bool,
    #[serde(default)]
    knowledge_gap: String,
    #[serde(default)]
    follow_up_queries: Vec<String>,
}

/// Bounded context block built from the retrieved chunks, grouped by URL.
fn chunk_digest(state: &ResearchState) -> String {
    let mut out = String::new();
    for chunk in &state.relevant_chunks {
        out.push_str(&format!("Source: {}\n{}\n\n", chunk.source_url, chunk.text));
    }
    out
}

/// Run the Judge stage. Sets `sufficiency_verdict` and, when insufficient,
/// `knowledge_gap` and `follow_up_queries`.
pub async fn judge_sufficiency(
    cfg: &EngineConfig,
    gate: &CallGate,
    collab: &Collaborators,
    state: &mut ResearchState,
) {
    if state.relevant_chunks.is_empty() {
        // Nothing retrieved this round: insufficient, no call needed. The
        // orchestrator's cap is what ends a run of empty rounds.
        warn!("no retrieved chunks to judge, verdict is insufficient");
        state.sufficiency_verdict = Some(false);
        state.knowledge_gap = "no sources were gathered".to_string();
        return;
    }
    let Some(llm) = collab.llm.as_ref() else {
        state.record_error(Stage::Judge, &Error::NotConfigured("llm".to_string()));
        state.sufficiency_verdict = Some(true);
        return;
    };

    let instructions = prompts::reflection_instructions(&state.query);
    let digest = chunk_digest(state);
    let out = gate
        .call("judge_sufficiency", || {
            let llm = llm.clone();
            let messages = vec![
                Message::system(instructions.clone()),
                Message::user(digest.clone()),
            ];
            async move { llm.complete(&messages, None).await }
        })
        .await;

    let raw = match out {
        Ok(raw) => raw,
        Err(e) => {
            state.record_error(Stage::Judge, &e);
            state.sufficiency_verdict = Some(true);
            return;
        }
    };

    match parse_json::<Reflection>(&raw) {
        Ok(r) => {
            info!(
                sufficient = r.is_sufficient,
                follow_ups = r.follow_up_queries.len(),
                "sufficiency verdict"
            );
            state.sufficiency_verdict = Some(r.is_sufficient);
            state.knowledge_gap = r.knowledge_gap;
            let mut follow_ups: Vec<String> = r
                .follow_up_queries
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .collect();
            follow_ups.truncate(cfg.max_search_queries);
            state.follow_up_queries = follow_ups;
        }
        Err(e) => {
            warn!(error = %e, "reflection did not parse, declaring sufficient");
            state.record_error(Stage::Judge, &Error::Parse(e));
            state.sufficiency_verdict = Some(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::PromptProfile;
    use researchpipe_core::{LlmClient, Result};
    use std::sync::Arc;

    struct CannedLlm(String);

    #[async_trait::async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, _messages: &[Message], _max_tokens: Option<u64>) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn state_with_material() -> ResearchState {
        let mut st = ResearchState::new("q", PromptProfile::General, false);
        st.relevant_content
            .insert("https://a".to_string(), "text".to_string());
        st.relevant_chunks.push(researchpipe_core::Chunk {
            text: "text".to_string(),
            source_url: "https://a".to_string(),
            index: 0,
        });
        st
    }

    #[tokio::test]
    async fn insufficient_verdict_carries_gap_and_follow_ups() {
        let cfg = EngineConfig::default();
        let gate = CallGate::new(&cfg);
        let reply = r#"{"is_sufficient": false, "knowledge_gap": "missing pricing data",
                        "follow_up_queries": ["pricing 2025", "vendor comparison"]}"#;
        let collab = Collaborators::new().with_llm(Arc::new(CannedLlm(reply.to_string())));
        let mut st = state_with_material();
        judge_sufficiency(&cfg, &gate, &collab, &mut st).await;
        assert_eq!(st.sufficiency_verdict, Some(false));
        assert_eq!(st.knowledge_gap, "missing pricing data");
        assert_eq!(st.follow_up_queries.len(), 2);
    }

    #[tokio::test]
    async fn unparseable_reply_defaults_to_sufficient() {
        let cfg = EngineConfig::default();
        let gate = CallGate::new(&cfg);
        let collab =
            Collaborators::new().with_llm(Arc::new(CannedLlm("no json here".to_string())));
        let mut st = state_with_material();
        judge_sufficiency(&cfg, &gate, &collab, &mut st).await;
        assert_eq!(st.sufficiency_verdict, Some(true));
        assert_eq!(st.errors.len(), 1);
    }

    #[tokio::test]
    async fn empty_retrieval_is_insufficient_even_with_raw_content() {
        let cfg = EngineConfig::default();
        let gate = CallGate::new(&cfg);
        // A sufficient reply would flip the verdict if the call happened.
        let reply = r#"{"is_sufficient": true, "knowledge_gap": "", "follow_up_queries": []}"#;
        let collab = Collaborators::new().with_llm(Arc::new(CannedLlm(reply.to_string())));
        let mut st = ResearchState::new("q", PromptProfile::General, false);
        st.relevant_content
            .insert("https://a".to_string(), "text the index never chunked".to_string());
        judge_sufficiency(&cfg, &gate, &collab, &mut st).await;
        assert_eq!(st.sufficiency_verdict, Some(false));
        assert!(st.errors.is_empty());
    }

    #[tokio::test]
    async fn empty_round_is_insufficient_without_a_call() {
        let cfg = EngineConfig::default();
        let gate = CallGate::new(&cfg);
        let collab = Collaborators::new();
        let mut st = ResearchState::new("q", PromptProfile::General, false);
        judge_sufficiency(&cfg, &gate, &collab, &mut st).await;
        assert_eq!(st.sufficiency_verdict, Some(false));
        assert!(st.errors.is_empty());
    }
}
