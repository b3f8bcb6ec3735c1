//! Run orchestration.
//!
//! `Pipeline` owns the configuration, call gate, and collaborator set, and
//! drives one research question through the stage graph:
//!
//! generate queries -> approve -> (search -> fetch -> index -> judge)*
//!   -> choose report type -> synthesize -> deliver
//!
//! Loop caps are enforced here and nowhere else: the approval loop and the
//! refinement loop each terminate by routing, with a budget record left on
//! the state when a cap forces the exit.

use researchpipe_core::{ApprovalDecision, Error};
use tracing::{info, info_span, warn, Instrument};

use crate::collab::Collaborators;
use crate::config::EngineConfig;
use crate::gate::CallGate;
use crate::prompts::PromptProfile;
use crate::state::{ErrorKind, ResearchState, Stage};
use crate::{fetch, filter, index, judge, queries, report};

/// Per-run options beyond the engine configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub profile: PromptProfile,
    /// Verbose/interpretive synthesis instead of a factual digest.
    pub reasoning_mode: bool,
}

pub struct Pipeline {
    cfg: EngineConfig,
    gate: CallGate,
    collab: Collaborators,
}

impl Pipeline {
    pub fn new(cfg: EngineConfig, collab: Collaborators) -> Self {
        let gate = CallGate::new(&cfg);
        Self { cfg, gate, collab }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Drive one research question to a finished report. Never fails:
    /// every stage degrades and records, and the returned state carries
    /// the report (possibly a fallback digest) plus the error log.
    pub async fn run(&self, query: impl Into<String>, opts: RunOptions) -> ResearchState {
        let query = query.into();
        let span = info_span!("research_run", query = %query);
        self.run_inner(query, opts).instrument(span).await
    }

    async fn run_inner(&self, query: String, opts: RunOptions) -> ResearchState {
        let mut state = ResearchState::new(query, opts.profile, opts.reasoning_mode);
        let missing = self.collab.missing();
        if !missing.is_empty() {
            info!(missing = ?missing, "starting run with absent collaborators");
        }

        if self.approval_loop(&mut state).await {
            self.refinement_loop(&mut state).await;
        }

        report::choose_report_type(&self.collab, &mut state).await;
        report::synthesize(&self.cfg, &self.gate, &self.collab, &mut state).await;
        report::deliver_report(&self.collab, &mut state).await;

        state.clear_round_data();
        info!(
            report_words = report::word_count(&state.report),
            errors = state.errors.len(),
            "run complete"
        );
        state
    }

    /// Generate queries and pass them through the approval gate, restarting
    /// with a replacement question on rejection. Every pass through the gate
    /// counts against the cap, accepted or not. Returns false when the cap
    /// was hit on a rejection, which routes straight to the report with
    /// whatever exists.
    async fn approval_loop(&self, state: &mut ResearchState) -> bool {
        let mut loops = 0usize;
        let approved = loop {
            queries::generate_queries(&self.cfg, &self.gate, &self.collab, state).await;
            loops += 1;
            match queries::approve(&self.collab, state).await {
                ApprovalDecision::Approve => break true,
                ApprovalDecision::Reject { new_query } => {
                    if loops >= self.cfg.max_approval_loops {
                        warn!(loops, "approval cap reached, skipping to report");
                        state.record_error(
                            Stage::Approve,
                            &Error::BudgetExceeded(format!(
                                "approval loop cap of {} reached",
                                self.cfg.max_approval_loops
                            )),
                        );
                        break false;
                    }
                    info!(loops, new_query = ?new_query, "plan rejected, regenerating");
                    state.reset_for_new_query(new_query);
                    state.approval_loops = loops;
                }
            }
        };
        state.approval_loops = loops;
        approved
    }

    /// Search, fetch, index, and judge, repeating with the judge's
    /// follow-up queries until sufficiency or the refinement cap.
    async fn refinement_loop(&self, state: &mut ResearchState) {
        loop {
            filter::search_filter(&self.cfg, &self.gate, &self.collab, state).await;
            fetch::fetch_content(&self.cfg, &self.gate, &self.collab, state).await;
            index::index_and_retrieve(&self.cfg, &self.collab, state);
            judge::judge_sufficiency(&self.cfg, &self.gate, &self.collab, state).await;

            if state.sufficiency_verdict.unwrap_or(true) {
                break;
            }
            state.refinement_loops += 1;
            if state.refinement_loops >= self.cfg.max_refinement_loops {
                warn!(
                    loops = state.refinement_loops,
                    "refinement cap reached, synthesizing with what we have"
                );
                state.record_message(
                    Stage::Judge,
                    ErrorKind::BudgetExceeded,
                    format!(
                        "refinement loop cap of {} reached",
                        self.cfg.max_refinement_loops
                    ),
                );
                break;
            }
            // Next round searches for what the judge said is missing; the
            // raw question is the backstop when no follow-ups came back.
            state.search_queries = if state.follow_up_queries.is_empty() {
                vec![state.query.clone()]
            } else {
                std::mem::take(&mut state.follow_up_queries)
            };
        }
    }
}
