//! Report type choice and final synthesis.
//!
//! Synthesis runs in three phases: an outline call that plans sections and
//! per-section word targets, one writing call per section, and optional
//! expansion passes when the draft lands well under its planned length.
//! The word cap is enforced by truncation at the end regardless of what
//! the model produced.

use futures_util::future::join_all;
use researchpipe_core::{Error, Message, ReportType};
use serde::Deserialize;
use tracing::{info, warn};

use crate::collab::Collaborators;
use crate::config::{EngineConfig, ReportBudget};
use crate::gate::CallGate;
use crate::parse::parse_json;
use crate::prompts;
use crate::state::{ResearchState, Stage};

#[derive(Debug, Deserialize)]
struct OutlinePlan {
    sections: Vec<PlannedSection>,
}

#[derive(Debug, Deserialize)]
struct PlannedSection {
    title: String,
    #[serde(default)]
    words: usize,
}

#[derive(Debug, Clone)]
struct Section {
    title: String,
    words: usize,
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Truncate to at most `max` words, preserving original spacing up to the
/// cut point.
pub fn truncate_words(text: &str, max: usize) -> String {
    let mut seen = 0usize;
    let mut in_word = false;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            in_word = false;
        } else if !in_word {
            in_word = true;
            seen += 1;
            if seen > max {
                return text[..i].trim_end().to_string();
            }
        }
    }
    text.to_string()
}

/// Filesystem-safe name derived from the research question.
pub fn report_file_name(query: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in query.chars().take(80) {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "research-report".to_string()
    } else {
        slug
    }
}

/// Run the ChooseReportType stage. No picker, or a failing one, means
/// detailed.
pub async fn choose_report_type(collab: &Collaborators, state: &mut ResearchState) {
    let chosen = match collab.report_type.as_ref() {
        Some(picker) => match picker.pick().await {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = %e, "report type picker failed, defaulting to detailed");
                state.record_error(Stage::ChooseReportType, &e);
                ReportType::Detailed
            }
        },
        None => ReportType::Detailed,
    };
    state.report_type = Some(chosen);
}

/// Source material block for the writing calls: retrieved chunks when the
/// index produced any, otherwise the raw extractions.
fn source_material(state: &ResearchState) -> String {
    if !state.relevant_chunks.is_empty() {
        let mut out = String::new();
        for chunk in &state.relevant_chunks {
            out.push_str(&format!("Source: {}\n{}\n\n", chunk.source_url, chunk.text));
        }
        return out;
    }
    let mut out = String::new();
    for (url, text) in &state.relevant_content {
        out.push_str(&format!("Source: {url}\n{text}\n\n"));
    }
    out
}

fn outline_instructions(topic: &str, budget: &ReportBudget) -> String {
    format!(
        "Plan the section outline for a research report on: {topic}\n\
         Use between {min} and {max} sections. Respond with a single JSON object \
         with key \"sections\": a list of objects with \"title\" (string) and \
         \"words\" (integer word target). JSON only.",
        min = budget.min_sections,
        max = budget.max_sections,
    )
}

/// Clamp the outline to the budget, substituting defaults for anything
/// missing or mangled.
fn sanitize_outline(
    plan: Option<OutlinePlan>,
    budget: &ReportBudget,
    report_type: ReportType,
) -> Vec<Section> {
    let cap = budget.max_section_words(report_type);
    let mut sections: Vec<Section> = plan
        .map(|p| p.sections)
        .unwrap_or_default()
        .into_iter()
        .filter(|s| !s.title.trim().is_empty())
        .take(budget.max_sections)
        .map(|s| {
            let words = if s.words == 0 {
                budget.default_section_words
            } else {
                s.words
            };
            Section {
                title: s.title.trim().to_string(),
                words: words.clamp(budget.min_section_words, cap),
            }
        })
        .collect();

    if sections.len() < budget.min_sections {
        sections = default_outline(budget, cap);
    }

    // Rescale proportionally when the plan overshoots the whole-report cap.
    let total: usize = sections.iter().map(|s| s.words).sum();
    if total > budget.max_words {
        for s in &mut sections {
            s.words = (s.words * budget.max_words / total).max(budget.min_section_words);
        }
    }
    sections
}

fn default_outline(budget: &ReportBudget, cap: usize) -> Vec<Section> {
    ["Overview", "Findings", "Conclusion"]
        .iter()
        .take(budget.min_sections.max(2).min(3))
        .map(|t| Section {
            title: (*t).to_string(),
            words: budget.default_section_words.clamp(budget.min_section_words, cap),
        })
        .collect()
}

fn sources_appendix(state: &ResearchState) -> String {
    if state.relevant_content.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n## Sources\n\n");
    for url in state.relevant_content.keys() {
        out.push_str(&format!("- {url}\n"));
    }
    out
}

/// Assemble a source digest with no model involvement. Used when the LLM
/// is missing or every writing call failed.
fn fallback_report(state: &ResearchState) -> String {
    let mut out = format!("# {}\n\n", state.query);
    out.push_str("Automated synthesis was unavailable; the gathered extracts follow.\n\n");
    for (url, text) in &state.relevant_content {
        out.push_str(&format!("## {url}\n\n{text}\n\n"));
    }
    out
}

/// Run the Synthesize stage, leaving the finished report in
/// `state.report`.
pub async fn synthesize(
    cfg: &EngineConfig,
    gate: &CallGate,
    collab: &Collaborators,
    state: &mut ResearchState,
) {
    let report_type = state.report_type.unwrap_or(ReportType::Detailed);
    let budget = cfg.budget(report_type).clone();

    if state.relevant_content.is_empty() && state.relevant_chunks.is_empty() {
        // No evidence at all: a fixed message, no model call.
        state.report = format!(
            "# {}\n\nNo relevant sources could be gathered for this query.\n",
            state.query
        );
        return;
    }

    let Some(llm) = collab.llm.as_ref() else {
        state.record_error(Stage::Synthesize, &Error::NotConfigured("llm".to_string()));
        let fallback = fallback_report(state);
        state.report = truncate_words(&fallback, budget.max_words);
        return;
    };
    let llm = llm.clone();

    let material = source_material(state);
    let base = prompts::report_writer_instructions(state.prompt_profile, &state.query);
    let style = prompts::synthesis_style(state.reasoning_mode);

    // Phase 1: outline.
    let outline_raw = gate
        .call("report_outline", || {
            let llm = llm.clone();
            let messages = vec![
                Message::system(outline_instructions(&state.query, &budget)),
                Message::user(material.clone()),
            ];
            async move { llm.complete(&messages, None).await }
        })
        .await;
    let plan = match outline_raw {
        Ok(raw) => match parse_json::<OutlinePlan>(&raw) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(error = %e, "outline did not parse, using default sections");
                state.record_error(Stage::Synthesize, &Error::Parse(e));
                None
            }
        },
        Err(e) => {
            state.record_error(Stage::Synthesize, &e);
            None
        }
    };
    let sections = sanitize_outline(plan, &budget, report_type);
    let planned_total: usize = sections.iter().map(|s| s.words).sum();

    // Phase 2: one writing call per section, concurrent under the gate.
    let bodies = join_all(sections.iter().map(|section| {
        let llm = llm.clone();
        let base = base.clone();
        let material = material.clone();
        async move {
            let instructions = format!(
                "{base}\n{style}\n\
                 Write the section titled \"{title}\" in roughly {words} words. \
                 Output the section body only, no heading.",
                title = section.title,
                words = section.words,
            );
            gate.call("report_section", || {
                let llm = llm.clone();
                let messages = vec![
                    Message::system(instructions.clone()),
                    Message::user(material.clone()),
                ];
                async move { llm.complete(&messages, None).await }
            })
            .await
        }
    }))
    .await;

    let mut draft = format!("# {}\n", state.query);
    let mut any_body = false;
    for (section, body) in sections.iter().zip(bodies) {
        match body {
            Ok(text) => {
                any_body = true;
                draft.push_str(&format!("\n## {}\n\n{}\n", section.title, text.trim()));
            }
            Err(e) => {
                warn!(section = %section.title, error = %e, "section writing failed");
                state.record_error(Stage::Synthesize, &e);
                draft.push_str(&format!(
                    "\n## {}\n\nThis section could not be generated.\n",
                    section.title
                ));
            }
        }
    }
    if !any_body {
        let mut fallback = fallback_report(state);
        fallback.push_str(&sources_appendix(state));
        state.report = truncate_words(&fallback, budget.max_words);
        return;
    }

    // Phase 3: expansion when the draft lands well under plan.
    let floor = budget
        .min_words
        .max((planned_total as f64 * budget.min_fill_ratio) as usize);
    let mut expansions = 0usize;
    while word_count(&draft) < floor && expansions < budget.max_expansions {
        expansions += 1;
        info!(
            words = word_count(&draft),
            floor, expansions, "draft under target, expanding"
        );
        let out = gate
            .call("report_expand", || {
                let llm = llm.clone();
                let instructions = format!(
                    "{base}\n{style}\n\
                     The draft below is too short. Expand it with more detail from \
                     the sources, keeping its structure and headings, to roughly \
                     {floor} words. Output the full revised report."
                );
                let messages = vec![
                    Message::system(instructions),
                    Message::user(format!("{material}\n---\nDraft:\n{draft}")),
                ];
                async move { llm.complete(&messages, None).await }
            })
            .await;
        match out {
            Ok(revised) if word_count(&revised) > word_count(&draft) => draft = revised,
            Ok(_) => break,
            Err(e) => {
                state.record_error(Stage::Synthesize, &e);
                break;
            }
        }
    }

    // Truncation runs on the complete document, appendix included, so the
    // word cap holds for the delivered report.
    draft.push_str(&sources_appendix(state));
    let report = truncate_words(&draft, budget.max_words);
    info!(
        words = word_count(&report),
        report_type = report_type.as_str(),
        "report synthesized"
    );
    state.report = report;
}

/// Deliver the finished report to every configured sink. Sink failures are
/// recorded per sink and never abort delivery to the others.
pub async fn deliver_report(collab: &Collaborators, state: &mut ResearchState) {
    if state.report.is_empty() {
        return;
    }
    let name = report_file_name(&state.query);
    for sink in &collab.sinks {
        match sink.write(&state.report, &name).await {
            Ok(location) => info!(sink = sink.name(), location, "report written"),
            Err(e) => {
                warn!(sink = sink.name(), error = %e, "sink failed");
                state.record_error(Stage::Synthesize, &e);
            }
        }
    }
}
