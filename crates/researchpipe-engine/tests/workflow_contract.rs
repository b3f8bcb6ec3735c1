//! End-to-end pipeline runs against scripted collaborators.

use async_trait::async_trait;
use researchpipe_core::{
    ApprovalDecision, ApprovalGate, Chunk, Error, IndexBuilder, LlmClient, Message, ReportSink,
    ReportType, ReportTypePicker, Result, SearchProvider, SearchResult, SimilarityIndex,
};
use researchpipe_engine::{
    filter, CallGate, Collaborators, EngineConfig, Pipeline, PromptProfile, ResearchState,
    RunOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Routes each call on the system prompt's wording, the same way the real
/// pipeline distinguishes its calls.
struct ScriptedLlm {
    snippet_calls: AtomicUsize,
    judge_calls: AtomicUsize,
    /// Verdicts popped front-to-back by successive judge calls; when the
    /// script runs out the judge sees "sufficient".
    judge_script: Mutex<Vec<&'static str>>,
}

impl ScriptedLlm {
    fn new(judge_script: Vec<&'static str>) -> Self {
        Self {
            snippet_calls: AtomicUsize::new(0),
            judge_calls: AtomicUsize::new(0),
            judge_script: Mutex::new(judge_script),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, messages: &[Message], _max_tokens: Option<u64>) -> Result<String> {
        let system = &messages[0].content;
        if system.contains("generating web search queries") {
            return Ok(r#"{"rationale": "cover basics", "query": ["alpha query", "beta query"]}"#
                .to_string());
        }
        if system.contains("single word") {
            self.snippet_calls.fetch_add(1, Ordering::SeqCst);
            return Ok("yes".to_string());
        }
        if system.contains("is_sufficient") {
            self.judge_calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.judge_script.lock().unwrap();
            if script.is_empty() {
                return Ok(r#"{"is_sufficient": true, "knowledge_gap": "", "follow_up_queries": []}"#.to_string());
            }
            return Ok(script.remove(0).to_string());
        }
        if system.contains("section outline") {
            return Ok(
                r#"{"sections": [{"title": "Background", "words": 200}, {"title": "Analysis", "words": 300}]}"#
                    .to_string(),
            );
        }
        if system.contains("section titled") {
            return Ok("Grounded findings drawn from the gathered sources.".to_string());
        }
        if system.contains("too short") {
            return Ok("Expanded draft with considerably more words than before, \
                       repeated across several sentences of substance."
                .to_string());
        }
        Err(Error::Llm(format!("unscripted call: {system}")))
    }
}

struct FixedSearch {
    results: Vec<SearchResult>,
    calls: AtomicUsize,
}

#[async_trait]
impl SearchProvider for FixedSearch {
    fn name(&self) -> &'static str {
        "fixed"
    }
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.clone())
    }
}

struct FixedScraper {
    fail: Vec<&'static str>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl researchpipe_core::PageScraper for FixedScraper {
    async fn scrape(&self, url: &str, _timeout: Duration) -> Result<researchpipe_core::ScrapedPage> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.fail.iter().any(|f| url.contains(f)) {
            return Err(Error::Fetch(format!("connection refused: {url}")));
        }
        Ok(researchpipe_core::ScrapedPage {
            url: url.to_string(),
            title: Some("Page".to_string()),
            text: format!("Extracted body text for {url}. ").repeat(20),
        })
    }
}

struct PassthroughIndex;

struct OrderIndex(Vec<Chunk>);

impl SimilarityIndex for OrderIndex {
    fn query(&self, _text: &str, k: usize) -> Result<Vec<Chunk>> {
        Ok(self.0.iter().take(k).cloned().collect())
    }
}

impl IndexBuilder for PassthroughIndex {
    fn build(&self, chunks: Vec<Chunk>) -> Result<Box<dyn SimilarityIndex>> {
        Ok(Box::new(OrderIndex(chunks)))
    }
}

struct MemorySink {
    written: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ReportSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }
    async fn write(&self, content: &str, name: &str) -> Result<String> {
        self.written
            .lock()
            .unwrap()
            .push((name.to_string(), content.to_string()));
        Ok(format!("memory:{name}"))
    }
}

struct PickDetailed;

#[async_trait]
impl ReportTypePicker for PickDetailed {
    async fn pick(&self) -> Result<ReportType> {
        Ok(ReportType::Detailed)
    }
}

struct CountingGate {
    reviews: AtomicUsize,
    reject_first_n: usize,
}

#[async_trait]
impl ApprovalGate for CountingGate {
    async fn review(
        &self,
        _query: &str,
        _rationale: &str,
        _queries: &[String],
    ) -> Result<ApprovalDecision> {
        let n = self.reviews.fetch_add(1, Ordering::SeqCst);
        if n < self.reject_first_n {
            Ok(ApprovalDecision::Reject {
                new_query: Some(format!("refined question {n}")),
            })
        } else {
            Ok(ApprovalDecision::Approve)
        }
    }
}

fn results(urls: &[&str]) -> Vec<SearchResult> {
    urls.iter()
        .map(|u| SearchResult {
            url: (*u).to_string(),
            title: Some("t".to_string()),
            snippet: Some(format!("snippet about {u}")),
            source: "fixed".to_string(),
        })
        .collect()
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        max_retries: 2,
        base_backoff: Duration::from_millis(1),
        call_timeout: Duration::from_secs(5),
        snippet_verdict_timeout: Duration::from_secs(5),
        url_timeout: Duration::from_secs(5),
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn happy_path_produces_report_and_writes_sinks() {
    let llm = Arc::new(ScriptedLlm::new(vec![]));
    let sink = Arc::new(MemorySink {
        written: Mutex::new(Vec::new()),
    });
    let collab = Collaborators::new()
        .with_llm(llm.clone())
        .with_search(Arc::new(FixedSearch {
            results: results(&["https://one.example/a", "https://two.example/b"]),
            calls: AtomicUsize::new(0),
        }))
        .with_scraper(Arc::new(FixedScraper {
            fail: vec![],
            calls: Mutex::new(Vec::new()),
        }))
        .with_index(Arc::new(PassthroughIndex))
        .with_report_type(Arc::new(PickDetailed))
        .with_sink(sink.clone());

    let pipeline = Pipeline::new(fast_config(), collab);
    let state = pipeline
        .run("test research topic", RunOptions::default())
        .await;

    assert_eq!(state.report_type, Some(ReportType::Detailed));
    assert!(state.report.contains("# test research topic"));
    assert!(state.report.contains("## Background"));
    assert!(state.report.contains("## Analysis"));
    assert!(state.report.contains("## Sources"));
    assert!(state.report.contains("https://one.example/a"));
    assert!(state.errors.is_empty(), "clean run: {:?}", state.errors);

    let written = sink.written.lock().unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].0, "test-research-topic");
    // Intermediates are cleared once the report stands.
    assert!(state.results.is_empty());
    assert!(state.relevant_chunks.is_empty());
}

#[tokio::test]
async fn insufficient_verdicts_trigger_refinement_rounds() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        r#"{"is_sufficient": false, "knowledge_gap": "needs data", "follow_up_queries": ["follow up one"]}"#,
    ]));
    let search = Arc::new(FixedSearch {
        results: results(&["https://one.example/a"]),
        calls: AtomicUsize::new(0),
    });
    let collab = Collaborators::new()
        .with_llm(llm.clone())
        .with_search(search.clone())
        .with_scraper(Arc::new(FixedScraper {
            fail: vec![],
            calls: Mutex::new(Vec::new()),
        }))
        .with_index(Arc::new(PassthroughIndex));

    let pipeline = Pipeline::new(fast_config(), collab);
    let state = pipeline.run("topic", RunOptions::default()).await;

    // Two judge calls: one insufficient, one (scripted default) sufficient.
    assert_eq!(llm.judge_calls.load(Ordering::SeqCst), 2);
    assert_eq!(state.refinement_loops, 1);
    // Round two searched the follow-up query plus nothing else; total
    // search calls: 2 generated queries + 1 follow-up.
    assert_eq!(search.calls.load(Ordering::SeqCst), 3);
    assert!(!state.report.is_empty());
}

#[tokio::test]
async fn refinement_cap_forces_synthesis() {
    let always_insufficient =
        r#"{"is_sufficient": false, "knowledge_gap": "more", "follow_up_queries": ["again"]}"#;
    let llm = Arc::new(ScriptedLlm::new(vec![
        always_insufficient,
        always_insufficient,
        always_insufficient,
        always_insufficient,
        always_insufficient,
    ]));
    let collab = Collaborators::new()
        .with_llm(llm.clone())
        .with_search(Arc::new(FixedSearch {
            results: results(&["https://one.example/a"]),
            calls: AtomicUsize::new(0),
        }))
        .with_scraper(Arc::new(FixedScraper {
            fail: vec![],
            calls: Mutex::new(Vec::new()),
        }))
        .with_index(Arc::new(PassthroughIndex));

    let cfg = fast_config();
    let cap = cfg.max_refinement_loops;
    let pipeline = Pipeline::new(cfg, collab);
    let state = pipeline.run("topic", RunOptions::default()).await;

    assert_eq!(llm.judge_calls.load(Ordering::SeqCst), cap);
    assert!(!state.report.is_empty());
    assert!(state
        .errors
        .iter()
        .any(|e| e.message.contains("refinement loop cap")));
}

#[tokio::test]
async fn approval_rejections_reset_and_cap() {
    let gate = Arc::new(CountingGate {
        reviews: AtomicUsize::new(0),
        reject_first_n: 10,
    });
    let llm = Arc::new(ScriptedLlm::new(vec![]));
    let collab = Collaborators::new()
        .with_llm(llm)
        .with_approval(gate.clone());

    let cfg = fast_config();
    let cap = cfg.max_approval_loops;
    let pipeline = Pipeline::new(cfg, collab);
    let state = pipeline.run("original question", RunOptions::default()).await;

    assert_eq!(gate.reviews.load(Ordering::SeqCst), cap);
    assert_eq!(state.approval_loops, cap);
    // The replacement question from the last rejection stuck.
    assert!(state.query.starts_with("refined question"));
    assert!(state
        .errors
        .iter()
        .any(|e| e.message.contains("approval loop cap")));
}

#[tokio::test]
async fn acceptance_on_the_final_allowed_pass_counts_every_review() {
    // Rejected twice, accepted on the third pass: the counter reflects all
    // three trips through the gate, and the run proceeds normally.
    let gate = Arc::new(CountingGate {
        reviews: AtomicUsize::new(0),
        reject_first_n: 2,
    });
    let llm = Arc::new(ScriptedLlm::new(vec![]));
    let collab = Collaborators::new()
        .with_llm(llm)
        .with_approval(gate.clone());

    let cfg = fast_config();
    assert_eq!(cfg.max_approval_loops, 3);
    let pipeline = Pipeline::new(cfg, collab);
    let state = pipeline.run("original question", RunOptions::default()).await;

    assert_eq!(gate.reviews.load(Ordering::SeqCst), 3);
    assert_eq!(state.approval_loops, 3);
    assert_eq!(state.query, "refined question 1");
    assert!(!state
        .errors
        .iter()
        .any(|e| e.message.contains("approval loop cap")));
}

#[tokio::test]
async fn failed_urls_are_never_refetched() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        r#"{"is_sufficient": false, "knowledge_gap": "x", "follow_up_queries": ["more"]}"#,
    ]));
    let scraper = Arc::new(FixedScraper {
        fail: vec!["two.example"],
        calls: Mutex::new(Vec::new()),
    });
    let collab = Collaborators::new()
        .with_llm(llm)
        .with_search(Arc::new(FixedSearch {
            results: results(&["https://one.example/a", "https://two.example/b"]),
            calls: AtomicUsize::new(0),
        }))
        .with_scraper(scraper.clone())
        .with_index(Arc::new(PassthroughIndex));

    let pipeline = Pipeline::new(fast_config(), collab);
    let state = pipeline.run("topic", RunOptions::default()).await;

    let calls = scraper.calls.lock().unwrap();
    let failed_attempts = calls
        .iter()
        .filter(|u| u.contains("two.example"))
        .count();
    assert_eq!(failed_attempts, 1, "failed url retried: {calls:?}");
    assert!(state.failed_urls.contains("https://two.example/b"));
    assert!(!state.report.is_empty());
}

#[tokio::test]
async fn revisited_urls_are_not_rescreened() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        r#"{"is_sufficient": false, "knowledge_gap": "x", "follow_up_queries": ["again"]}"#,
    ]));
    // The same two results come back every round; accepted URLs are
    // visited, so round two drops them before any relevance call.
    let collab = Collaborators::new()
        .with_llm(llm.clone())
        .with_search(Arc::new(FixedSearch {
            results: results(&["https://one.example/a", "https://two.example/b"]),
            calls: AtomicUsize::new(0),
        }))
        .with_scraper(Arc::new(FixedScraper {
            fail: vec![],
            calls: Mutex::new(Vec::new()),
        }))
        .with_index(Arc::new(PassthroughIndex));

    let pipeline = Pipeline::new(fast_config(), collab);
    let _ = pipeline.run("topic", RunOptions::default()).await;

    assert_eq!(llm.snippet_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn snippet_verdict_cache_survives_an_approval_reset() {
    let cfg = fast_config();
    let gate = CallGate::new(&cfg);
    let llm = Arc::new(ScriptedLlm::new(vec![]));
    let collab = Collaborators::new()
        .with_llm(llm.clone())
        .with_search(Arc::new(FixedSearch {
            results: results(&["https://one.example/a", "https://two.example/b"]),
            calls: AtomicUsize::new(0),
        }));

    let mut state = ResearchState::new("topic", PromptProfile::General, false);
    state.search_queries = vec!["topic".to_string()];
    filter::search_filter(&cfg, &gate, &collab, &mut state).await;
    assert_eq!(llm.snippet_calls.load(Ordering::SeqCst), 2);

    // A rejection wipes the visited set and accumulated results but keeps
    // the verdict cache, so identical (url, snippet) pairs are decided from
    // the cache without a second relevance call.
    state.reset_for_new_query(None);
    assert!(state.visited_urls.is_empty());
    state.search_queries = vec!["topic".to_string()];
    filter::search_filter(&cfg, &gate, &collab, &mut state).await;

    assert_eq!(llm.snippet_calls.load(Ordering::SeqCst), 2);
    assert_eq!(state.results.len(), 2);
}

#[tokio::test]
async fn bare_pipeline_still_finishes_with_fallback_report() {
    let pipeline = Pipeline::new(fast_config(), Collaborators::new());
    let state = pipeline.run("unassisted topic", RunOptions::default()).await;

    assert_eq!(state.report_type, Some(ReportType::Detailed));
    assert!(state.report.contains("unassisted topic"));
    assert!(state.report.contains("No relevant sources"));
    assert!(!state.errors.is_empty());
    // The missing LLM shows up against the stages that needed it.
    assert!(state
        .errors
        .iter()
        .any(|e| e.message.contains("not configured")));
}

#[tokio::test]
async fn blocked_domains_never_reach_the_scraper() {
    let llm = Arc::new(ScriptedLlm::new(vec![]));
    let scraper = Arc::new(FixedScraper {
        fail: vec![],
        calls: Mutex::new(Vec::new()),
    });
    let collab = Collaborators::new()
        .with_llm(llm)
        .with_search(Arc::new(FixedSearch {
            results: results(&[
                "https://one.example/a",
                "https://www.youtube.com/watch?v=x",
            ]),
            calls: AtomicUsize::new(0),
        }))
        .with_scraper(scraper.clone())
        .with_index(Arc::new(PassthroughIndex));

    let pipeline = Pipeline::new(fast_config(), collab);
    let state = pipeline.run("topic", RunOptions::default()).await;

    let calls = scraper.calls.lock().unwrap();
    assert!(calls.iter().all(|u| !u.contains("youtube")), "{calls:?}");
    assert!(state.report.contains("https://one.example/a"));
}
