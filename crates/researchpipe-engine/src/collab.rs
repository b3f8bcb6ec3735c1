//! Injected collaborator set.
//!
//! Every external dependency of the pipeline is a trait object gathered
//! here. Availability is checked once when a run starts; a missing
//! collaborator degrades the stages that need it to empty output with a
//! recorded error instead of failing the run.

use researchpipe_core::{
    ApprovalGate, DocumentLoader, IndexBuilder, LlmClient, PageScraper, ReportSink,
    ReportTypePicker, SearchProvider,
};
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct Collaborators {
    pub llm: Option<Arc<dyn LlmClient>>,
    pub search: Option<Arc<dyn SearchProvider>>,
    pub scraper: Option<Arc<dyn PageScraper>>,
    pub documents: Option<Arc<dyn DocumentLoader>>,
    pub index: Option<Arc<dyn IndexBuilder>>,
    pub approval: Option<Arc<dyn ApprovalGate>>,
    pub report_type: Option<Arc<dyn ReportTypePicker>>,
    pub sinks: Vec<Arc<dyn ReportSink>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_scraper(mut self, scraper: Arc<dyn PageScraper>) -> Self {
        self.scraper = Some(scraper);
        self
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentLoader>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn with_index(mut self, index: Arc<dyn IndexBuilder>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_approval(mut self, approval: Arc<dyn ApprovalGate>) -> Self {
        self.approval = Some(approval);
        self
    }

    pub fn with_report_type(mut self, picker: Arc<dyn ReportTypePicker>) -> Self {
        self.report_type = Some(picker);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Names of collaborators that are absent. Logged once at run start.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.llm.is_none() {
            out.push("llm");
        }
        if self.search.is_none() {
            out.push("search");
        }
        if self.scraper.is_none() {
            out.push("scraper");
        }
        if self.documents.is_none() {
            out.push("documents");
        }
        if self.index.is_none() {
            out.push("index");
        }
        if self.approval.is_none() {
            out.push("approval");
        }
        if self.report_type.is_none() {
            out.push("report_type");
        }
        if self.sinks.is_empty() {
            out.push("sinks");
        }
        out
    }
}
