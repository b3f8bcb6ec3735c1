//! Iterative research pipeline engine.
//!
//! The engine turns one research question into a written report by looping
//! query generation, web search, content extraction, retrieval, and a
//! sufficiency judgment, then synthesizing the gathered material. Every
//! external capability (LLM, search, scraping, indexing, approval, report
//! delivery) is injected through the trait objects in [`Collaborators`];
//! the engine itself performs no I/O beyond what those provide.

pub mod collab;
pub mod config;
pub mod fetch;
pub mod filter;
pub mod gate;
pub mod index;
pub mod judge;
pub mod parse;
pub mod prompts;
pub mod queries;
pub mod report;
pub mod state;
pub mod workflow;

pub use collab::Collaborators;
pub use config::{EngineConfig, ReportBudget};
pub use gate::{CallGate, CallOptions};
pub use prompts::PromptProfile;
pub use state::{ErrorKind, ResearchState, Stage, StageError};
pub use workflow::{Pipeline, RunOptions};
