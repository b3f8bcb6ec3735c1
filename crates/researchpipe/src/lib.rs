//! Public facade crate for `researchpipe`.
//!
//! Re-exports the backend-agnostic types and traits from
//! `researchpipe-core`, plus the engine and the local provider
//! implementations under their own names.

pub use researchpipe_core::*;

pub use researchpipe_engine as engine;
pub use researchpipe_local as local;
