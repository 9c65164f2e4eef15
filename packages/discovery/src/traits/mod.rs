//! Collaborator contracts.
//!
//! These traits define the interfaces the engine depends on for
//! fetching pages and calling an LLM.

pub mod fetcher;
pub mod llm;
