// Requirement extraction and resume ranking.
// Implements: prompt building, reply parsing, the orchestrator and its HTTP handlers.
// All AI calls go through llm_client; no direct HTTP calls here.

pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod prompts;

// Re-export the public API consumed by state and routes.
pub use orchestrator::{PipelineSettings, RankingPipeline};
