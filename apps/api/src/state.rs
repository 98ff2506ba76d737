use crate::config::Config;
use crate::ranking::RankingPipeline;

/// Shared application state injected into all route handlers via Axum extractors.
/// Holds no per-request data; every request builds its own documents and results.
#[derive(Clone)]
pub struct AppState {
    /// Orchestrator wired to the AI completion provider chosen at startup.
    pub pipeline: RankingPipeline,
    pub config: Config,
}
