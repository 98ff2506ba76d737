//! Ranking Orchestrator: runs extract → prompt → complete → parse.
//!
//! # Stages of a ranking request
//! `Received → CriteriaReady → Scoring(i) → Aggregated → Done`, with `Failed`
//! reachable only while criteria are being extracted. Once criteria exist the
//! request always completes: each resume ends as `Scored` or `Failed`.
//!
//! # Concurrency
//! Per-resume pipelines share only the read-only `CriteriaSet`. They run through
//! `buffered(scoring_concurrency)` so the AI service sees a bounded number of
//! in-flight calls. Final order never depends on completion order.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::documents::{extract_text, Document};
use crate::errors::PipelineError;
use crate::llm_client::CompletionProvider;
use crate::ranking::models::{
    CriteriaSet, RankingResult, ResumeFailure, ResumeOutcome, ResumeScore,
};
use crate::ranking::parser::{parse_criteria, parse_score, ParsedScore};
use crate::ranking::prompts::{build_prompt, PromptTask};

/// Tunables for one pipeline instance.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Max resumes scored concurrently.
    pub scoring_concurrency: usize,
    /// Extra full AI rounds allowed after a malformed reply.
    pub malformed_retries: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            scoring_concurrency: 4,
            malformed_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RankingStage {
    Received,
    CriteriaReady,
    Scoring(usize),
    Aggregated,
    Done,
    Failed,
}

impl fmt::Display for RankingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankingStage::Received => write!(f, "received"),
            RankingStage::CriteriaReady => write!(f, "criteria_ready"),
            RankingStage::Scoring(i) => write!(f, "scoring({i})"),
            RankingStage::Aggregated => write!(f, "aggregated"),
            RankingStage::Done => write!(f, "done"),
            RankingStage::Failed => write!(f, "failed"),
        }
    }
}

/// A resume paired with its response identifier.
#[derive(Debug, Clone)]
pub struct ResumeSubmission {
    pub identifier: String,
    pub document: Document,
}

/// The use-case controller behind both endpoints. Cheap to clone.
#[derive(Clone)]
pub struct RankingPipeline {
    provider: Arc<dyn CompletionProvider>,
    settings: PipelineSettings,
}

impl RankingPipeline {
    pub fn new(provider: Arc<dyn CompletionProvider>, settings: PipelineSettings) -> Self {
        Self { provider, settings }
    }

    /// Extracts the criteria of one job description. Any failure fails the call.
    pub async fn extract_criteria(&self, document: &Document) -> Result<CriteriaSet, PipelineError> {
        let text = extract_off_thread(document).await?;
        require_text(&text)?;

        let prompt = build_prompt(PromptTask::ExtractCriteria {
            job_description: &text,
        });
        let criteria = self
            .complete_and_parse(&prompt.user, &prompt.system, parse_criteria)
            .await?;

        info!(criteria = criteria.len(), "Criteria extracted");
        Ok(criteria)
    }

    /// Extracts criteria from the job description, then scores every resume against them.
    ///
    /// Fails only when criteria extraction fails; per-resume failures land in
    /// `RankingResult::failures`.
    pub async fn rank_resumes(
        &self,
        job_description: &Document,
        resumes: Vec<Document>,
    ) -> Result<RankingResult, PipelineError> {
        debug!(stage = %RankingStage::Received, resumes = resumes.len());

        let criteria = match self.extract_criteria(job_description).await {
            Ok(criteria) => criteria,
            Err(e) => {
                debug!(stage = %RankingStage::Failed, kind = e.kind());
                return Err(e);
            }
        };

        Ok(self.rank_against_criteria(&criteria, resumes).await)
    }

    /// Scores resumes against criteria the caller already has. Never fails as a whole.
    pub async fn rank_against_criteria(
        &self,
        criteria: &CriteriaSet,
        resumes: Vec<Document>,
    ) -> RankingResult {
        debug!(stage = %RankingStage::CriteriaReady, criteria = criteria.len());

        let submissions = assign_identifiers(resumes);
        let outcomes: Vec<ResumeOutcome> = stream::iter(submissions.into_iter().enumerate())
            .map(|(i, submission)| async move {
                debug!(stage = %RankingStage::Scoring(i + 1), resume = %submission.identifier);
                self.score_resume(criteria, submission).await
            })
            .buffered(self.settings.scoring_concurrency.max(1))
            .collect()
            .await;

        let result = aggregate(outcomes);
        debug!(
            stage = %RankingStage::Aggregated,
            scored = result.rankings.len(),
            failed = result.failures.len()
        );
        info!(
            scored = result.rankings.len(),
            failed = result.failures.len(),
            "Resumes ranked"
        );
        debug!(stage = %RankingStage::Done);
        result
    }

    async fn score_resume(
        &self,
        criteria: &CriteriaSet,
        submission: ResumeSubmission,
    ) -> ResumeOutcome {
        let ResumeSubmission {
            identifier,
            document,
        } = submission;

        match self.try_score(criteria, &document).await {
            Ok(parsed) => ResumeOutcome::Scored(ResumeScore {
                resume_identifier: identifier,
                score: parsed.score,
                rationale: parsed.rationale,
                candidate_name: parsed.candidate_name,
                criterion_scores: parsed.criterion_scores,
            }),
            Err(e) => {
                warn!(resume = %identifier, kind = e.kind(), "Resume scoring failed: {e}");
                ResumeOutcome::Failed(ResumeFailure::from_error(identifier, &e))
            }
        }
    }

    async fn try_score(
        &self,
        criteria: &CriteriaSet,
        document: &Document,
    ) -> Result<ParsedScore, PipelineError> {
        let text = extract_off_thread(document).await?;
        require_text(&text)?;

        let prompt = build_prompt(PromptTask::ScoreResume {
            criteria,
            resume_text: &text,
        });
        self.complete_and_parse(&prompt.user, &prompt.system, |raw| {
            parse_score(raw, criteria)
        })
        .await
    }

    /// One AI round plus parse, repeated only when the reply is malformed.
    async fn complete_and_parse<T>(
        &self,
        prompt: &str,
        system: &str,
        parse: impl Fn(&str) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let mut round = 0;
        loop {
            let parsed = match self.provider.complete(prompt, system).await {
                Ok(raw) => parse(&raw),
                Err(e) => Err(PipelineError::from(e)),
            };
            match parsed {
                Err(PipelineError::MalformedResponse(reason))
                    if round < self.settings.malformed_retries =>
                {
                    round += 1;
                    warn!("Malformed AI reply ({reason}), repeating round {round}");
                }
                other => return other,
            }
        }
    }
}

/// Runs the CPU-bound extractor on the blocking pool.
async fn extract_off_thread(document: &Document) -> Result<String, PipelineError> {
    let document = document.clone();
    tokio::task::spawn_blocking(move || extract_text(&document))
        .await
        .map_err(|e| PipelineError::CorruptDocument(format!("extraction aborted ({e})")))?
}

fn require_text(text: &str) -> Result<(), PipelineError> {
    if text.trim().is_empty() {
        return Err(PipelineError::InvalidContent(
            "document contains no extractable text".to_string(),
        ));
    }
    Ok(())
}

/// File name, else `resume-<n>` (n is 1-based). A taken identifier gets `#<n>` appended,
/// with n counting up from the upload's position until the identifier is unique.
pub fn assign_identifiers(resumes: Vec<Document>) -> Vec<ResumeSubmission> {
    let mut seen = HashSet::new();
    resumes
        .into_iter()
        .enumerate()
        .map(|(i, document)| {
            let position = i + 1;
            let base = if document.name.trim().is_empty() {
                format!("resume-{position}")
            } else {
                document.name.trim().to_string()
            };
            let mut identifier = base.clone();
            let mut suffix = position;
            while !seen.insert(identifier.clone()) {
                identifier = format!("{base}#{suffix}");
                suffix += 1;
            }
            ResumeSubmission {
                identifier,
                document,
            }
        })
        .collect()
}

/// Splits outcomes (given in submission order) into ranked scores and failures.
pub fn aggregate(outcomes: Vec<ResumeOutcome>) -> RankingResult {
    let mut rankings = Vec::new();
    let mut failures = Vec::new();

    for outcome in outcomes {
        match outcome {
            ResumeOutcome::Scored(score) => rankings.push(score),
            ResumeOutcome::Failed(failure) => failures.push(failure),
        }
    }

    // Stable sort: equal scores keep submission order.
    rankings.sort_by(|a, b| b.score.cmp(&a.score));

    RankingResult { rankings, failures }
}
