//! Data contracts of the ranking pipeline. All values are request-scoped.

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

/// Inclusive bounds of a resume score.
pub const SCORE_MIN: u8 = 0;
pub const SCORE_MAX: u8 = 100;

/// Inclusive upper bound of a single criterion's score (lower bound is 0).
pub const CRITERION_SCORE_MAX: u8 = 5;

/// How strongly the job description asks for a criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Required,
    Preferred,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Required => "required",
            Importance::Preferred => "preferred",
        }
    }

    /// Case-insensitive match on the flag word.
    pub fn parse(word: &str) -> Option<Self> {
        let word = word.trim();
        if word.eq_ignore_ascii_case("required") {
            Some(Importance::Required)
        } else if word.eq_ignore_ascii_case("preferred") {
            Some(Importance::Preferred)
        } else {
            None
        }
    }
}

/// A single hiring requirement. The label is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Criterion {
    label: String,
    importance: Importance,
}

impl Criterion {
    pub fn new(label: impl Into<String>, importance: Importance) -> Option<Self> {
        let label = label.into().trim().to_string();
        if label.is_empty() {
            None
        } else {
            Some(Self { label, importance })
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn importance(&self) -> Importance {
        self.importance
    }
}

/// Ordered criteria for one job description. Shared read-only by every scoring call.
///
/// Never empty, so there is no `is_empty`.
#[allow(clippy::len_without_is_empty)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CriteriaSet(Vec<Criterion>);

impl CriteriaSet {
    /// Fails when there is nothing to score against.
    pub fn new(criteria: Vec<Criterion>) -> Result<Self, PipelineError> {
        if criteria.is_empty() {
            return Err(PipelineError::MalformedResponse(
                "no criteria found in reply".to_string(),
            ));
        }
        Ok(Self(criteria))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Criterion> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Criteria as a client may send them back: full objects, or bare labels (treated as required).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CriterionInput {
    Full { label: String, importance: Importance },
    Label(String),
}

impl CriterionInput {
    pub fn into_criterion(self) -> Option<Criterion> {
        match self {
            CriterionInput::Full { label, importance } => Criterion::new(label, importance),
            CriterionInput::Label(label) => Criterion::new(label, Importance::Required),
        }
    }
}

/// How well a resume meets one criterion, 0 to `CRITERION_SCORE_MAX`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriterionScore {
    pub label: String,
    pub score: u8,
}

/// A successfully scored resume. `criterion_scores` follows the order of the `CriteriaSet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeScore {
    pub resume_identifier: String,
    pub score: u8,
    pub rationale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_name: Option<String>,
    pub criterion_scores: Vec<CriterionScore>,
}

/// A resume that could not be scored, with a stable error kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeFailure {
    pub resume_identifier: String,
    pub error_kind: String,
    pub failure_reason: String,
}

impl ResumeFailure {
    pub fn from_error(resume_identifier: String, error: &PipelineError) -> Self {
        Self {
            resume_identifier,
            error_kind: error.kind().to_string(),
            failure_reason: error.to_string(),
        }
    }
}

/// Per-resume result inside a batch. One resume failing never aborts the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    Scored(ResumeScore),
    Failed(ResumeFailure),
}

/// Scored resumes sorted by score (descending, ties in submission order),
/// then failures in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankingResult {
    pub rankings: Vec<ResumeScore>,
    pub failures: Vec<ResumeFailure>,
}
