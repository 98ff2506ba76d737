//! Prompt Builder: deterministic instruction text for both pipeline tasks.
//!
//! The reply formats written here are the contract `ranking::parser` enforces.
//! Keep the two in step.

use crate::llm_client::prompts::PLAIN_TEXT_ONLY;
use crate::ranking::models::{CriteriaSet, CRITERION_SCORE_MAX, SCORE_MAX, SCORE_MIN};

/// Reply sentinel when the text is not a job description.
pub const INVALID_JD_SENTINEL: &str = "INVALID_INPUT";
/// Reply sentinel when the text is not a resume.
pub const INVALID_RESUME_SENTINEL: &str = "NOT_VALID";

const CRITERIA_SYSTEM: &str = "You are an expert recruiter who extracts hiring requirements \
    from job descriptions.";

const SCORING_SYSTEM: &str = "You are a resume ranking and analysis expert who scores a \
    single resume against a fixed list of job requirements.";

/// Criteria extraction template. Replace `{jd_text}` before sending.
const CRITERIA_PROMPT_TEMPLATE: &str = r#"Analyse the text below and decide whether it is a job description.
If it is NOT a job description, reply with exactly INVALID_INPUT and nothing else.

Otherwise extract every key requirement: skills, certifications, experience and qualifications.
Write one requirement per line in EXACTLY this format:
REQUIRED | <requirement>
PREFERRED | <requirement>

Rules:
- Use REQUIRED for must-haves ("required", "must have", "you will need", minimum years).
- Use PREFERRED for nice-to-haves ("preferred", "bonus", "nice to have", "a plus").
- Each requirement is a short, self-contained statement. Keep quantities such as years.
- The "|" character separates the flag from the requirement. Do not use "|" anywhere else.
- No other lines.

JOB DESCRIPTION:
{jd_text}"#;

/// Resume scoring template. Fill `{criteria}`, `{resume_text}`, `{min}`, `{max}`,
/// `{criterion_max}` with `fill_template`.
const SCORING_PROMPT_TEMPLATE: &str = r#"Score how well the resume below matches the job requirements.
REQUIRED requirements weigh more than PREFERRED ones.

If the text is not a resume from a candidate, reply with exactly NOT_VALID and nothing else.

Otherwise reply with one CRITERION line per requirement, in the order listed, then EXACTLY three more lines:
CRITERION | <requirement text exactly as listed, without its number or tag> | <one integer from 0 to {criterion_max}>
CANDIDATE | <candidate's full name, or Unknown>
SCORE | <one integer from {min} to {max}>
RATIONALE | <one sentence explaining the score>

Rules:
- The "|" character separates the field name from its value and, on CRITERION lines, the requirement from its score.
- Score every listed requirement exactly once.
- The rationale is a single line.
- No other lines.

REQUIREMENTS:
{criteria}

RESUME:
{resume_text}"#;

/// What the pipeline is asking the service to do.
#[derive(Debug, Clone, Copy)]
pub enum PromptTask<'a> {
    ExtractCriteria {
        job_description: &'a str,
    },
    ScoreResume {
        criteria: &'a CriteriaSet,
        resume_text: &'a str,
    },
}

/// A ready-to-send prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Pure: identical inputs always give byte-identical prompts.
pub fn build_prompt(task: PromptTask<'_>) -> Prompt {
    match task {
        PromptTask::ExtractCriteria { job_description } => Prompt {
            system: format!("{CRITERIA_SYSTEM} {PLAIN_TEXT_ONLY}"),
            user: fill_template(
                CRITERIA_PROMPT_TEMPLATE,
                &[("jd_text", job_description.trim())],
            ),
        },
        PromptTask::ScoreResume {
            criteria,
            resume_text,
        } => {
            let (min, max) = (SCORE_MIN.to_string(), SCORE_MAX.to_string());
            let criterion_max = CRITERION_SCORE_MAX.to_string();
            let criteria = render_criteria(criteria);
            Prompt {
                system: format!("{SCORING_SYSTEM} {PLAIN_TEXT_ONLY}"),
                user: fill_template(
                    SCORING_PROMPT_TEMPLATE,
                    &[
                        ("min", min.as_str()),
                        ("max", max.as_str()),
                        ("criterion_max", criterion_max.as_str()),
                        ("criteria", criteria.as_str()),
                        ("resume_text", resume_text.trim()),
                    ],
                ),
            }
        }
    }
}

/// Replaces each `{key}` in one pass over the template. Substituted values are never
/// scanned again, so a label or resume containing `{resume_text}` stays literal.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let hit = values.iter().find(|(key, _)| {
            after.starts_with(*key) && after[key.len()..].starts_with('}')
        });
        match hit {
            Some((key, value)) => {
                out.push_str(value);
                rest = &after[key.len() + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Numbered lines, e.g. `1. [REQUIRED] 5 years Python`.
fn render_criteria(criteria: &CriteriaSet) -> String {
    criteria
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "{}. [{}] {}",
                i + 1,
                c.importance().as_str().to_ascii_uppercase(),
                c.label()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
