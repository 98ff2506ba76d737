//! Response Parser: turns raw service replies into typed values.
//!
//! Tolerates whitespace, blank lines, code fences, list markers and flag-word
//! case. Anything structurally off is a `MalformedResponse`; this layer never retries.
//! Error messages describe what was wrong, never what the service said. The
//! offending fragment is only logged at `debug`.

use tracing::debug;

use crate::errors::PipelineError;
use crate::llm_client::prompts::FIELD_DELIMITER;
use crate::llm_client::strip_code_fences;
use crate::ranking::models::{
    CriteriaSet, Criterion, CriterionScore, Importance, CRITERION_SCORE_MAX, SCORE_MAX, SCORE_MIN,
};
use crate::ranking::prompts::{INVALID_JD_SENTINEL, INVALID_RESUME_SENTINEL};

/// Longest rationale kept, in characters.
pub const MAX_RATIONALE_CHARS: usize = 500;

/// A parsed scoring reply. The caller attaches the resume identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedScore {
    pub score: u8,
    pub rationale: Option<String>,
    pub candidate_name: Option<String>,
    pub criterion_scores: Vec<CriterionScore>,
}

/// Parses `REQUIRED | label` / `PREFERRED | label` lines.
pub fn parse_criteria(raw: &str) -> Result<CriteriaSet, PipelineError> {
    let body = strip_code_fences(raw);

    if is_sentinel(body, INVALID_JD_SENTINEL) {
        return Err(PipelineError::InvalidContent(
            "not a valid job description".to_string(),
        ));
    }

    let mut criteria = Vec::new();
    for (line_no, line) in content_lines(body) {
        let (flag, label) = split_field(line, line_no)?;
        let importance = Importance::parse(flag).ok_or_else(|| {
            debug!(line_no, flag = %preview(flag), "Unknown importance flag");
            PipelineError::MalformedResponse(format!("line {line_no}: unknown importance flag"))
        })?;
        let criterion = Criterion::new(label, importance).ok_or_else(|| {
            PipelineError::MalformedResponse(format!("line {line_no}: empty requirement label"))
        })?;
        criteria.push(criterion);
    }

    CriteriaSet::new(criteria)
}

/// Parses `CRITERION | label | n` (one per criterion, in order), `CANDIDATE | name`,
/// `SCORE | n` and `RATIONALE | text` lines.
pub fn parse_score(raw: &str, criteria: &CriteriaSet) -> Result<ParsedScore, PipelineError> {
    let body = strip_code_fences(raw);

    if is_sentinel(body, INVALID_RESUME_SENTINEL) {
        return Err(PipelineError::InvalidContent("not a valid resume".to_string()));
    }

    let mut score = None;
    let mut rationale = None;
    let mut candidate_name = None;
    let mut criterion_lines = Vec::new();

    for (line_no, line) in content_lines(body) {
        let (key, value) = split_field(line, line_no)?;
        match key.to_ascii_uppercase().as_str() {
            "SCORE" => score = Some(parse_bounded(value, SCORE_MIN, SCORE_MAX, "score")?),
            "CRITERION" => criterion_lines.push(split_criterion(value, line_no)?),
            "RATIONALE" => {
                rationale = Some(truncate(value, MAX_RATIONALE_CHARS)).filter(|r| !r.is_empty())
            }
            "CANDIDATE" => {
                candidate_name = Some(value.to_string())
                    .filter(|n| !n.is_empty() && !n.eq_ignore_ascii_case("unknown"))
            }
            // Unknown keys are ignored rather than failing an otherwise usable reply.
            _ => {}
        }
    }

    let score =
        score.ok_or_else(|| PipelineError::MalformedResponse("missing SCORE line".to_string()))?;
    let criterion_scores = match_criteria(criteria, criterion_lines)?;

    Ok(ParsedScore {
        score,
        rationale,
        candidate_name,
        criterion_scores,
    })
}

/// Value of a `CRITERION` line: `label | n`. The score is after the last delimiter
/// so a label may itself contain one.
fn split_criterion(value: &str, line_no: usize) -> Result<(&str, u8), PipelineError> {
    let (label, score) = value.rsplit_once(FIELD_DELIMITER).ok_or_else(|| {
        PipelineError::MalformedResponse(format!("line {line_no}: criterion line has no score"))
    })?;
    let score = parse_bounded(score.trim(), 0, CRITERION_SCORE_MAX, "criterion score")?;
    Ok((label.trim(), score))
}

/// Pairs criterion lines with the criteria they must answer, position by position.
fn match_criteria(
    criteria: &CriteriaSet,
    lines: Vec<(&str, u8)>,
) -> Result<Vec<CriterionScore>, PipelineError> {
    if lines.len() != criteria.len() {
        return Err(PipelineError::MalformedResponse(format!(
            "expected {} criterion scores, got {}",
            criteria.len(),
            lines.len()
        )));
    }

    criteria
        .iter()
        .zip(lines)
        .enumerate()
        .map(|(i, (criterion, (label, score)))| {
            if normalize_label(label) != normalize_label(criterion.label()) {
                debug!(position = i + 1, label = %preview(label), "Criterion label mismatch");
                return Err(PipelineError::MalformedResponse(format!(
                    "criterion score {} does not match requirement {}",
                    i + 1,
                    i + 1
                )));
            }
            Ok(CriterionScore {
                label: criterion.label().to_string(),
                score,
            })
        })
        .collect()
}

/// Lowercase, single-spaced, without a leading number or `[REQUIRED]` / `[PREFERRED]` tag.
fn normalize_label(label: &str) -> String {
    let label = strip_list_marker(label.trim());
    let label = ["[required]", "[preferred]"]
        .iter()
        .find_map(|tag| {
            label
                .get(..tag.len())
                .filter(|head| head.eq_ignore_ascii_case(tag))
                .map(|_| &label[tag.len()..])
        })
        .unwrap_or(label);
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn parse_bounded(value: &str, min: u8, max: u8, what: &str) -> Result<u8, PipelineError> {
    let number = value
        .strip_suffix(&format!("/{max}"))
        .unwrap_or(value)
        .trim();
    let parsed: f64 = number.parse().map_err(|_| {
        debug!(value = %preview(value), "Non-numeric {what}");
        PipelineError::MalformedResponse(format!("{what} is not a number"))
    })?;

    if !parsed.is_finite() || parsed < f64::from(min) || parsed > f64::from(max) {
        debug!(value = %preview(value), "Out-of-range {what}");
        return Err(PipelineError::MalformedResponse(format!(
            "{what} outside {min}-{max}"
        )));
    }

    Ok(parsed.round() as u8)
}

/// Non-blank lines with their 1-based line numbers, trimmed and stripped of list markers.
fn content_lines(body: &str) -> impl Iterator<Item = (usize, &str)> {
    body.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, strip_list_marker(line.trim())))
        .filter(|(_, line)| !line.is_empty())
}

fn strip_list_marker(line: &str) -> &str {
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return rest.trim_start();
        }
    }
    // "1. " / "12) "
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest.trim_start();
        }
    }
    line
}

fn split_field(line: &str, line_no: usize) -> Result<(&str, &str), PipelineError> {
    line.split_once(FIELD_DELIMITER)
        .map(|(key, value)| (key.trim(), value.trim()))
        .ok_or_else(|| {
            PipelineError::MalformedResponse(format!(
                "line {line_no}: missing '{FIELD_DELIMITER}' delimiter"
            ))
        })
}

fn is_sentinel(body: &str, sentinel: &str) -> bool {
    body.trim_matches(|c: char| c.is_whitespace() || c == '"' || c == '.')
        .eq_ignore_ascii_case(sentinel)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect::<String>().trim().to_string()
}

/// Short excerpt of a reply fragment for debug logs.
fn preview(text: &str) -> String {
    truncate(text, 40)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_criteria_basic() {
        let set = parse_criteria("REQUIRED | 5 years Python\nPREFERRED | AWS experience").unwrap();
        let items: Vec<_> = set.iter().collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label(), "5 years Python");
        assert_eq!(items[0].importance(), Importance::Required);
        assert_eq!(items[1].label(), "AWS experience");
        assert_eq!(items[1].importance(), Importance::Preferred);
    }

    #[test]
    fn test_parse_criteria_tolerates_noise() {
        let raw = "```\n\n  required|Rust  \n\n- Preferred | Kafka\n2. REQUIRED | SQL\n```\n";
        let set = parse_criteria(raw).unwrap();
        let labels: Vec<_> = set.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["Rust", "Kafka", "SQL"]);
    }

    #[test]
    fn test_parse_criteria_missing_delimiter_is_malformed() {
        let err = parse_criteria("Here are the requirements:\nREQUIRED | Rust").unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_RESPONSE");
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_parse_criteria_unknown_flag_is_malformed() {
        let err = parse_criteria("MANDATORY | Rust").unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_RESPONSE");
    }

    #[test]
    fn test_parse_criteria_empty_label_is_malformed() {
        let err = parse_criteria("REQUIRED |   ").unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_RESPONSE");
    }

    #[test]
    fn test_parse_criteria_empty_reply_is_malformed() {
        let err = parse_criteria("  \n\n ").unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_RESPONSE");
    }

    #[test]
    fn test_parse_criteria_sentinel_is_invalid_content() {
        let err = parse_criteria(" INVALID_INPUT\n").unwrap_err();
        assert_eq!(err.kind(), "INVALID_CONTENT");
    }

    fn criteria() -> CriteriaSet {
        parse_criteria("REQUIRED | 5 years Python\nPREFERRED | AWS experience").unwrap()
    }

    /// Prefixes a scoring reply with valid criterion lines for `criteria()`.
    fn scored(rest: &str) -> String {
        format!("CRITERION | 5 years Python | 4\nCRITERION | AWS experience | 2\n{rest}")
    }

    #[test]
    fn test_parse_score_full() {
        let parsed = parse_score(
            &scored("CANDIDATE | Jane Doe\nSCORE | 82\nRATIONALE | Strong Python background."),
            &criteria(),
        )
        .unwrap();
        assert_eq!(parsed.score, 82);
        assert_eq!(parsed.rationale.as_deref(), Some("Strong Python background."));
        assert_eq!(parsed.candidate_name.as_deref(), Some("Jane Doe"));
        assert_eq!(
            parsed.criterion_scores,
            vec![
                CriterionScore {
                    label: "5 years Python".into(),
                    score: 4
                },
                CriterionScore {
                    label: "AWS experience".into(),
                    score: 2
                },
            ]
        );
    }

    #[test]
    fn test_parse_score_tolerates_variants() {
        let set = criteria();
        assert_eq!(parse_score(&scored("score | 75/100"), &set).unwrap().score, 75);
        assert_eq!(parse_score(&scored("SCORE | 66.6"), &set).unwrap().score, 67);
        assert_eq!(parse_score(&scored("\n\nSCORE|100\n"), &set).unwrap().score, 100);
        assert_eq!(parse_score(&scored("SCORE | 0"), &set).unwrap().score, 0);
    }

    #[test]
    fn test_criterion_lines_tolerate_copied_numbering_and_tags() {
        let raw = "CRITERION | 1. [REQUIRED] 5 years  python | 5/5\n\
                   criterion | [preferred] AWS Experience | 0\n\
                   SCORE | 70";
        let parsed = parse_score(raw, &criteria()).unwrap();
        let scores: Vec<_> = parsed.criterion_scores.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![5, 0]);
        // Labels come from the criteria, not from the reply.
        assert_eq!(parsed.criterion_scores[0].label, "5 years Python");
    }

    #[test]
    fn test_criterion_label_may_contain_delimiter() {
        let set = CriteriaSet::new(vec![
            Criterion::new("C | C++", Importance::Required).unwrap()
        ])
        .unwrap();
        let parsed = parse_score("CRITERION | C | C++ | 3\nSCORE | 40", &set).unwrap();
        assert_eq!(parsed.criterion_scores[0].score, 3);
    }

    #[test]
    fn test_criterion_count_mismatch_is_malformed() {
        let err =
            parse_score("CRITERION | 5 years Python | 4\nSCORE | 50", &criteria()).unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_RESPONSE");
        assert!(err.to_string().contains("expected 2 criterion scores, got 1"));

        let err = parse_score("SCORE | 50", &criteria()).unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_RESPONSE");
    }

    #[test]
    fn test_criterion_label_mismatch_is_malformed() {
        let raw = "CRITERION | AWS experience | 2\nCRITERION | 5 years Python | 4\nSCORE | 50";
        let err = parse_score(raw, &criteria()).unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_RESPONSE");
        assert!(err.to_string().contains("does not match requirement 1"));
    }

    #[test]
    fn test_criterion_score_bounds() {
        for raw in ["6", "-1", "high"] {
            let reply = format!(
                "CRITERION | 5 years Python | {raw}\nCRITERION | AWS experience | 2\nSCORE | 50"
            );
            let err = parse_score(&reply, &criteria()).unwrap_err();
            assert_eq!(err.kind(), "MALFORMED_RESPONSE", "input {raw}");
        }
        let err =
            parse_score("CRITERION | 5 years Python\nSCORE | 50", &criteria()).unwrap_err();
        assert!(err.to_string().contains("criterion line has no score"));
    }

    #[test]
    fn test_error_messages_never_quote_the_reply() {
        let set = criteria();
        let cases = [
            parse_score(&scored("SCORE | candidate-ssn-123-45-6789"), &set).unwrap_err(),
            parse_score(&scored("SCORE | 4242.5"), &set).unwrap_err(),
            parse_score(
                "CRITERION | secret-label-xyz | 1\nCRITERION | AWS experience | 2\nSCORE | 5",
                &set,
            )
            .unwrap_err(),
            parse_criteria("MANDATORY-secret-flag | Rust").unwrap_err(),
        ];
        for err in cases {
            let message = err.to_string();
            for fragment in ["ssn", "4242", "secret"] {
                assert!(!message.contains(fragment), "{message}");
            }
        }
    }

    #[test]
    fn test_parse_score_unknown_candidate_dropped() {
        let parsed = parse_score(&scored("CANDIDATE | Unknown\nSCORE | 10"), &criteria()).unwrap();
        assert!(parsed.candidate_name.is_none());
        assert!(parsed.rationale.is_none());
    }

    #[test]
    fn test_parse_score_out_of_bounds_is_malformed() {
        for raw in ["SCORE | 101", "SCORE | -1", "SCORE | 100.6", "SCORE | NaN", "SCORE | inf"] {
            let err = parse_score(&scored(raw), &criteria()).unwrap_err();
            assert_eq!(err.kind(), "MALFORMED_RESPONSE", "input {raw}");
            assert!(err.to_string().contains("score outside 0-100"), "input {raw}");
        }
    }

    #[test]
    fn test_parse_score_non_numeric_is_malformed() {
        let err = parse_score(&scored("SCORE | high"), &criteria()).unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_RESPONSE");
        assert!(err.to_string().contains("score is not a number"));
    }

    #[test]
    fn test_parse_score_missing_score_is_malformed() {
        let err = parse_score(&scored("RATIONALE | fine"), &criteria()).unwrap_err();
        assert!(err.to_string().contains("missing SCORE"));
    }

    #[test]
    fn test_parse_score_missing_delimiter_is_malformed() {
        let err = parse_score("The score is 80", &criteria()).unwrap_err();
        assert_eq!(err.kind(), "MALFORMED_RESPONSE");
    }

    #[test]
    fn test_parse_score_sentinel_is_invalid_content() {
        let err = parse_score("NOT_VALID", &criteria()).unwrap_err();
        assert_eq!(err.kind(), "INVALID_CONTENT");
    }

    #[test]
    fn test_parse_score_never_exceeds_bounds() {
        let set = criteria();
        for n in 0..=100u8 {
            let parsed = parse_score(&scored(&format!("SCORE | {n}")), &set).unwrap();
            assert!(parsed.score <= SCORE_MAX);
        }
    }

    #[test]
    fn test_rationale_truncated() {
        let long = "x".repeat(MAX_RATIONALE_CHARS + 50);
        let parsed =
            parse_score(&scored(&format!("SCORE | 5\nRATIONALE | {long}")), &criteria()).unwrap();
        assert_eq!(parsed.rationale.unwrap().chars().count(), MAX_RATIONALE_CHARS);
    }
}
