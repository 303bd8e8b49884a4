//! Analyzer response parsing and step-specific severity classification.
//!
//! The analyzer answers with a JSON object:
//!
//! ```json
//! {
//!   "severity": "warning",
//!   "issues": [{"category": "naming_inconsistency", "detail": "..."}],
//!   "recommendation": "..."
//! }
//! ```
//!
//! Each issue category is looked up in the table for the step being run.
//! Categories in the critical list map to `Critical`; everything else,
//! including categories the table does not know, maps to `Warning`. The
//! finding's severity is the maximum of the stated severity and every
//! category-derived severity, so the analyzer can raise but never lower what
//! its own issue list implies.

use serde::Deserialize;

use super::findings::{ReviewFinding, Severity};
use super::step::ReviewStep;
use crate::errors::AnalysisError;
use crate::util::{extract_json_object, truncate_chars, unwrap_cli_envelope};

/// One issue reported by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnalysisIssue {
    pub category: String,
    #[serde(default)]
    pub detail: String,
}

/// Parsed analyzer response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub issues: Vec<AnalysisIssue>,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Categories that make a finding Critical, per step.
pub fn critical_categories(step: ReviewStep) -> &'static [&'static str] {
    match step {
        ReviewStep::Contracts => &["undefined_contract", "contradictory_contract"],
        ReviewStep::Interfaces => &[
            "missing_interface_element",
            "missing_method",
            "missing_type",
        ],
        ReviewStep::Promises => &[
            "violated_guarantee",
            "idempotency_contradiction",
            "ordering_contradiction",
        ],
        ReviewStep::DataModels => &[
            "ambiguous_relationship",
            "missing_entity",
            "conflicting_schema",
        ],
        ReviewStep::Apis => &[
            "undefined_error_handling",
            "missing_endpoint",
            "contradictory_status_codes",
        ],
    }
}

/// Categories the step knows as non-blocking gaps.
pub fn warning_categories(step: ReviewStep) -> &'static [&'static str] {
    match step {
        ReviewStep::Contracts => &["naming_inconsistency", "unclear_precondition"],
        ReviewStep::Interfaces => &["naming_inconsistency", "unclear_extension_point"],
        ReviewStep::Promises => &["unstated_guarantee", "unclear_retry_semantics"],
        ReviewStep::DataModels => &[
            "naming_inconsistency",
            "unaddressed_backward_compatibility",
        ],
        ReviewStep::Apis => &[
            "unaddressed_backward_compatibility",
            "unclear_versioning",
            "naming_inconsistency",
        ],
    }
}

fn normalize_category(category: &str) -> String {
    category
        .trim()
        .to_lowercase()
        .replace(['-', ' '], "_")
}

/// Severity a single issue category implies for `step`.
pub fn category_severity(step: ReviewStep, category: &str) -> Severity {
    let normalized = normalize_category(category);
    if critical_categories(step).contains(&normalized.as_str()) {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

/// Parse raw analyzer output into a response.
///
/// Accepts the CLI JSON envelope, markdown fences and surrounding prose.
pub fn parse_response(raw: &str) -> Result<AnalysisResponse, AnalysisError> {
    let text = unwrap_cli_envelope(raw);
    let json = extract_json_object(&text).ok_or_else(|| AnalysisError::Unparsable {
        reason: format!("no JSON object in output: {}", truncate_chars(text.trim(), 120)),
    })?;
    let response: AnalysisResponse =
        serde_json::from_str(&json).map_err(|e| AnalysisError::Unparsable {
            reason: e.to_string(),
        })?;

    if let Some(error) = response.error.as_ref().filter(|e| !e.trim().is_empty()) {
        return Err(AnalysisError::Reported(error.clone()));
    }
    if response.severity.is_none() && response.issues.is_empty() {
        return Err(AnalysisError::Unparsable {
            reason: "response has neither severity nor issues".to_string(),
        });
    }
    if let Some(stated) = &response.severity {
        stated
            .parse::<Severity>()
            .map_err(|reason| AnalysisError::Unparsable { reason })?;
    }
    Ok(response)
}

/// Turn a parsed response into the finding for `node_id`.
pub fn classify(node_id: &str, step: ReviewStep, response: &AnalysisResponse) -> ReviewFinding {
    let stated = response
        .severity
        .as_deref()
        .and_then(|s| s.parse::<Severity>().ok())
        .unwrap_or_default();

    let mut severity = stated;
    let mut deciding_category: Option<(Severity, &str)> = None;
    for issue in &response.issues {
        let implied = category_severity(step, &issue.category);
        severity = severity.max(implied);
        if deciding_category.is_none_or(|(s, _)| implied > s) {
            deciding_category = Some((implied, issue.category.as_str()));
        }
    }

    let detail = if response.issues.is_empty() {
        response
            .summary
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("no {} issues found", step))
    } else {
        response
            .issues
            .iter()
            .map(|i| {
                if i.detail.trim().is_empty() {
                    format!("[{}]", normalize_category(&i.category))
                } else {
                    format!("[{}] {}", normalize_category(&i.category), i.detail.trim())
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    };

    let mut finding = ReviewFinding::new(node_id, step, severity, detail);
    if let Some((_, category)) = deciding_category {
        finding = finding.with_category(normalize_category(category));
    }
    if severity.is_actionable() {
        if let Some(hint) = response.recommendation.as_ref().filter(|h| !h.trim().is_empty()) {
            finding = finding.with_recommendation(hint.trim());
        }
    }
    finding
}

/// Parse and classify in one go; parse failures become unavailable findings.
pub fn finding_from_output(
    node_id: &str,
    step: ReviewStep,
    output: Result<String, AnalysisError>,
) -> ReviewFinding {
    match output.and_then(|raw| parse_response(&raw)) {
        Ok(response) => classify(node_id, step, &response),
        Err(e) => ReviewFinding::unavailable(node_id, step, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> AnalysisResponse {
        parse_response(json).unwrap()
    }

    #[test]
    fn test_every_table_category_is_known() {
        for step in ReviewStep::ALL {
            for c in critical_categories(step) {
                assert_eq!(category_severity(step, c), Severity::Critical);
            }
            for c in warning_categories(step) {
                assert_eq!(category_severity(step, c), Severity::Warning);
                assert!(!critical_categories(step).contains(c));
            }
        }
    }

    #[test]
    fn test_category_is_step_specific() {
        assert_eq!(
            category_severity(ReviewStep::Apis, "missing_endpoint"),
            Severity::Critical
        );
        assert_eq!(
            category_severity(ReviewStep::Contracts, "missing_endpoint"),
            Severity::Warning
        );
        assert_eq!(
            category_severity(ReviewStep::Promises, "Idempotency-Contradiction"),
            Severity::Critical
        );
    }

    #[test]
    fn test_unknown_category_is_warning() {
        let r = response(r#"{"severity": "well_defined", "issues": [{"category": "vibes", "detail": "odd"}]}"#);
        let f = classify("REQ_001", ReviewStep::Contracts, &r);
        assert_eq!(f.severity, Severity::Warning);
        assert_eq!(f.category.as_deref(), Some("vibes"));
    }

    #[test]
    fn test_category_raises_stated_severity() {
        let r = response(
            r#"{"severity": "warning", "issues": [
                {"category": "naming_inconsistency", "detail": "a"},
                {"category": "undefined_error_handling", "detail": "b"}
            ], "recommendation": "Define the 4xx responses"}"#,
        );
        let f = classify("REQ_002", ReviewStep::Apis, &r);
        assert_eq!(f.severity, Severity::Critical);
        assert_eq!(f.category.as_deref(), Some("undefined_error_handling"));
        assert_eq!(f.recommendation.as_deref(), Some("Define the 4xx responses"));
        assert!(f.detail.contains("[naming_inconsistency] a"));
    }

    #[test]
    fn test_stated_severity_is_never_lowered() {
        let r = response(r#"{"severity": "critical", "issues": []}"#);
        assert_eq!(
            classify("REQ_003", ReviewStep::Interfaces, &r).severity,
            Severity::Critical
        );
    }

    #[test]
    fn test_well_defined_without_issues() {
        let r = response(r#"{"severity": "well_defined", "recommendation": "ignored"}"#);
        let f = classify("REQ_004", ReviewStep::DataModels, &r);
        assert_eq!(f.severity, Severity::WellDefined);
        assert!(f.recommendation.is_none());
        assert_eq!(f.detail, "no DataModels issues found");
    }

    #[test]
    fn test_parse_accepts_prose_and_envelope() {
        assert!(parse_response("Sure!\n```json\n{\"severity\": \"ok\"}\n```").is_ok());
        let envelope = r#"{"type":"result","result":"{\"severity\":\"warning\"}"}"#;
        assert_eq!(
            parse_response(envelope).unwrap().severity.as_deref(),
            Some("warning")
        );
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(
            parse_response("no json at all"),
            Err(AnalysisError::Unparsable { .. })
        ));
        assert!(matches!(
            parse_response(r#"{"foo": 1}"#),
            Err(AnalysisError::Unparsable { .. })
        ));
        assert!(matches!(
            parse_response(r#"{"severity": "spicy"}"#),
            Err(AnalysisError::Unparsable { .. })
        ));
        assert!(matches!(
            parse_response(r#"{"error": "context window exceeded"}"#),
            Err(AnalysisError::Reported(_))
        ));
    }

    #[test]
    fn test_finding_from_failed_output_is_unavailable() {
        let f = finding_from_output(
            "REQ_005",
            ReviewStep::Promises,
            Err(AnalysisError::NonZeroExit {
                code: 1,
                stderr: "boom".into(),
            }),
        );
        assert_eq!(f.severity, Severity::Critical);
        assert!(f.detail.starts_with("analysis unavailable: "));
        assert!(f.detail.contains("boom"));
    }
}
