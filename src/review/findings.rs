//! Review finding types and the phase × step results table.
//!
//! ## Types
//!
//! - [`Severity`]: Total classification of a finding
//! - [`ReviewFinding`]: Outcome of evaluating one node against one step
//! - [`Recommendation`]: Follow-up derived from a Warning or Critical finding
//! - [`ReviewStepResult`]: Findings for one `(phase, step)`, bucketed by severity
//! - [`ResultsTable`]: Fixed 6 × 5 table of step results
//!
//! ## Example
//!
//! ```
//! use plan_review::phase::PhaseType;
//! use plan_review::review::{ReviewFinding, ReviewStep, ReviewStepResult, Severity};
//!
//! let findings = vec![
//!     ReviewFinding::new("REQ_000", ReviewStep::Contracts, Severity::WellDefined, "ok"),
//!     ReviewFinding::new("REQ_000.1", ReviewStep::Contracts, Severity::Critical, "no postcondition")
//!         .with_category("undefined_contract"),
//! ];
//! let result = ReviewStepResult::from_findings(PhaseType::Research, ReviewStep::Contracts, findings);
//!
//! assert_eq!(result.critical.len(), 1);
//! assert_eq!(result.recommendations[0].node_id, "REQ_000.1");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::step::ReviewStep;
use crate::phase::PhaseType;

/// Severity of a finding, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    WellDefined,
    Warning,
    Critical,
}

impl Severity {
    /// Check if this severity blocks phase completion.
    ///
    /// ```
    /// use plan_review::review::Severity;
    ///
    /// assert!(Severity::Critical.is_critical());
    /// assert!(!Severity::Warning.is_critical());
    /// ```
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical)
    }

    /// Warning or Critical findings need a recommendation.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Warning | Self::Critical)
    }

    /// Fixed report marker.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::WellDefined => "✅",
            Self::Warning => "⚠️",
            Self::Critical => "❌",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WellDefined => "well_defined",
            Self::Warning => "warning",
            Self::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    /// Lenient parse of analyzer spellings (`well-defined`, `OK`, `error`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "welldefined" | "ok" | "pass" | "none" | "info" => Ok(Self::WellDefined),
            "warning" | "warn" | "minor" => Ok(Self::Warning),
            "critical" | "error" | "blocker" | "fail" => Ok(Self::Critical),
            _ => Err(format!("unknown severity '{}'", s)),
        }
    }
}

/// The classified outcome of evaluating one node against one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFinding {
    pub node_id: String,
    pub step: ReviewStep,
    pub severity: Severity,
    pub detail: String,
    /// Issue category that determined the severity, when the analyzer gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Analyzer-suggested remediation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl ReviewFinding {
    pub fn new(
        node_id: impl Into<String>,
        step: ReviewStep,
        severity: Severity,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            step,
            severity,
            detail: detail.into(),
            category: None,
            recommendation: None,
        }
    }

    /// Critical finding for a node whose analysis could not be obtained.
    pub fn unavailable(node_id: impl Into<String>, step: ReviewStep, reason: impl fmt::Display) -> Self {
        Self::new(
            node_id,
            step,
            Severity::Critical,
            format!("analysis unavailable: {}", reason),
        )
        .with_category("analysis_unavailable")
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }

    fn to_recommendation(&self) -> Recommendation {
        let text = match (&self.recommendation, &self.category) {
            (Some(hint), _) if !hint.trim().is_empty() => hint.trim().to_string(),
            (_, Some(category)) => format!(
                "Resolve {} in {} ({}): {}",
                category.replace('_', " "),
                self.node_id,
                self.step,
                self.detail
            ),
            _ => format!("Clarify {} for {}: {}", self.step, self.node_id, self.detail),
        };
        Recommendation {
            node_id: self.node_id.clone(),
            step: self.step,
            severity: self.severity,
            text,
        }
    }
}

/// A follow-up action traced back to the node that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub node_id: String,
    pub step: ReviewStep,
    pub severity: Severity,
    pub text: String,
}

/// Findings for one `(phase, step)` cell.
///
/// Every Warning and Critical finding has exactly one recommendation carrying
/// its node id; Critical-derived recommendations come first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewStepResult {
    pub phase: PhaseType,
    pub step: ReviewStep,
    pub well_defined: Vec<ReviewFinding>,
    pub warnings: Vec<ReviewFinding>,
    pub critical: Vec<ReviewFinding>,
    pub recommendations: Vec<Recommendation>,
}

impl ReviewStepResult {
    /// Partition findings by severity, preserving their order, and derive the
    /// recommendation list.
    pub fn from_findings(
        phase: PhaseType,
        step: ReviewStep,
        findings: impl IntoIterator<Item = ReviewFinding>,
    ) -> Self {
        let mut well_defined = Vec::new();
        let mut warnings = Vec::new();
        let mut critical = Vec::new();
        for finding in findings {
            match finding.severity {
                Severity::WellDefined => well_defined.push(finding),
                Severity::Warning => warnings.push(finding),
                Severity::Critical => critical.push(finding),
            }
        }

        let recommendations = critical
            .iter()
            .chain(warnings.iter())
            .map(ReviewFinding::to_recommendation)
            .collect();

        Self {
            phase,
            step,
            well_defined,
            warnings,
            critical,
            recommendations,
        }
    }

    pub fn has_critical(&self) -> bool {
        !self.critical.is_empty()
    }

    pub fn counts(&self) -> SeverityCounts {
        SeverityCounts {
            well_defined: self.well_defined.len(),
            warnings: self.warnings.len(),
            critical: self.critical.len(),
        }
    }

    pub fn total_findings(&self) -> usize {
        self.well_defined.len() + self.warnings.len() + self.critical.len()
    }

    /// Highest severity present, `WellDefined` for an empty result.
    pub fn worst(&self) -> Severity {
        self.counts().worst()
    }
}

/// Finding counts per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub well_defined: usize,
    pub warnings: usize,
    pub critical: usize,
}

impl SeverityCounts {
    pub fn add(&mut self, other: SeverityCounts) {
        self.well_defined += other.well_defined;
        self.warnings += other.warnings;
        self.critical += other.critical;
    }

    pub fn worst(&self) -> Severity {
        if self.critical > 0 {
            Severity::Critical
        } else if self.warnings > 0 {
            Severity::Warning
        } else {
            Severity::WellDefined
        }
    }

    /// Process exit code: 0 clean, 1 warnings only, 2 any critical.
    pub fn exit_code(&self) -> i32 {
        match self.worst() {
            Severity::WellDefined => 0,
            Severity::Warning => 1,
            Severity::Critical => 2,
        }
    }
}

impl std::iter::Sum for SeverityCounts {
    fn sum<I: Iterator<Item = SeverityCounts>>(iter: I) -> Self {
        let mut total = SeverityCounts::default();
        for counts in iter {
            total.add(counts);
        }
        total
    }
}

/// Fixed `6 × 5` table of step results, indexed by phase and step order.
///
/// Iteration order is phase order then step order, so reports need no sorting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ReviewStepResult>", into = "Vec<ReviewStepResult>")]
pub struct ResultsTable {
    cells: [[Option<ReviewStepResult>; ReviewStep::COUNT]; PhaseType::COUNT],
}

impl ResultsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, phase: PhaseType, step: ReviewStep) -> Option<&ReviewStepResult> {
        self.cells[phase.index()][step.index()].as_ref()
    }

    /// Store a result in the cell named by its own phase and step.
    pub fn insert(&mut self, result: ReviewStepResult) {
        let (p, s) = (result.phase.index(), result.step.index());
        self.cells[p][s] = Some(result);
    }

    pub fn clear_phase(&mut self, phase: PhaseType) {
        for cell in self.cells[phase.index()].iter_mut() {
            *cell = None;
        }
    }

    /// Populated cells of one phase, in step order.
    pub fn phase_results(&self, phase: PhaseType) -> impl Iterator<Item = &ReviewStepResult> {
        self.cells[phase.index()].iter().flatten()
    }

    /// Every step of the phase has a result.
    pub fn is_phase_complete(&self, phase: PhaseType) -> bool {
        self.cells[phase.index()].iter().all(Option::is_some)
    }

    pub fn is_phase_attempted(&self, phase: PhaseType) -> bool {
        self.cells[phase.index()].iter().any(Option::is_some)
    }

    pub fn phase_has_critical(&self, phase: PhaseType) -> bool {
        self.phase_results(phase).any(ReviewStepResult::has_critical)
    }

    pub fn phase_counts(&self, phase: PhaseType) -> SeverityCounts {
        self.phase_results(phase).map(ReviewStepResult::counts).sum()
    }

    pub fn counts(&self) -> SeverityCounts {
        self.iter().map(ReviewStepResult::counts).sum()
    }

    /// All populated cells in phase then step order.
    pub fn iter(&self) -> impl Iterator<Item = &ReviewStepResult> {
        self.cells.iter().flat_map(|row| row.iter().flatten())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Recommendations for the given phases, Critical before Warning, each
    /// group in table order.
    pub fn prioritized_recommendations(&self, phases: &[PhaseType]) -> Vec<&Recommendation> {
        let selected: Vec<&Recommendation> = phases
            .iter()
            .flat_map(|p| self.phase_results(*p))
            .flat_map(|r| r.recommendations.iter())
            .collect();
        let (mut critical, warnings): (Vec<_>, Vec<_>) = selected
            .into_iter()
            .partition(|r| r.severity.is_critical());
        critical.extend(warnings);
        critical
    }
}

impl From<Vec<ReviewStepResult>> for ResultsTable {
    fn from(results: Vec<ReviewStepResult>) -> Self {
        let mut table = ResultsTable::new();
        for result in results {
            table.insert(result);
        }
        table
    }
}

impl From<ResultsTable> for Vec<ReviewStepResult> {
    fn from(table: ResultsTable) -> Self {
        table
            .cells
            .into_iter()
            .flat_map(|row| row.into_iter().flatten())
            .collect()
    }
}
