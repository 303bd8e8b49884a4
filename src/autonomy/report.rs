//! Final and batch reports.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{AutonomyMode, TerminationReason};
use crate::phase::{PhaseBoard, PhaseStatus, PhaseType};
use crate::review::{Recommendation, ResultsTable, ReviewStep, Severity, SeverityCounts};

/// A phase that did not run because earlier phases were incomplete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPhase {
    pub phase: PhaseType,
    pub blocking: Vec<PhaseType>,
}

/// Per-phase line of the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub phase: PhaseType,
    pub status: PhaseStatus,
    pub counts: SeverityCounts,
}

/// Aggregate outcome of a review run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub plan_name: String,
    pub plan_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<AutonomyMode>,
    /// Absent for targeted single-phase or single-step runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<TerminationReason>,
    pub iterations: u32,
    pub duration_ms: u64,
    pub phases: Vec<PhaseSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedPhase>,
    pub totals: SeverityCounts,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<PathBuf>,
    pub results: ResultsTable,
}

impl RunReport {
    pub fn new(
        plan_name: impl Into<String>,
        plan_hash: impl Into<String>,
        results: ResultsTable,
        board: &PhaseBoard,
    ) -> Self {
        let phases = board
            .iter()
            .map(|(phase, status)| PhaseSummary {
                phase,
                status,
                counts: results.phase_counts(phase),
            })
            .collect();
        let totals = results.counts();
        Self {
            plan_name: plan_name.into(),
            plan_hash: plan_hash.into(),
            mode: None,
            termination: None,
            iterations: 0,
            duration_ms: 0,
            phases,
            skipped: Vec::new(),
            totals,
            exit_code: totals.exit_code(),
            checkpoint: None,
            results,
        }
    }

    pub fn with_mode(mut self, mode: AutonomyMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_termination(mut self, reason: TerminationReason) -> Self {
        self.termination = Some(reason);
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_skipped(mut self, skipped: Vec<SkippedPhase>) -> Self {
        self.skipped = skipped;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: Option<PathBuf>) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// 0 when clean, 1 with warnings only, 2 with any Critical finding.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Render the full markdown report.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Plan Review: {}\n", self.plan_name);
        let short_hash: String = self.plan_hash.chars().take(12).collect();
        let _ = writeln!(out, "- Plan hash: `{}`", short_hash);
        if let Some(mode) = self.mode {
            let _ = writeln!(out, "- Mode: {}", mode);
        }
        if let Some(reason) = self.termination {
            let _ = writeln!(out, "- Termination: {}", reason);
        }
        let _ = writeln!(out, "- Iterations: {}", self.iterations);
        let _ = writeln!(out, "- Duration: {:.1}s", self.duration_ms as f64 / 1000.0);
        let _ = writeln!(
            out,
            "- Overall: {} {} well defined, {} warnings, {} critical\n",
            self.totals.worst().marker(),
            self.totals.well_defined,
            self.totals.warnings,
            self.totals.critical
        );

        out.push_str("## Summary\n\n");
        out.push_str("| Phase | Status | ✅ | ⚠️ | ❌ |\n|---|---|---|---|---|\n");
        for summary in &self.phases {
            let _ = writeln!(
                out,
                "| {} | {} {} | {} | {} | {} |",
                summary.phase,
                summary.status.emoji(),
                summary.status,
                summary.counts.well_defined,
                summary.counts.warnings,
                summary.counts.critical
            );
        }
        out.push('\n');

        let attempted: Vec<PhaseType> = PhaseType::ALL
            .iter()
            .copied()
            .filter(|p| self.results.is_phase_attempted(*p))
            .collect();
        out.push_str(&render_phase_tables(&self.results, &attempted));

        if !self.skipped.is_empty() {
            out.push_str("## Skipped phases\n\n");
            for skipped in &self.skipped {
                let blocking: Vec<String> = skipped.blocking.iter().map(|p| p.to_string()).collect();
                let _ = writeln!(
                    out,
                    "- {}: blocked by {}",
                    skipped.phase,
                    blocking.join(", ")
                );
            }
            out.push('\n');
        }

        out.push_str(&render_recommendations(&self.results, &attempted));
        out
    }

    /// Write the report: JSON when `path` ends in `.json`, markdown otherwise.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let content = if is_json {
            self.to_json().context("Failed to serialize report to JSON")?
        } else {
            self.to_markdown()
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create report directory: {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write report: {}", path.display()))
    }
}

/// Per-step count tables for the given phases.
pub fn render_phase_tables(results: &ResultsTable, phases: &[PhaseType]) -> String {
    let mut out = String::new();
    for phase in phases {
        let _ = writeln!(out, "## {}\n", phase);
        out.push_str("| Step | ✅ WellDefined | ⚠️ Warning | ❌ Critical |\n|---|---|---|---|\n");
        for step in ReviewStep::ALL {
            match results.get(*phase, step) {
                Some(result) => {
                    let counts = result.counts();
                    let _ = writeln!(
                        out,
                        "| {} | {} | {} | {} |",
                        step, counts.well_defined, counts.warnings, counts.critical
                    );
                }
                None => {
                    let _ = writeln!(out, "| {} | - | - | - |", step);
                }
            }
        }
        out.push('\n');
    }
    out
}

/// Prioritized recommendation list for the given phases.
pub fn render_recommendations(results: &ResultsTable, phases: &[PhaseType]) -> String {
    let tagged: Vec<(PhaseType, &Recommendation)> = phases
        .iter()
        .flat_map(|p| results.phase_results(*p).map(move |r| (*p, r)))
        .flat_map(|(p, r)| r.recommendations.iter().map(move |rec| (p, rec)))
        .collect();
    let (mut ordered, warnings): (Vec<_>, Vec<_>) = tagged
        .into_iter()
        .partition(|(_, rec)| rec.severity.is_critical());
    ordered.extend(warnings);

    let mut out = String::from("## Recommendations\n\n");
    if ordered.is_empty() {
        let _ = writeln!(out, "{} No recommendations.", Severity::WellDefined.marker());
        return out;
    }
    for (i, (phase, rec)) in ordered.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {} **{}** ({} / {}): {}",
            i + 1,
            rec.severity.marker(),
            rec.node_id,
            phase,
            rec.step,
            rec.text
        );
    }
    out
}

/// Consolidated markdown for the phases covered by one suspension.
pub fn render_batch_report(results: &ResultsTable, board: &PhaseBoard, phases: &[PhaseType]) -> String {
    let mut out = String::new();
    let names: Vec<String> = phases.iter().map(|p| p.to_string()).collect();
    let _ = writeln!(out, "# Batch report: {}\n", names.join(", "));
    for phase in phases {
        let counts = results.phase_counts(*phase);
        let _ = writeln!(
            out,
            "- {} {} ({}): {} well defined, {} warnings, {} critical",
            counts.worst().marker(),
            phase,
            board.status(*phase),
            counts.well_defined,
            counts.warnings,
            counts.critical
        );
    }
    out.push('\n');
    out.push_str(&render_phase_tables(results, phases));
    out.push_str(&render_recommendations(results, phases));
    out
}
