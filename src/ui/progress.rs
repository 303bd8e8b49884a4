use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::autonomy::{PhaseOutcome, RunObserver, RunReport, Suspension};
use crate::phase::PhaseType;
use crate::review::{ReviewStep, ReviewStepResult, Severity};
use crate::ui::icons::{CLOCK, CRITICAL, PAUSE, REVIEW, SAVE, SKIPPED, SPARKLE, WARNING, WELL_DEFINED};

/// Terminal UI for review runs.
///
/// Two bars are stacked: a phase bar counting finished phases and a step
/// spinner for the step in flight. Findings are printed above the bars.
pub struct ReviewUI {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    step_bar: ProgressBar,
    verbose: bool,
}

fn severity_icon(severity: Severity) -> console::Emoji<'static, 'static> {
    match severity {
        Severity::WellDefined => WELL_DEFINED,
        Severity::Warning => WARNING,
        Severity::Critical => CRITICAL,
    }
}

impl ReviewUI {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let phase_bar = multi.add(ProgressBar::new(PhaseType::COUNT as u64));
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");

        let step_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let step_bar = multi.add(ProgressBar::new_spinner());
        step_bar.set_style(step_style);
        step_bar.set_prefix("  Step");

        Self {
            multi,
            phase_bar,
            step_bar,
            verbose,
        }
    }

    /// Print above the bars, falling back to stderr if the terminal is gone.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Start the phase bar at the resume position.
    pub fn set_position(&self, completed: usize) {
        self.phase_bar.set_position(completed as u64);
    }

    pub fn print_header(&self, plan_name: &str, mode: &str, nodes: usize) {
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(60)).cyan()));
        self.print_line(format!(
            "{}Reviewing {} ({} nodes, {} mode)",
            REVIEW,
            style(plan_name).yellow().bold(),
            nodes,
            mode
        ));
        self.print_line(format!("{}", style("═".repeat(60)).cyan()));
    }

    pub fn print_suspension(&self, suspension: &Suspension) {
        self.step_bar.set_message("waiting for approval");
        if let Some(path) = &suspension.checkpoint {
            self.print_line(format!(
                "{}Checkpoint saved: {}",
                SAVE,
                style(path.display()).dim()
            ));
        }
        let next = suspension
            .next_phase
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        self.print_line(format!(
            "{}Paused after {} phase(s); next: {}",
            PAUSE,
            suspension.phases.len(),
            style(next).yellow()
        ));
        for phase in &suspension.critical_phases {
            self.print_line(format!(
                "  {}{} has critical findings",
                CRITICAL,
                style(phase).red().bold()
            ));
        }
    }

    /// Print a block of pre-rendered text (batch reports).
    pub fn print_block(&self, text: &str) {
        for line in text.lines() {
            self.print_line(line);
        }
    }

    pub fn print_summary(&self, report: &RunReport) {
        self.finish();
        let totals = report.totals;
        let worst = totals.worst();
        let headline = match worst {
            Severity::WellDefined => style("Plan is well defined".to_string()).green().bold(),
            Severity::Warning => style("Plan has warnings".to_string()).yellow().bold(),
            Severity::Critical => style("Plan has critical gaps".to_string()).red().bold(),
        };
        println!();
        println!("{}{}", severity_icon(worst), headline);
        println!(
            "  {} well defined, {} warnings, {} critical",
            style(totals.well_defined).green(),
            style(totals.warnings).yellow(),
            style(totals.critical).red()
        );
        if let Some(reason) = report.termination {
            println!("  {} {}", style("Stopped:").dim(), reason);
        }
        println!(
            "  {}{:.1}s over {} step(s)",
            CLOCK,
            report.duration_ms as f64 / 1000.0,
            report.iterations
        );
        if let Some(path) = &report.checkpoint {
            println!("  {}{}", SAVE, style(path.display()).dim());
        }
    }

    pub fn finish(&self) {
        self.step_bar.finish_and_clear();
        self.phase_bar.finish();
    }
}

impl RunObserver for ReviewUI {
    fn phase_started(&self, phase: PhaseType) {
        self.phase_bar
            .set_message(format!("{}: {}", style(phase).yellow(), phase.description()));
        self.step_bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn step_started(&self, phase: PhaseType, step: ReviewStep) {
        self.step_bar.set_message(format!(
            "{} {}/{} {}",
            style(step).cyan(),
            step.index() + 1,
            ReviewStep::COUNT,
            style(format!("({})", phase)).dim()
        ));
    }

    fn step_finished(&self, result: &ReviewStepResult) {
        let counts = result.counts();
        self.print_line(format!(
            "    {}{:<11} {} ok, {} warn, {} crit",
            severity_icon(result.worst()),
            result.step.to_string(),
            counts.well_defined,
            counts.warnings,
            counts.critical
        ));
        if self.verbose {
            for finding in result.critical.iter().chain(result.warnings.iter()) {
                self.print_line(format!(
                    "      {} {}",
                    style(&finding.node_id).dim(),
                    style(&finding.detail).dim()
                ));
            }
        }
    }

    fn phase_finished(&self, phase: PhaseType, outcome: &PhaseOutcome) {
        match outcome {
            PhaseOutcome::Passed => {
                self.phase_bar.inc(1);
                self.print_line(format!(
                    "{}Phase {} complete",
                    SPARKLE,
                    style(phase).green().bold()
                ));
            }
            PhaseOutcome::Blocked { critical } => {
                self.print_line(format!(
                    "{}Phase {} blocked by {} critical finding(s)",
                    CRITICAL,
                    style(phase).red().bold(),
                    critical
                ));
            }
            PhaseOutcome::Interrupted(reason) => {
                self.print_line(format!(
                    "{}Phase {} interrupted ({})",
                    CRITICAL,
                    style(phase).red().bold(),
                    reason
                ));
            }
        }
    }

    fn phase_skipped(&self, phase: PhaseType, blocking: &[PhaseType]) {
        let blocking: Vec<String> = blocking.iter().map(|p| p.to_string()).collect();
        self.print_line(format!(
            "{}Skipping {}: waiting on {}",
            SKIPPED,
            style(phase).dim(),
            blocking.join(", ")
        ));
    }
}
