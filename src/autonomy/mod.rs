//! Autonomy-mode control loop.
//!
//! The controller drives the outer phase loop and the middle step loop; the
//! inner per-node fan-out lives in [`crate::review::engine`]. How often the
//! loop stops for external approval depends on the [`AutonomyMode`]:
//!
//! | Mode              | Checkpoint saved        | Suspends                |
//! |-------------------|-------------------------|-------------------------|
//! | `checkpoint`      | after every phase       | after every phase       |
//! | `batch`           | at batch group ends     | at batch group ends     |
//! | `fully_autonomous`| after every phase       | never                   |

pub mod controller;
pub mod report;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::phase::PhaseType;
use crate::review::{ReviewStep, ReviewStepResult};

pub use controller::AutonomyController;
pub use report::{RunReport, SkippedPhase};

/// Default ceiling on step executions per run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// Default run deadline (1 hour).
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 3600;

/// Default ceiling on one issue-closure lookup.
pub const DEFAULT_TRACKER_TIMEOUT_SECS: u64 = 30;

/// How often the control loop suspends for approval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyMode {
    #[default]
    Checkpoint,
    Batch,
    FullyAutonomous,
}

impl AutonomyMode {
    /// Whether the loop ever hands control back before finishing.
    pub fn suspends(self) -> bool {
        !matches!(self, AutonomyMode::FullyAutonomous)
    }
}

impl fmt::Display for AutonomyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutonomyMode::Checkpoint => write!(f, "checkpoint"),
            AutonomyMode::Batch => write!(f, "batch"),
            AutonomyMode::FullyAutonomous => write!(f, "fully_autonomous"),
        }
    }
}

impl std::str::FromStr for AutonomyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "checkpoint" => Ok(AutonomyMode::Checkpoint),
            "batch" => Ok(AutonomyMode::Batch),
            "fully_autonomous" | "fullyautonomous" | "autonomous" | "auto" | "full" => {
                Ok(AutonomyMode::FullyAutonomous)
            }
            _ => anyhow::bail!(
                "Invalid autonomy mode '{}'. Valid values: checkpoint, batch, fully-autonomous",
                s
            ),
        }
    }
}

/// Machine-readable reason a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxIterations,
    AllComplete,
    CriticalBlocking,
    Timeout,
    UserCancelled,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::MaxIterations => "max_iterations",
            TerminationReason::AllComplete => "all_complete",
            TerminationReason::CriticalBlocking => "critical_blocking",
            TerminationReason::Timeout => "timeout",
            TerminationReason::UserCancelled => "user_cancelled",
        };
        write!(f, "{}", s)
    }
}

/// External decision that re-enters a suspended loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    /// Proceed. Rejected when the suspended batch produced Critical findings.
    Continue,
    /// Proceed despite Critical findings.
    AcknowledgeCritical,
    /// Re-run the failed phases (`Failed → InProgress`).
    RetryFailed,
    /// Stop the run with `user_cancelled`.
    Cancel,
}

/// What happened to a single phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// All steps ran with no Critical findings; the phase is `Complete`.
    Passed,
    /// All steps ran and at least one produced Critical findings; the phase
    /// is `Failed` and may be retried.
    Blocked { critical: usize },
    /// The phase was cut short; its partial results were discarded.
    Interrupted(TerminationReason),
}

impl PhaseOutcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, PhaseOutcome::Blocked { .. })
    }
}

/// Control handed back to the caller while waiting for approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suspension {
    /// Phases executed since the previous suspension.
    pub phases: Vec<PhaseType>,
    /// Those of `phases` with Critical findings; these need acknowledgement.
    pub critical_phases: Vec<PhaseType>,
    pub checkpoint: Option<PathBuf>,
    pub next_phase: Option<PhaseType>,
}

impl Suspension {
    pub fn requires_acknowledgement(&self) -> bool {
        !self.critical_phases.is_empty()
    }
}

/// Result of driving the loop until it yields.
#[derive(Debug, Clone)]
pub enum RunStatus {
    Suspended(Suspension),
    Terminated(RunReport),
}

/// Tuning for the control loop.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub mode: AutonomyMode,
    pub stop_on_critical: bool,
    pub max_iterations: u32,
    pub run_timeout: Duration,
    pub tracker_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            mode: AutonomyMode::default(),
            stop_on_critical: false,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
            tracker_timeout: Duration::from_secs(DEFAULT_TRACKER_TIMEOUT_SECS),
        }
    }
}

impl ControllerConfig {
    pub fn with_mode(mut self, mode: AutonomyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_stop_on_critical(mut self, stop: bool) -> Self {
        self.stop_on_critical = stop;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_tracker_timeout(mut self, timeout: Duration) -> Self {
        self.tracker_timeout = timeout;
        self
    }
}

/// Progress callbacks from the control loop. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn phase_started(&self, _phase: PhaseType) {}
    fn step_started(&self, _phase: PhaseType, _step: ReviewStep) {}
    fn step_finished(&self, _result: &ReviewStepResult) {}
    fn phase_finished(&self, _phase: PhaseType, _outcome: &PhaseOutcome) {}
    fn phase_skipped(&self, _phase: PhaseType, _blocking: &[PhaseType]) {}
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_str_and_display() {
        assert_eq!(
            "fully-autonomous".parse::<AutonomyMode>().unwrap(),
            AutonomyMode::FullyAutonomous
        );
        assert_eq!("BATCH".parse::<AutonomyMode>().unwrap(), AutonomyMode::Batch);
        assert!("yolo".parse::<AutonomyMode>().is_err());
        for mode in [
            AutonomyMode::Checkpoint,
            AutonomyMode::Batch,
            AutonomyMode::FullyAutonomous,
        ] {
            assert_eq!(mode.to_string().parse::<AutonomyMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_termination_reason_serialization() {
        let reasons = [
            (TerminationReason::MaxIterations, "max_iterations"),
            (TerminationReason::AllComplete, "all_complete"),
            (TerminationReason::CriticalBlocking, "critical_blocking"),
            (TerminationReason::Timeout, "timeout"),
            (TerminationReason::UserCancelled, "user_cancelled"),
        ];
        for (reason, text) in reasons {
            assert_eq!(serde_json::to_string(&reason).unwrap(), format!("\"{}\"", text));
            assert_eq!(reason.to_string(), text);
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.mode, AutonomyMode::Checkpoint);
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.run_timeout, Duration::from_secs(3600));
        assert!(!config.stop_on_critical);
    }
}
