//! The phase loop.
//!
//! `run` drives phases until the loop either suspends for approval or
//! terminates; `approve` re-arms a suspended loop. Checkpoints are staged
//! after every executed phase and flushed at boundaries, on termination, or
//! by the shutdown path through [`PendingCheckpoint`].

use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::report::{RunReport, SkippedPhase};
use super::{
    Approval, AutonomyMode, ControllerConfig, NoopObserver, PhaseOutcome, RunObserver, RunStatus,
    Suspension, TerminationReason,
};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::errors::{CheckpointError, ControllerError, ReviewError};
use crate::phase::{PhaseBoard, PhaseStatus, PhaseType};
use crate::requirements::LoadedPlan;
use crate::review::{ResultsTable, ReviewEngine, ReviewStep};
use crate::tracker::{IssueTracker, all_issues_closed};

/// Snapshot staged for the next save, shared with the shutdown path.
#[derive(Clone)]
pub struct PendingCheckpoint {
    store: CheckpointStore,
    slot: Arc<Mutex<Option<Checkpoint>>>,
}

impl PendingCheckpoint {
    fn new(store: CheckpointStore) -> Self {
        Self {
            store,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    fn stage(&self, checkpoint: Checkpoint) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(checkpoint);
    }

    pub fn is_staged(&self) -> bool {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Save the staged snapshot, if any. Each snapshot is written at most once.
    pub fn flush(&self) -> Result<Option<PathBuf>, CheckpointError> {
        let staged = self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        match staged {
            Some(checkpoint) => self.store.save(&checkpoint).map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Default)]
struct RunState {
    board: PhaseBoard,
    results: ResultsTable,
    next_index: usize,
    iterations: u32,
    prior_duration: Duration,
    segment_start: Option<Instant>,
    suspended: Option<Suspension>,
    terminated: Option<TerminationReason>,
    since_boundary: Vec<PhaseType>,
    skipped: Vec<SkippedPhase>,
    last_checkpoint: Option<PathBuf>,
}

/// Drives a plan through the six phases under an [`AutonomyMode`].
pub struct AutonomyController {
    engine: Arc<ReviewEngine>,
    plan: Arc<LoadedPlan>,
    config: ControllerConfig,
    tracker: Option<Arc<dyn IssueTracker>>,
    observer: Arc<dyn RunObserver>,
    cancel: CancellationToken,
    pending: PendingCheckpoint,
    state: RunState,
}

impl AutonomyController {
    /// Validate the plan's tree and set up a fresh run.
    pub fn new(
        engine: Arc<ReviewEngine>,
        store: CheckpointStore,
        plan: LoadedPlan,
        config: ControllerConfig,
    ) -> Result<Self, ControllerError> {
        plan.plan
            .requirements
            .validate_with_max_depth(engine.config().max_depth)
            .into_result()?;

        Ok(Self {
            engine,
            plan: Arc::new(plan),
            config,
            tracker: None,
            observer: Arc::new(NoopObserver),
            cancel: CancellationToken::new(),
            pending: PendingCheckpoint::new(store),
            state: RunState::default(),
        })
    }

    /// Rebuild a run from a checkpoint already verified against the plan hash.
    ///
    /// Phases whose results hold Critical findings come back `Failed`. In a
    /// suspending mode the controller then starts suspended so they are
    /// acknowledged or retried; fully autonomous runs carry on and skip their
    /// dependents.
    pub fn resume(
        engine: Arc<ReviewEngine>,
        store: CheckpointStore,
        plan: LoadedPlan,
        config: ControllerConfig,
        checkpoint: Checkpoint,
    ) -> Result<Self, ControllerError> {
        let mut controller = Self::new(engine, store, plan, config)?;
        let results = checkpoint.completed_results;
        let mut board = PhaseBoard::new();
        for phase in PhaseType::ALL {
            if !results.is_phase_complete(phase) {
                continue;
            }
            let status = if results.phase_has_critical(phase) {
                PhaseStatus::Failed
            } else {
                PhaseStatus::Complete
            };
            board.restore(phase, status);
        }

        let failed = board.failed_phases();
        let next_index = checkpoint.current_phase_index.min(PhaseType::COUNT);
        info!(
            plan = %checkpoint.plan_name,
            next_phase = ?PhaseType::from_index(next_index),
            failed = failed.len(),
            "Resuming from checkpoint"
        );

        let state = &mut controller.state;
        state.board = board;
        state.results = results;
        state.next_index = next_index;
        state.prior_duration = checkpoint.cumulative_duration;
        if !failed.is_empty() && !controller.config.mode.suspends() {
            warn!(phases = ?failed, "Resuming past failed phases; dependents will be skipped");
        } else if !failed.is_empty() {
            state.suspended = Some(Suspension {
                phases: Vec::new(),
                critical_phases: failed,
                checkpoint: None,
                next_phase: PhaseType::from_index(next_index),
            });
        }
        Ok(controller)
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn IssueTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run under `token`; cancelling it ends the run with `user_cancelled`.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn plan(&self) -> &LoadedPlan {
        &self.plan
    }

    pub fn board(&self) -> &PhaseBoard {
        &self.state.board
    }

    pub fn results(&self) -> &ResultsTable {
        &self.state.results
    }

    pub fn iterations(&self) -> u32 {
        self.state.iterations
    }

    pub fn suspension(&self) -> Option<&Suspension> {
        self.state.suspended.as_ref()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.terminated.is_some()
    }

    pub fn termination(&self) -> Option<TerminationReason> {
        self.state.terminated
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Handle for saving the latest unsaved snapshot from outside the loop.
    pub fn pending_checkpoint(&self) -> PendingCheckpoint {
        self.pending.clone()
    }

    /// Drive the loop until it suspends or terminates.
    ///
    /// While suspended this returns the same suspension without doing work.
    pub async fn run(&mut self) -> Result<RunStatus, ControllerError> {
        if let Some(reason) = self.state.terminated {
            return Err(ControllerError::AlreadyTerminated {
                reason: reason.to_string(),
            });
        }
        if let Some(suspension) = &self.state.suspended {
            return Ok(RunStatus::Suspended(suspension.clone()));
        }

        self.state.segment_start = Some(Instant::now());
        info!(
            plan = %self.plan.plan.name,
            mode = %self.config.mode,
            next_phase = ?PhaseType::from_index(self.state.next_index),
            "Running review loop"
        );

        loop {
            if self.cancel.is_cancelled() {
                return self.finish(TerminationReason::UserCancelled);
            }

            let Some(phase) = PhaseType::from_index(self.state.next_index) else {
                let reason = if self.state.board.all_complete() {
                    TerminationReason::AllComplete
                } else {
                    TerminationReason::CriticalBlocking
                };
                return self.finish(reason);
            };

            if let Some(reason) = self.check_limits().await {
                return self.finish(reason);
            }

            self.state.next_index += 1;

            let executed = match self.state.board.status(phase) {
                PhaseStatus::Complete => {
                    debug!(%phase, "Phase already complete");
                    false
                }
                _ => {
                    let blocking = self.state.board.blocking_phases(phase);
                    if blocking.is_empty() {
                        let outcome = match self.execute_phase(phase).await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                self.finish(TerminationReason::CriticalBlocking)?;
                                return Err(e);
                            }
                        };
                        self.observer.phase_finished(phase, &outcome);
                        match outcome {
                            PhaseOutcome::Interrupted(reason) => return self.finish(reason),
                            PhaseOutcome::Blocked { critical } if self.config.stop_on_critical => {
                                warn!(%phase, critical, "Stopping on critical findings");
                                return self.finish(TerminationReason::CriticalBlocking);
                            }
                            _ => {}
                        }
                        self.state.since_boundary.push(phase);
                        true
                    } else {
                        self.skip_phase(phase, blocking);
                        false
                    }
                }
            };

            if let Some(suspension) = self.at_boundary(phase, executed)? {
                return Ok(RunStatus::Suspended(suspension));
            }
        }
    }

    /// Re-enter a suspended loop. Takes effect on the next [`run`](Self::run).
    pub fn approve(&mut self, approval: Approval) -> Result<(), ControllerError> {
        if let Some(reason) = self.state.terminated {
            return Err(ControllerError::AlreadyTerminated {
                reason: reason.to_string(),
            });
        }
        let Some(suspension) = self.state.suspended.as_ref() else {
            return Err(ControllerError::NotSuspended);
        };

        match approval {
            Approval::Continue => {
                if suspension.requires_acknowledgement() {
                    return Err(ControllerError::CriticalNotAcknowledged {
                        phases: suspension.critical_phases.clone(),
                    });
                }
            }
            Approval::AcknowledgeCritical => {
                info!(phases = ?suspension.critical_phases, "Critical findings acknowledged");
            }
            Approval::RetryFailed => {
                let failed = self.state.board.failed_phases();
                let Some(first) = failed.first() else {
                    return Err(ControllerError::NothingToRetry);
                };
                info!(phases = ?failed, "Retrying failed phases");
                self.state.next_index = first.index();
            }
            Approval::Cancel => {
                info!("Run cancelled at suspension");
                self.cancel.cancel();
            }
        }
        self.state.suspended = None;
        Ok(())
    }

    /// Run one phase, or a single step of it, outside the loop.
    ///
    /// No status transitions, no checkpoint, and no termination reason.
    pub async fn review_targeted(
        &mut self,
        phase: PhaseType,
        step: Option<ReviewStep>,
    ) -> Result<RunReport, ControllerError> {
        if let Err(e) = self.state.board.check_dependencies(phase) {
            warn!(%phase, blocking = ?e.blocking, "Reviewing phase with unmet dependencies");
        }

        let started = Instant::now();
        let steps: Vec<ReviewStep> = match step {
            Some(step) => vec![step],
            None => ReviewStep::ALL.to_vec(),
        };

        self.observer.phase_started(phase);
        for step in steps {
            if self.cancel.is_cancelled() {
                break;
            }
            self.state.iterations += 1;
            self.observer.step_started(phase, step);
            let result = match self
                .engine
                .run_step(phase, step, &self.plan.plan.requirements, &self.cancel)
                .await
            {
                Ok(result) => result,
                Err(ReviewError::Cancelled { .. }) => break,
                Err(e) => return Err(e.into()),
            };
            self.observer.step_finished(&result);
            self.state.results.insert(result);
        }

        Ok(RunReport::new(
            self.plan.plan.name.clone(),
            self.plan.hash.clone(),
            self.state.results.clone(),
            &self.state.board,
        )
        .with_mode(self.config.mode)
        .with_iterations(self.state.iterations)
        .with_duration(started.elapsed()))
    }

    fn elapsed(&self) -> Duration {
        self.state.prior_duration
            + self
                .state
                .segment_start
                .map(|start| start.elapsed())
                .unwrap_or_default()
    }

    fn pause_clock(&mut self) {
        if let Some(start) = self.state.segment_start.take() {
            self.state.prior_duration += start.elapsed();
        }
    }

    async fn check_limits(&self) -> Option<TerminationReason> {
        if self.elapsed() >= self.config.run_timeout {
            return Some(TerminationReason::Timeout);
        }
        if self.state.iterations >= self.config.max_iterations {
            return Some(TerminationReason::MaxIterations);
        }
        if self.issues_closed().await {
            info!("All referenced issues are closed");
            return Some(TerminationReason::AllComplete);
        }
        // The tracker lookup may have used up the deadline or seen a cancel.
        if self.cancel.is_cancelled() {
            return Some(TerminationReason::UserCancelled);
        }
        if self.elapsed() >= self.config.run_timeout {
            return Some(TerminationReason::Timeout);
        }
        None
    }

    /// Bounded by the tracker timeout, the run deadline and the cancel token.
    /// A lookup that does not answer in time counts as "not closed".
    async fn issues_closed(&self) -> bool {
        let Some(tracker) = self.tracker.clone() else {
            return false;
        };
        let issues = self.plan.plan.issues.clone();
        if issues.is_empty() {
            return false;
        }

        let budget = self
            .config
            .run_timeout
            .saturating_sub(self.elapsed())
            .min(self.config.tracker_timeout);
        let lookup =
            tokio::task::spawn_blocking(move || all_issues_closed(tracker.as_ref(), &issues));
        tokio::select! {
            joined = tokio::time::timeout(budget, lookup) => match joined {
                Ok(Ok(closed)) => closed,
                Ok(Err(e)) => {
                    warn!(error = %e, "Issue tracker lookup panicked");
                    false
                }
                Err(_) => {
                    warn!(after = ?budget, "Issue tracker lookup timed out");
                    false
                }
            },
            _ = self.cancel.cancelled() => false,
        }
    }

    fn skip_phase(&mut self, phase: PhaseType, blocking: Vec<PhaseType>) {
        warn!(%phase, blocking = ?blocking, "Skipping phase: dependencies not met");
        self.observer.phase_skipped(phase, &blocking);
        self.state.skipped.retain(|s| s.phase != phase);
        self.state.skipped.push(SkippedPhase { phase, blocking });
    }

    async fn execute_phase(&mut self, phase: PhaseType) -> Result<PhaseOutcome, ControllerError> {
        self.state.board.transition(phase, PhaseStatus::InProgress)?;
        self.state.results.clear_phase(phase);
        self.state.skipped.retain(|s| s.phase != phase);
        self.observer.phase_started(phase);
        info!(%phase, "Starting phase");

        let engine = Arc::clone(&self.engine);
        let plan = Arc::clone(&self.plan);

        for step in ReviewStep::ALL {
            if self.state.iterations >= self.config.max_iterations {
                return self.interrupt(phase, TerminationReason::MaxIterations);
            }
            self.state.iterations += 1;
            self.observer.step_started(phase, step);

            let remaining = self.config.run_timeout.saturating_sub(self.elapsed());
            let outcome = tokio::select! {
                result = engine.run_step(phase, step, &plan.plan.requirements, &self.cancel) => Some(result),
                _ = tokio::time::sleep(remaining) => None,
            };

            match outcome {
                None => return self.interrupt(phase, TerminationReason::Timeout),
                Some(Err(ReviewError::Cancelled { .. })) => {
                    return self.interrupt(phase, TerminationReason::UserCancelled);
                }
                Some(Err(e)) => {
                    self.interrupt(phase, TerminationReason::CriticalBlocking)?;
                    return Err(e.into());
                }
                Some(Ok(result)) => {
                    self.observer.step_finished(&result);
                    self.state.results.insert(result);
                }
            }
        }

        let counts = self.state.results.phase_counts(phase);
        let outcome = if counts.critical > 0 {
            self.state.board.transition(phase, PhaseStatus::Failed)?;
            warn!(%phase, critical = counts.critical, "Phase blocked by critical findings");
            PhaseOutcome::Blocked {
                critical: counts.critical,
            }
        } else {
            self.state.board.transition(phase, PhaseStatus::Complete)?;
            info!(%phase, warnings = counts.warnings, "Phase complete");
            PhaseOutcome::Passed
        };
        self.pending.stage(self.snapshot());
        Ok(outcome)
    }

    /// Discard the phase's partial results and mark it failed.
    fn interrupt(
        &mut self,
        phase: PhaseType,
        reason: TerminationReason,
    ) -> Result<PhaseOutcome, ControllerError> {
        warn!(%phase, %reason, "Phase interrupted");
        self.state.results.clear_phase(phase);
        self.state.board.transition(phase, PhaseStatus::Failed)?;
        Ok(PhaseOutcome::Interrupted(reason))
    }

    fn at_boundary(
        &mut self,
        phase: PhaseType,
        executed: bool,
    ) -> Result<Option<Suspension>, ControllerError> {
        let boundary = match self.config.mode {
            AutonomyMode::Checkpoint | AutonomyMode::FullyAutonomous => executed,
            AutonomyMode::Batch => {
                phase.ends_batch_group() && !self.state.since_boundary.is_empty()
            }
        };
        if !boundary {
            return Ok(None);
        }

        let checkpoint = self.save_checkpoint()?;
        let phases = std::mem::take(&mut self.state.since_boundary);
        if !self.config.mode.suspends() || self.state.next_index >= PhaseType::COUNT {
            return Ok(None);
        }

        let critical_phases = phases
            .iter()
            .copied()
            .filter(|p| self.state.board.status(*p) == PhaseStatus::Failed)
            .collect();
        let suspension = Suspension {
            phases,
            critical_phases,
            checkpoint,
            next_phase: PhaseType::from_index(self.state.next_index),
        };
        info!(
            phases = ?suspension.phases,
            critical = ?suspension.critical_phases,
            "Suspending for approval"
        );
        self.pause_clock();
        self.state.suspended = Some(suspension.clone());
        Ok(Some(suspension))
    }

    fn snapshot(&self) -> Checkpoint {
        Checkpoint {
            plan_hash: self.plan.hash.clone(),
            plan_name: self.plan.plan.name.clone(),
            current_phase_index: self.state.next_index,
            autonomy_mode: self.config.mode,
            completed_results: self.state.results.clone(),
            pending_phases: self
                .state
                .board
                .iter()
                .filter(|(_, status)| *status != PhaseStatus::Complete)
                .map(|(phase, _)| phase)
                .collect(),
            saved_at: Utc::now(),
            cumulative_duration: self.elapsed(),
        }
    }

    fn save_checkpoint(&mut self) -> Result<Option<PathBuf>, ControllerError> {
        if !self.pending.is_staged() {
            self.pending.stage(self.snapshot());
        }
        let saved = self.pending.flush()?;
        if let Some(path) = &saved {
            self.state.last_checkpoint = Some(path.clone());
        }
        Ok(saved.or_else(|| self.state.last_checkpoint.clone()))
    }

    fn finish(&mut self, reason: TerminationReason) -> Result<RunStatus, ControllerError> {
        self.pause_clock();
        if let Some(path) = self.pending.flush()? {
            self.state.last_checkpoint = Some(path);
        }
        self.state.terminated = Some(reason);
        self.state.suspended = None;

        let report = RunReport::new(
            self.plan.plan.name.clone(),
            self.plan.hash.clone(),
            self.state.results.clone(),
            &self.state.board,
        )
        .with_mode(self.config.mode)
        .with_termination(reason)
        .with_iterations(self.state.iterations)
        .with_duration(self.state.prior_duration)
        .with_skipped(self.state.skipped.clone())
        .with_checkpoint(self.state.last_checkpoint.clone());

        info!(
            %reason,
            iterations = self.state.iterations,
            exit_code = report.exit_code(),
            "Review run terminated"
        );
        Ok(RunStatus::Terminated(report))
    }
}
