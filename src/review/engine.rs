//! Review engine: runs one step over every node of a requirement tree.
//!
//! Sibling analyses within one `(phase, step)` fan out over a `JoinSet`
//! bounded by a semaphore. Each task writes into the slot reserved for its
//! pre-order position, and classification plus bucketing happen on the
//! calling task after the join, so no lock sits on the aggregation path.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::analyzer::{AnalysisRequest, Analyzer};
use super::classify::finding_from_output;
use super::findings::ReviewStepResult;
use super::limiter::RateLimiter;
use super::step::ReviewStep;
use crate::errors::{AnalysisError, ReviewError};
use crate::phase::PhaseType;
use crate::requirements::{DEFAULT_MAX_DEPTH, RequirementHierarchy};

/// Default number of concurrent analyzer calls.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default per-call analysis deadline (1 hour).
pub const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 3600;

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub concurrency: usize,
    pub analysis_timeout: Duration,
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            analysis_timeout: Duration::from_secs(DEFAULT_ANALYSIS_TIMEOUT_SECS),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl EngineConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Runs review steps against a plan's requirement tree.
pub struct ReviewEngine {
    analyzer: Arc<dyn Analyzer>,
    limiter: Arc<RateLimiter>,
    config: EngineConfig,
    plan_name: String,
}

impl ReviewEngine {
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        limiter: Arc<RateLimiter>,
        config: EngineConfig,
        plan_name: impl Into<String>,
    ) -> Self {
        Self {
            analyzer,
            limiter,
            config,
            plan_name: plan_name.into(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate every reachable node of `tree` against `step`.
    ///
    /// Per-node analysis failures become Critical findings. Only cancellation
    /// and a panicked analysis task fail the step; in both cases outstanding
    /// sibling tasks are aborted rather than awaited.
    pub async fn run_step(
        &self,
        phase: PhaseType,
        step: ReviewStep,
        tree: &RequirementHierarchy,
        cancel: &CancellationToken,
    ) -> Result<ReviewStepResult, ReviewError> {
        let started = Instant::now();
        let nodes = tree.preorder_nodes(self.config.max_depth);
        info!(%phase, %step, nodes = nodes.len(), "Running review step");

        let cancelled = || ReviewError::Cancelled {
            phase,
            step: step.to_string(),
        };

        let step_token = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks: JoinSet<(usize, Result<String, AnalysisError>)> = JoinSet::new();

        for (index, node) in nodes.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(cancelled());
                }
                permit = semaphore.clone().acquire_owned() => permit.map_err(|_| cancelled())?,
            };

            let request = AnalysisRequest::for_node(&self.plan_name, phase, step, node);
            let analyzer = Arc::clone(&self.analyzer);
            let limiter = Arc::clone(&self.limiter);
            let token = step_token.clone();
            let timeout = self.config.analysis_timeout;

            tasks.spawn(async move {
                let _permit = permit; // Hold until complete
                let result = match limiter.acquire(&token).await {
                    Ok(()) => analyzer.analyze(&request, timeout, &token).await,
                    Err(e) => Err(e),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<String, AnalysisError>>> =
            (0..nodes.len()).map(|_| None).collect();

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    warn!(%phase, %step, "Review step cancelled");
                    return Err(cancelled());
                }
                joined = tasks.join_next() => joined,
            };
            match joined {
                None => break,
                Some(Ok((index, result))) => {
                    if let Err(e) = &result {
                        debug!(%phase, %step, node_id = %nodes[index].id, error = %e, "Analysis failed");
                    }
                    slots[index] = Some(result);
                }
                Some(Err(source)) => {
                    tasks.abort_all();
                    return Err(ReviewError::TaskFailed {
                        phase,
                        step: step.to_string(),
                        source,
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let findings = nodes.iter().zip(slots).map(|(node, slot)| {
            let output = slot.unwrap_or(Err(AnalysisError::Cancelled));
            finding_from_output(&node.id, step, output)
        });
        let result = ReviewStepResult::from_findings(phase, step, findings);

        let counts = result.counts();
        info!(
            %phase,
            %step,
            well_defined = counts.well_defined,
            warnings = counts.warnings,
            critical = counts.critical,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Review step finished"
        );
        Ok(result)
    }
}
