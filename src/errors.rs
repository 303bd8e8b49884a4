//! Typed error hierarchy for the plan review orchestrator.
//!
//! The enums follow the lifecycle of a run:
//! - `ValidationError` / `TreeError`: malformed requirement trees, fatal before any phase starts
//! - `DependencyError` / `TransitionError` / `PhaseBoundaryError`: phase state machine misuse
//! - `AnalysisError`: a single analyzer call failed; absorbed into a Critical finding
//! - `CheckpointError`: persistence and resume failures
//! - `ReviewError` / `ControllerError`: engine and control loop failures

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::phase::{PhaseStatus, PhaseType};

/// A single structural problem found in a requirement tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Plan contains no requirements")]
    EmptyHierarchy,

    #[error("Node {node_id} has unknown type '{value}' (expected parent, sub_process or implementation)")]
    UnknownType { node_id: String, value: String },

    #[error("Node {node_id} has an empty description")]
    EmptyDescription { node_id: String },

    #[error("Node {node_id} is typed '{actual}' at depth {depth}, expected {expected}")]
    TypeMismatch {
        node_id: String,
        actual: String,
        expected: String,
        depth: usize,
    },

    #[error("Implementation node {node_id} must not have children")]
    LeafHasChildren { node_id: String },

    #[error("Node {node_id} should be numbered {expected}")]
    NonSequentialId { node_id: String, expected: String },

    #[error("Node {node_id} declares parent {found:?}, expected {expected:?}")]
    ParentIdMismatch {
        node_id: String,
        expected: Option<String>,
        found: Option<String>,
    },

    #[error("Duplicate requirement id {node_id}")]
    DuplicateId { node_id: String },

    #[error("Cycle detected: {node_id} appears twice on its own ancestor path")]
    CycleDetected { node_id: String },

    #[error("Node {node_id} exceeds the maximum tree depth of {max_depth}")]
    DepthExceeded { node_id: String, max_depth: usize },
}

/// Ordered collection of validation errors, in tree traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.0.iter()
    }

    /// Convert into a `Result`, failing when any error was collected.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Structural mutation errors on a requirement hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("Parent node {parent_id} not found")]
    ParentNotFound { parent_id: String },

    #[error("Requirement id {node_id} already exists")]
    DuplicateId { node_id: String },
}

/// A phase was attempted before every preceding phase completed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Phase {phase} is blocked by incomplete phases: {}", format_phases(.blocking))]
pub struct DependencyError {
    pub phase: PhaseType,
    pub blocking: Vec<PhaseType>,
}

fn format_phases(phases: &[PhaseType]) -> String {
    phases
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// An illegal phase status transition was requested. State is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal status transition {from} -> {to}{}", .phase.map(|p| format!(" for phase {}", p)).unwrap_or_default())]
pub struct TransitionError {
    pub phase: Option<PhaseType>,
    pub from: PhaseStatus,
    pub to: PhaseStatus,
}

/// Navigation past either end of the fixed phase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PhaseBoundaryError {
    #[error("{0} is the last phase; there is no next phase")]
    NoNext(PhaseType),

    #[error("{0} is the first phase; there is no previous phase")]
    NoPrevious(PhaseType),
}

/// Failure of a single analyzer call for one node.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Failed to spawn analyzer: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Analyzer I/O failed: {0}")]
    Io(#[source] std::io::Error),

    #[error("Analyzer exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Analyzer timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },

    #[error("Analyzer output could not be parsed: {reason}")]
    Unparsable { reason: String },

    #[error("Analyzer reported an error: {0}")]
    Reported(String),

    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    /// Whether retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Spawn(_))
    }
}

/// Checkpoint persistence errors.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize checkpoint: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Checkpoint {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Checkpoint {path} was written for plan hash {found}, current plan hash is {expected}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Invalid checkpoint pattern: {0}")]
    Pattern(String),
}

impl CheckpointError {
    /// Stale, foreign, or unparsable checkpoint.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupt { .. } | Self::HashMismatch { .. })
    }
}

/// Errors from running a single review step.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Review of {phase}/{step} was cancelled")]
    Cancelled { phase: PhaseType, step: String },

    #[error("Analysis task for {phase}/{step} failed: {source}")]
    TaskFailed {
        phase: PhaseType,
        step: String,
        #[source]
        source: tokio::task::JoinError,
    },
}

/// Errors from the autonomy control loop.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Requirement tree is invalid: {0}")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Review(#[from] ReviewError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Controller is not suspended; nothing to approve")]
    NotSuspended,

    #[error("Critical findings in {} must be acknowledged before continuing", format_phases(.phases))]
    CriticalNotAcknowledged { phases: Vec<PhaseType> },

    #[error("No failed phase to retry")]
    NothingToRetry,

    #[error("Run already terminated ({reason})")]
    AlreadyTerminated { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_display_lists_every_error() {
        let mut errors = ValidationErrors::new();
        errors.push(ValidationError::EmptyDescription {
            node_id: "REQ_001".into(),
        });
        errors.push(ValidationError::DuplicateId {
            node_id: "REQ_002".into(),
        });
        let text = errors.to_string();
        assert!(text.contains("2 validation error(s)"));
        assert!(text.contains("REQ_001"));
        assert!(text.contains("REQ_002"));
    }

    #[test]
    fn validation_errors_into_result() {
        assert!(ValidationErrors::new().into_result().is_ok());
        let mut errors = ValidationErrors::new();
        errors.push(ValidationError::EmptyHierarchy);
        assert_eq!(errors.into_result().unwrap_err().len(), 1);
    }

    #[test]
    fn dependency_error_names_blocking_phases() {
        let err = DependencyError {
            phase: PhaseType::TddPlanning,
            blocking: vec![PhaseType::Decomposition],
        };
        let text = err.to_string();
        assert!(text.contains("TDDPlanning"));
        assert!(text.contains("Decomposition"));
    }

    #[test]
    fn transition_error_carries_phase_context() {
        let err = TransitionError {
            phase: Some(PhaseType::Research),
            from: PhaseStatus::Complete,
            to: PhaseStatus::InProgress,
        };
        assert!(err.to_string().contains("for phase Research"));

        let bare = TransitionError {
            phase: None,
            from: PhaseStatus::Pending,
            to: PhaseStatus::Complete,
        };
        assert!(!bare.to_string().contains("for phase"));
    }

    #[test]
    fn analysis_error_retryability() {
        assert!(AnalysisError::Timeout {
            after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!AnalysisError::Cancelled.is_retryable());
    }

    #[test]
    fn checkpoint_error_corruption_classification() {
        let err = CheckpointError::HashMismatch {
            path: PathBuf::from("/tmp/x.json"),
            expected: "a".into(),
            found: "b".into(),
        };
        assert!(err.is_corruption());
        let io = CheckpointError::Io {
            path: PathBuf::from("/tmp"),
            source: std::io::Error::other("boom"),
        };
        assert!(!io.is_corruption());
    }

    #[test]
    fn controller_error_converts_from_validation() {
        let mut errors = ValidationErrors::new();
        errors.push(ValidationError::EmptyHierarchy);
        let err: ControllerError = errors.into();
        assert!(matches!(err, ControllerError::Validation(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ValidationErrors::new());
        assert_std_error(&TreeError::ParentNotFound {
            parent_id: "x".into(),
        });
        assert_std_error(&PhaseBoundaryError::NoNext(PhaseType::Implementation));
        assert_std_error(&ControllerError::NotSuspended);
    }
}
