//! Phase definitions and the phase dependency state machine.
//!
//! This module provides:
//! - `PhaseType`, the fixed six-phase delivery order (also the dependency order)
//! - `PhaseStatus` and its transition table
//! - `PhaseBoard`, the per-run status table with dependency queries

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{DependencyError, PhaseBoundaryError, TransitionError};

/// One of the six fixed delivery phases, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    Research,
    Decomposition,
    TddPlanning,
    MultiDoc,
    BeadsSync,
    Implementation,
}

impl PhaseType {
    /// Number of phases.
    pub const COUNT: usize = 6;

    /// The fixed phase order. Phase `k` depends on every phase before it.
    pub const ALL: [PhaseType; Self::COUNT] = [
        PhaseType::Research,
        PhaseType::Decomposition,
        PhaseType::TddPlanning,
        PhaseType::MultiDoc,
        PhaseType::BeadsSync,
        PhaseType::Implementation,
    ];

    /// Get all phases in order.
    pub fn all() -> &'static [PhaseType] {
        &Self::ALL
    }

    /// Position in the fixed order (0-based).
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<PhaseType> {
        Self::ALL.get(index).copied()
    }

    pub fn next(self) -> Result<PhaseType, PhaseBoundaryError> {
        Self::from_index(self.index() + 1).ok_or(PhaseBoundaryError::NoNext(self))
    }

    pub fn previous(self) -> Result<PhaseType, PhaseBoundaryError> {
        self.index()
            .checked_sub(1)
            .and_then(Self::from_index)
            .ok_or(PhaseBoundaryError::NoPrevious(self))
    }

    pub fn is_first(self) -> bool {
        self.index() == 0
    }

    pub fn is_last(self) -> bool {
        self.index() == Self::COUNT - 1
    }

    pub fn has_next(self) -> bool {
        !self.is_last()
    }

    pub fn has_previous(self) -> bool {
        !self.is_first()
    }

    pub fn distance_from_start(self) -> usize {
        self.index()
    }

    pub fn distance_to_end(self) -> usize {
        Self::COUNT - 1 - self.index()
    }

    /// Phases strictly before this one, in order.
    pub fn predecessors(self) -> &'static [PhaseType] {
        &Self::ALL[..self.index()]
    }

    /// Batch group index: `{Research, Decomposition}`, `{TDDPlanning, MultiDoc}`,
    /// `{BeadsSync, Implementation}`.
    pub fn batch_group(self) -> usize {
        self.index() / 2
    }

    /// The phases sharing this phase's batch group.
    pub fn batch_members(self) -> [PhaseType; 2] {
        let start = self.batch_group() * 2;
        [Self::ALL[start], Self::ALL[start + 1]]
    }

    /// Whether this phase closes its batch group.
    pub fn ends_batch_group(self) -> bool {
        self.index() % 2 == 1
    }

    /// Short human description of what the phase produces.
    pub fn description(self) -> &'static str {
        match self {
            PhaseType::Research => "Research and discovery of the problem space",
            PhaseType::Decomposition => "Decomposition into the requirement hierarchy",
            PhaseType::TddPlanning => "Test-first planning of acceptance criteria",
            PhaseType::MultiDoc => "Multi-document design and interface specs",
            PhaseType::BeadsSync => "Synchronisation of work items to the issue tracker",
            PhaseType::Implementation => "Implementation hand-off to the coding agent",
        }
    }
}

impl fmt::Display for PhaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseType::Research => "Research",
            PhaseType::Decomposition => "Decomposition",
            PhaseType::TddPlanning => "TDDPlanning",
            PhaseType::MultiDoc => "MultiDoc",
            PhaseType::BeadsSync => "BeadsSync",
            PhaseType::Implementation => "Implementation",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for PhaseType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "research" => Ok(PhaseType::Research),
            "decomposition" => Ok(PhaseType::Decomposition),
            "tddplanning" | "tdd" => Ok(PhaseType::TddPlanning),
            "multidoc" => Ok(PhaseType::MultiDoc),
            "beadssync" | "beads" => Ok(PhaseType::BeadsSync),
            "implementation" | "impl" => Ok(PhaseType::Implementation),
            _ => anyhow::bail!(
                "Invalid phase '{}'. Valid values: research, decomposition, tdd-planning, multi-doc, beads-sync, implementation",
                s
            ),
        }
    }
}

/// Lifecycle status of a phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl PhaseStatus {
    /// Check the transition table:
    /// `Pending→InProgress`, `InProgress→Complete`, `InProgress→Failed`, `Failed→InProgress`.
    pub fn can_transition_to(self, to: PhaseStatus) -> bool {
        matches!(
            (self, to),
            (PhaseStatus::Pending, PhaseStatus::InProgress)
                | (PhaseStatus::InProgress, PhaseStatus::Complete)
                | (PhaseStatus::InProgress, PhaseStatus::Failed)
                | (PhaseStatus::Failed, PhaseStatus::InProgress)
        )
    }

    /// Validate a transition, returning the new status.
    pub fn transition_to(self, to: PhaseStatus) -> Result<PhaseStatus, TransitionError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TransitionError {
                phase: None,
                from: self,
                to,
            })
        }
    }

    /// `Complete` accepts no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, PhaseStatus::Complete)
    }

    pub fn emoji(self) -> &'static str {
        match self {
            PhaseStatus::Pending => "⏳",
            PhaseStatus::InProgress => "▶",
            PhaseStatus::Complete => "✓",
            PhaseStatus::Failed => "✗",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Complete => "complete",
            PhaseStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Status table for every phase of a run. Unset phases read as `Pending`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseBoard {
    statuses: [PhaseStatus; PhaseType::COUNT],
}

impl PhaseBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a board from explicit statuses; phases not listed stay `Pending`.
    pub fn from_statuses(statuses: impl IntoIterator<Item = (PhaseType, PhaseStatus)>) -> Self {
        let mut board = Self::new();
        for (phase, status) in statuses {
            board.restore(phase, status);
        }
        board
    }

    pub fn status(&self, phase: PhaseType) -> PhaseStatus {
        self.statuses[phase.index()]
    }

    /// Overwrite a status without consulting the transition table.
    ///
    /// Only for rebuilding state from a persisted checkpoint.
    pub fn restore(&mut self, phase: PhaseType, status: PhaseStatus) {
        self.statuses[phase.index()] = status;
    }

    /// Apply a transition. On error the status is left unchanged.
    pub fn transition(
        &mut self,
        phase: PhaseType,
        to: PhaseStatus,
    ) -> Result<PhaseStatus, TransitionError> {
        let from = self.status(phase);
        let next = from.transition_to(to).map_err(|mut e| {
            e.phase = Some(phase);
            e
        })?;
        self.statuses[phase.index()] = next;
        Ok(next)
    }

    pub fn can_transition(&self, phase: PhaseType, to: PhaseStatus) -> bool {
        self.status(phase).can_transition_to(to)
    }

    /// True iff every phase strictly before `phase` is `Complete`.
    pub fn are_dependencies_met(&self, phase: PhaseType) -> bool {
        phase
            .predecessors()
            .iter()
            .all(|p| self.status(*p) == PhaseStatus::Complete)
    }

    /// Preceding phases that are not `Complete`, in order.
    pub fn blocking_phases(&self, phase: PhaseType) -> Vec<PhaseType> {
        phase
            .predecessors()
            .iter()
            .copied()
            .filter(|p| self.status(*p) != PhaseStatus::Complete)
            .collect()
    }

    /// Dependency check as a `Result`, for callers that want the diagnostic.
    pub fn check_dependencies(&self, phase: PhaseType) -> Result<(), DependencyError> {
        let blocking = self.blocking_phases(phase);
        if blocking.is_empty() {
            Ok(())
        } else {
            Err(DependencyError { phase, blocking })
        }
    }

    pub fn all_complete(&self) -> bool {
        self.statuses.iter().all(|s| *s == PhaseStatus::Complete)
    }

    pub fn failed_phases(&self) -> Vec<PhaseType> {
        PhaseType::ALL
            .iter()
            .copied()
            .filter(|p| self.status(*p) == PhaseStatus::Failed)
            .collect()
    }

    /// Iterate `(phase, status)` in phase order.
    pub fn iter(&self) -> impl Iterator<Item = (PhaseType, PhaseStatus)> + '_ {
        PhaseType::ALL.iter().map(|p| (*p, self.status(*p)))
    }
}
