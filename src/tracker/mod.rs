//! External collaborators consulted by the control loop.
//!
//! Both are synchronous; async callers go through `spawn_blocking`.

pub mod beads;
pub mod git;

pub use beads::BeadsTracker;
pub use git::GitSourceControl;

/// Reports whether a referenced issue is closed.
pub trait IssueTracker: Send + Sync {
    /// Lookup failures count as "not closed".
    fn is_closed(&self, issue_id: &str) -> bool;
}

/// Read-only view of the project's version control.
pub trait SourceControl: Send + Sync {
    /// Full hex id of the HEAD commit, `None` for an unborn branch.
    fn head_revision(&self) -> anyhow::Result<Option<String>>;
}

/// True iff `issues` is non-empty and every one is closed.
pub fn all_issues_closed(tracker: &dyn IssueTracker, issues: &[String]) -> bool {
    !issues.is_empty() && issues.iter().all(|id| tracker.is_closed(id))
}
