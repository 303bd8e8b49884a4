//! Hierarchical requirement trees.
//!
//! A plan's requirements form a forest of three tiers:
//!
//! | Depth | Allowed types                   |
//! |-------|---------------------------------|
//! | 0     | `parent`                        |
//! | 1+    | `sub_process`, `implementation` |
//!
//! `implementation` nodes are leaves, and a child's id is always its
//! parent's id followed by `.` and its 1-based position.

pub mod hierarchy;
pub mod node;
pub mod plan;

pub use hierarchy::{DEFAULT_MAX_DEPTH, Preorder, RequirementHierarchy};
pub use node::{NodeType, RequirementNode};
pub use plan::{LoadedPlan, Plan, compute_plan_hash, plan_slug};
