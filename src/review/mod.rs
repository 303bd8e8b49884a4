//! Severity-classified structural review of requirement trees.
//!
//! ## Components
//!
//! - [`step`]: The five review steps, in execution order
//! - [`findings`]: Findings, per-step results and the phase × step table
//! - [`analyzer`]: The analysis collaborator and its Claude CLI implementation
//! - [`classify`]: Response parsing and the step-specific severity tables
//! - [`limiter`]: Token bucket shared by in-flight analyzer calls
//! - [`engine`]: Bounded fan-out of one step over a tree

pub mod analyzer;
pub mod classify;
pub mod engine;
pub mod findings;
pub mod limiter;
pub mod step;

pub use analyzer::{AnalysisRequest, Analyzer, AnalyzerConfig, ClaudeAnalyzer};
pub use engine::{EngineConfig, ReviewEngine};
pub use findings::{
    Recommendation, ResultsTable, ReviewFinding, ReviewStepResult, Severity, SeverityCounts,
};
pub use limiter::{LimitPolicy, RateLimiter};
pub use step::ReviewStep;
