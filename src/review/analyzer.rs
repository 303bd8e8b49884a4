//! The analysis collaborator: one call per requirement node per step.
//!
//! The engine only sees the [`Analyzer`] trait. [`ClaudeAnalyzer`] is the
//! production implementation; it shells out to the Claude CLI in print mode
//! with the prompt on stdin.
//!
//! ## Usage
//!
//! ```no_run
//! use plan_review::review::analyzer::{AnalysisRequest, Analyzer, AnalyzerConfig, ClaudeAnalyzer};
//! use plan_review::review::ReviewStep;
//! use plan_review::phase::PhaseType;
//! use plan_review::requirements::RequirementNode;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let analyzer = ClaudeAnalyzer::new(AnalyzerConfig::default().with_model("sonnet"));
//! let node = RequirementNode::parent("REQ_000", "User login");
//! let request = AnalysisRequest::for_node("auth", PhaseType::Research, ReviewStep::Contracts, &node);
//! let raw = analyzer
//!     .analyze(&request, Duration::from_secs(600), &CancellationToken::new())
//!     .await?;
//! println!("{}", raw);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::classify::{critical_categories, parse_response, warning_categories};
use super::step::ReviewStep;
use crate::errors::AnalysisError;
use crate::phase::PhaseType;
use crate::requirements::{NodeType, RequirementNode};
use crate::util::truncate_chars;

/// Default Claude command.
pub const DEFAULT_CLAUDE_CMD: &str = "claude";

/// Default model passed to `--model`.
pub const DEFAULT_MODEL: &str = "sonnet";

/// Default value for `--output-format`.
pub const DEFAULT_OUTPUT_FORMAT: &str = "json";

/// Default number of retries after the first failed attempt.
pub const DEFAULT_RETRIES: u32 = 2;

/// Everything the analyzer needs to evaluate one node against one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub plan_name: String,
    pub phase: PhaseType,
    pub step: ReviewStep,
    pub node_id: String,
    pub node_type: NodeType,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub testable_properties: Vec<String>,
}

impl AnalysisRequest {
    pub fn for_node(
        plan_name: &str,
        phase: PhaseType,
        step: ReviewStep,
        node: &RequirementNode,
    ) -> Self {
        Self {
            plan_name: plan_name.to_string(),
            phase,
            step,
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            description: node.description.clone(),
            acceptance_criteria: node.acceptance_criteria.clone(),
            testable_properties: node.testable_properties.clone(),
        }
    }
}

/// Analysis capability consumed by the review engine.
///
/// Implementations return the raw response text; classification happens in
/// the engine so it can be exercised without a real collaborator.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        request: &AnalysisRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, AnalysisError>;
}

/// Configuration for [`ClaudeAnalyzer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Claude CLI command (default: "claude").
    pub claude_cmd: String,
    pub model: String,
    pub output_format: String,
    /// Retries after the first failed attempt.
    pub retries: u32,
    /// Base delay between retries; doubles each time.
    pub retry_backoff: Duration,
    /// Skip permission prompts in Claude.
    pub skip_permissions: bool,
    pub working_dir: Option<PathBuf>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            claude_cmd: DEFAULT_CLAUDE_CMD.to_string(),
            model: DEFAULT_MODEL.to_string(),
            output_format: DEFAULT_OUTPUT_FORMAT.to_string(),
            retries: DEFAULT_RETRIES,
            retry_backoff: Duration::from_secs(2),
            skip_permissions: false,
            working_dir: None,
        }
    }
}

impl AnalyzerConfig {
    pub fn with_claude_cmd(mut self, cmd: &str) -> Self {
        self.claude_cmd = cmd.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_output_format(mut self, format: &str) -> Self {
        self.output_format = format.to_string();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_skip_permissions(mut self, skip: bool) -> Self {
        self.skip_permissions = skip;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }
}

/// Analyzer backed by the Claude CLI.
pub struct ClaudeAnalyzer {
    config: AnalyzerConfig,
}

impl ClaudeAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// One CLI invocation. The child is killed if this future is dropped.
    async fn run_once(&self, prompt: &str, timeout: Duration) -> Result<String, AnalysisError> {
        let mut cmd = Command::new(&self.config.claude_cmd);
        cmd.arg("--print")
            .arg("--model")
            .arg(&self.config.model)
            .arg("--output-format")
            .arg(&self.config.output_format);

        if self.config.skip_permissions {
            cmd.arg("--dangerously-skip-permissions");
        }

        if let Some(ref working_dir) = self.config.working_dir {
            cmd.current_dir(working_dir);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(AnalysisError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(AnalysisError::Io)?;
            stdin.shutdown().await.map_err(AnalysisError::Io)?;
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| AnalysisError::Timeout { after: timeout })?
            .map_err(AnalysisError::Io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnalysisError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr: truncate_chars(stderr.trim(), 500),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        // Surface unparsable output here so it counts against the retry budget.
        parse_response(&stdout)?;
        Ok(stdout)
    }
}

#[async_trait]
impl Analyzer for ClaudeAnalyzer {
    async fn analyze(
        &self,
        request: &AnalysisRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, AnalysisError> {
        let prompt = build_analysis_prompt(request);
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 0u32;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
                result = self.run_once(&prompt, timeout) => result,
            };

            match result {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempt < self.config.retries => {
                    attempt += 1;
                    tracing::warn!(
                        node_id = %request.node_id,
                        step = %request.step,
                        attempt,
                        error = %e,
                        "Analysis attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        "- (none given)".to_string()
    } else {
        items
            .iter()
            .map(|item| format!("- {}", item))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Build the prompt for one node and step.
pub fn build_analysis_prompt(request: &AnalysisRequest) -> String {
    let step = request.step;
    let critical = critical_categories(step).join(", ");
    let warning = warning_categories(step).join(", ");

    format!(
        r#"You are reviewing an implementation plan ("{plan}") before it is handed to an autonomous coding agent.

## Review step: {step}
Phase: {phase}
Focus: {focus}

## Requirement {id} ({node_type})
{description}

### Acceptance criteria
{criteria}

### Testable properties
{properties}

## Instructions
Evaluate ONLY this requirement against the {step} step. Report each problem as an issue with one of these categories:
- Blocking: {critical}
- Non-blocking: {warning}

Respond with a single JSON object and nothing else:

```json
{{
  "severity": "well_defined" | "warning" | "critical",
  "issues": [{{"category": "<category>", "detail": "<what is wrong>"}}],
  "recommendation": "<one concrete fix, empty when well defined>"
}}
```
"#,
        plan = request.plan_name,
        step = step,
        phase = request.phase,
        focus = step.focus(),
        id = request.node_id,
        node_type = request.node_type,
        description = request.description,
        criteria = bullet_list(&request.acceptance_criteria),
        properties = bullet_list(&request.testable_properties),
        critical = critical,
        warning = warning,
    )
}
