//! Configuration for review runs, read from `.plan-review/review.toml`.
//!
//! Settings are layered: file → environment → CLI flags. Every key is
//! optional; a missing file means defaults throughout.
//!
//! ```toml
//! [claude]
//! cmd = "claude"
//! model = "sonnet"
//! output_format = "json"
//! timeout_secs = 3600
//! retries = 2
//! skip_permissions = false
//!
//! [review]
//! concurrency = 4
//! rate_per_sec = 0      # 0 disables rate limiting
//! burst = 4
//! limit_policy = "block"
//! max_depth = 10
//!
//! [autonomy]
//! mode = "checkpoint"
//! stop_on_critical = false
//! max_iterations = 100
//! run_timeout_secs = 3600
//!
//! [checkpoints]
//! dir = ".plan-review/checkpoints"
//! retention = 5
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::autonomy::{AutonomyMode, ControllerConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_RUN_TIMEOUT_SECS};
use crate::checkpoint::{CheckpointStore, DEFAULT_CHECKPOINT_DIR, DEFAULT_RETENTION};
use crate::requirements::DEFAULT_MAX_DEPTH;
use crate::review::analyzer::{DEFAULT_CLAUDE_CMD, DEFAULT_MODEL, DEFAULT_OUTPUT_FORMAT, DEFAULT_RETRIES};
use crate::review::engine::{DEFAULT_ANALYSIS_TIMEOUT_SECS, DEFAULT_CONCURRENCY};
use crate::review::{AnalyzerConfig, EngineConfig, LimitPolicy, RateLimiter};

/// Directory holding config, checkpoints and logs, relative to the project.
pub const CONFIG_DIR: &str = ".plan-review";

pub const CONFIG_FILE: &str = "review.toml";

/// Claude CLI invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// Per-call analysis deadline
    #[serde(default = "default_analysis_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub skip_permissions: bool,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_output_format() -> String {
    DEFAULT_OUTPUT_FORMAT.to_string()
}

fn default_analysis_timeout_secs() -> u64 {
    DEFAULT_ANALYSIS_TIMEOUT_SECS
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

impl Default for ClaudeSection {
    fn default() -> Self {
        Self {
            cmd: None,
            model: default_model(),
            output_format: default_output_format(),
            timeout_secs: default_analysis_timeout_secs(),
            retries: default_retries(),
            skip_permissions: false,
        }
    }
}

/// Fan-out and traversal limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSection {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub rate_per_sec: u64,
    #[serde(default = "default_burst")]
    pub burst: u64,
    #[serde(default)]
    pub limit_policy: LimitPolicy,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_burst() -> u64 {
    DEFAULT_CONCURRENCY as u64
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for ReviewSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            rate_per_sec: 0,
            burst: default_burst(),
            limit_policy: LimitPolicy::default(),
            max_depth: default_max_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomySection {
    #[serde(default)]
    pub mode: AutonomyMode,
    #[serde(default)]
    pub stop_on_critical: bool,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_run_timeout_secs() -> u64 {
    DEFAULT_RUN_TIMEOUT_SECS
}

impl Default for AutonomySection {
    fn default() -> Self {
        Self {
            mode: AutonomyMode::default(),
            stop_on_critical: false,
            max_iterations: default_max_iterations(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointsSection {
    /// Relative paths resolve against the project directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_retention")]
    pub retention: usize,
}

fn default_retention() -> usize {
    DEFAULT_RETENTION
}

impl Default for CheckpointsSection {
    fn default() -> Self {
        Self {
            dir: None,
            retention: default_retention(),
        }
    }
}

/// The complete review.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewToml {
    #[serde(default)]
    pub claude: ClaudeSection,
    #[serde(default)]
    pub review: ReviewSection,
    #[serde(default)]
    pub autonomy: AutonomySection,
    #[serde(default)]
    pub checkpoints: CheckpointsSection,
}

impl ReviewToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse review.toml")
    }

    /// Defaults when `<config_dir>/review.toml` does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize review.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Values that parse but will not behave as intended.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.review.concurrency == 0 {
            warnings.push("review.concurrency is 0; using 1".to_string());
        }
        if self.review.rate_per_sec > 0 && self.review.burst == 0 {
            warnings.push("review.burst is 0 with rate limiting enabled; using 1".to_string());
        }
        if self.checkpoints.retention == 0 {
            warnings.push("checkpoints.retention is 0; keeping 1".to_string());
        }
        if self.autonomy.max_iterations == 0 {
            warnings.push("autonomy.max_iterations is 0; no step will run".to_string());
        }
        if self.claude.output_format != "json" && self.claude.output_format != "text" {
            warnings.push(format!(
                "claude.output_format '{}' is not 'json' or 'text'",
                self.claude.output_format
            ));
        }
        warnings
    }
}

/// Resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: ReviewToml,
    pub verbose: bool,
    /// Auto-approve suspensions without Critical findings
    pub yes: bool,
}

impl ReviewConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let toml = ReviewToml::load_or_default(&config_dir)?;
        Ok(Self {
            project_dir,
            config_dir,
            toml,
            verbose: false,
            yes: false,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, verbose: bool, yes: bool) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.yes = yes;
        Ok(config)
    }

    /// Claude command (env → file → default).
    pub fn claude_cmd(&self) -> String {
        std::env::var("CLAUDE_CMD")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.toml.claude.cmd.clone())
            .unwrap_or_else(|| DEFAULT_CLAUDE_CMD.to_string())
    }

    /// Model name (env → file).
    pub fn model(&self) -> String {
        std::env::var("PLAN_REVIEW_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.toml.claude.model.clone())
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig::default()
            .with_claude_cmd(&self.claude_cmd())
            .with_model(&self.model())
            .with_output_format(&self.toml.claude.output_format)
            .with_retries(self.toml.claude.retries)
            .with_skip_permissions(self.toml.claude.skip_permissions)
            .with_working_dir(self.project_dir.clone())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_concurrency(self.toml.review.concurrency)
            .with_analysis_timeout(Duration::from_secs(self.toml.claude.timeout_secs))
            .with_max_depth(self.toml.review.max_depth)
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        let review = &self.toml.review;
        if review.rate_per_sec == 0 {
            RateLimiter::unlimited()
        } else {
            RateLimiter::new(review.rate_per_sec, review.burst.max(1), review.limit_policy)
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let autonomy = &self.toml.autonomy;
        ControllerConfig::default()
            .with_mode(autonomy.mode)
            .with_stop_on_critical(autonomy.stop_on_critical)
            .with_max_iterations(autonomy.max_iterations)
            .with_run_timeout(Duration::from_secs(autonomy.run_timeout_secs))
    }

    /// Checkpoint directory; `cli_dir` wins over the file setting.
    pub fn checkpoint_dir(&self, cli_dir: Option<&Path>) -> PathBuf {
        let dir = cli_dir
            .map(Path::to_path_buf)
            .or_else(|| self.toml.checkpoints.dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_DIR));
        if dir.is_absolute() {
            dir
        } else {
            self.project_dir.join(dir)
        }
    }

    pub fn checkpoint_store(&self, cli_dir: Option<&Path>) -> CheckpointStore {
        CheckpointStore::new(self.checkpoint_dir(cli_dir), self.toml.checkpoints.retention)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    // =========================================
    // Parsing tests
    // =========================================

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempdir().unwrap();
        let toml = ReviewToml::load_or_default(&dir.path().join(CONFIG_DIR)).unwrap();
        assert_eq!(toml.claude.model, "sonnet");
        assert_eq!(toml.claude.retries, 2);
        assert_eq!(toml.review.concurrency, 4);
        assert_eq!(toml.review.rate_per_sec, 0);
        assert_eq!(toml.review.max_depth, 10);
        assert_eq!(toml.autonomy.mode, AutonomyMode::Checkpoint);
        assert_eq!(toml.autonomy.max_iterations, 100);
        assert_eq!(toml.autonomy.run_timeout_secs, 3600);
        assert_eq!(toml.checkpoints.retention, 5);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_sections() {
        let content = r#"
[review]
concurrency = 8
rate_per_sec = 2
limit_policy = "reject"

[autonomy]
mode = "fully_autonomous"
stop_on_critical = true
"#;
        let toml = ReviewToml::parse(content).unwrap();
        assert_eq!(toml.review.concurrency, 8);
        assert_eq!(toml.review.limit_policy, LimitPolicy::Reject);
        assert_eq!(toml.review.burst, 4);
        assert_eq!(toml.autonomy.mode, AutonomyMode::FullyAutonomous);
        assert!(toml.autonomy.stop_on_critical);
        assert_eq!(toml.checkpoints.retention, 5);
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        let err = ReviewToml::parse("[autonomy]\nmode = \"yolo\"\n").unwrap_err();
        assert!(err.to_string().contains("review.toml"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = ReviewToml::default();
        toml.autonomy.mode = AutonomyMode::Batch;
        toml.checkpoints.retention = 3;
        toml.save(&path).unwrap();

        let loaded = ReviewToml::load(&path).unwrap();
        assert_eq!(loaded.autonomy.mode, AutonomyMode::Batch);
        assert_eq!(loaded.checkpoints.retention, 3);
    }

    #[test]
    fn test_validate_reports_suspicious_values() {
        let mut toml = ReviewToml::default();
        toml.review.concurrency = 0;
        toml.checkpoints.retention = 0;
        toml.claude.output_format = "yaml".into();
        assert_eq!(toml.validate().len(), 3);
    }

    // =========================================
    // Resolution tests
    // =========================================

    fn project_with(content: Option<&str>) -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        if let Some(content) = content {
            let config_dir = dir.path().join(CONFIG_DIR);
            std::fs::create_dir_all(&config_dir).unwrap();
            std::fs::write(config_dir.join(CONFIG_FILE), content).unwrap();
        }
        dir
    }

    #[test]
    fn test_claude_cmd_env_overrides_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = std::env::var("CLAUDE_CMD").ok();
        unsafe { std::env::remove_var("CLAUDE_CMD") };

        let dir = project_with(Some("[claude]\ncmd = \"file-claude\"\n"));
        let config = ReviewConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.claude_cmd(), "file-claude");

        unsafe { std::env::set_var("CLAUDE_CMD", "env-claude") };
        assert_eq!(config.claude_cmd(), "env-claude");

        unsafe { std::env::remove_var("CLAUDE_CMD") };
        if let Some(val) = saved {
            unsafe { std::env::set_var("CLAUDE_CMD", val) };
        }
    }

    #[test]
    fn test_model_env_override() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = std::env::var("PLAN_REVIEW_MODEL").ok();
        unsafe { std::env::remove_var("PLAN_REVIEW_MODEL") };

        let dir = project_with(Some("[claude]\nmodel = \"opus\"\n"));
        let config = ReviewConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.model(), "opus");
        unsafe { std::env::set_var("PLAN_REVIEW_MODEL", "haiku") };
        assert_eq!(config.analyzer_config().model, "haiku");

        unsafe { std::env::remove_var("PLAN_REVIEW_MODEL") };
        if let Some(val) = saved {
            unsafe { std::env::set_var("PLAN_REVIEW_MODEL", val) };
        }
    }

    #[test]
    fn test_checkpoint_dir_resolution() {
        let dir = project_with(Some("[checkpoints]\ndir = \"state/cp\"\n"));
        let config = ReviewConfig::new(dir.path().to_path_buf()).unwrap();
        let root = dir.path().canonicalize().unwrap();

        assert_eq!(config.checkpoint_dir(None), root.join("state/cp"));
        assert_eq!(
            config.checkpoint_dir(Some(Path::new("elsewhere"))),
            root.join("elsewhere")
        );
        let absolute = root.join("abs");
        assert_eq!(config.checkpoint_dir(Some(&absolute)), absolute);
    }

    #[test]
    fn test_default_checkpoint_and_log_dirs() {
        let dir = project_with(None);
        let config = ReviewConfig::new(dir.path().to_path_buf()).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(
            config.checkpoint_dir(None),
            root.join(".plan-review/checkpoints")
        );
        assert_eq!(config.log_dir(), root.join(".plan-review/logs"));
    }

    #[test]
    fn test_derived_configs() {
        let dir = project_with(Some(
            "[review]\nconcurrency = 2\nrate_per_sec = 5\nburst = 0\n\n[autonomy]\nmax_iterations = 12\n",
        ));
        let config = ReviewConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.engine_config().concurrency, 2);
        assert!(config.rate_limiter().is_enabled());
        assert_eq!(config.controller_config().max_iterations, 12);
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn test_missing_project_dir_fails() {
        let dir = tempdir().unwrap();
        assert!(ReviewConfig::new(dir.path().join("nope")).is_err());
    }
}
