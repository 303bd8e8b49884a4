//! Integration tests for plan-review
//!
//! These drive the built binary end to end against temporary projects.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a plan-review Command
fn plan_review() -> Command {
    cargo_bin_cmd!("plan-review")
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

const VALID_PLAN: &str = r#"{
    "name": "auth-v2",
    "requirements": [
        {
            "id": "REQ_000",
            "description": "User authentication",
            "type": "parent",
            "children": [
                {
                    "id": "REQ_000.1",
                    "description": "Session handling",
                    "type": "sub-process",
                    "children": [
                        {
                            "id": "REQ_000.1.1",
                            "description": "Persist sessions in the store",
                            "type": "implementation",
                            "acceptanceCriteria": ["sessions survive restart"]
                        }
                    ]
                }
            ]
        }
    ]
}"#;

const INVALID_PLAN: &str = r#"{
    "name": "broken",
    "requirements": [
        {
            "id": "REQ_000",
            "description": "Root",
            "type": "parent",
            "children": [
                { "id": "REQ_000.7", "description": "Misnumbered", "type": "sub-process" }
            ]
        }
    ]
}"#;

fn write_plan(dir: &TempDir, name: &str, body: &str) -> String {
    fs::write(dir.path().join(name), body).unwrap();
    name.to_string()
}

fn checkpoint_files(dir: &Path) -> Vec<String> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("review-") && n.ends_with(".json"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        plan_review()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("review"));
    }

    #[test]
    fn test_version() {
        plan_review().arg("--version").assert().success();
    }

    #[test]
    fn test_review_help_lists_autonomy_flags() {
        plan_review()
            .args(["review", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--mode"))
            .stdout(predicate::str::contains("--resume"))
            .stdout(predicate::str::contains("--all-phases"));
    }

    #[test]
    fn test_step_requires_phase() {
        let dir = create_temp_project();
        let plan = write_plan(&dir, "plan.json", VALID_PLAN);
        plan_review()
            .current_dir(dir.path())
            .args(["review", "--plan", &plan, "--step", "contracts"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Validation
// =============================================================================

mod validation {
    use super::*;

    #[test]
    fn test_validate_valid_plan() {
        let dir = create_temp_project();
        let plan = write_plan(&dir, "plan.json", VALID_PLAN);

        plan_review()
            .current_dir(dir.path())
            .args(["validate", "--plan", &plan])
            .assert()
            .code(0)
            .stdout(predicate::str::contains("auth-v2 is valid (3 nodes)"));
    }

    #[test]
    fn test_validate_invalid_plan() {
        let dir = create_temp_project();
        let plan = write_plan(&dir, "broken.json", INVALID_PLAN);

        plan_review()
            .current_dir(dir.path())
            .args(["validate", "--plan", &plan])
            .assert()
            .code(2)
            .stdout(predicate::str::contains("validation error"));
    }

    #[test]
    fn test_missing_plan_is_fatal() {
        let dir = create_temp_project();

        plan_review()
            .current_dir(dir.path())
            .args(["validate", "--plan", "nope.json"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("Failed to read plan file"));
    }

    #[test]
    fn test_malformed_plan_is_fatal() {
        let dir = create_temp_project();
        let plan = write_plan(&dir, "bad.json", "{ not json");

        plan_review()
            .current_dir(dir.path())
            .args(["validate", "--plan", &plan])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("Failed to parse plan JSON"));
    }

    #[test]
    fn test_review_rejects_invalid_tree() {
        let dir = create_temp_project();
        let plan = write_plan(&dir, "broken.json", INVALID_PLAN);

        plan_review()
            .current_dir(dir.path())
            .env("CLAUDE_CMD", "/definitely/not/claude")
            .args(["review", "--plan", &plan, "--all-phases"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("failed validation"));
    }
}

// =============================================================================
// Checkpoint listing
// =============================================================================

mod checkpoints {
    use super::*;

    #[test]
    fn test_checkpoints_empty() {
        let dir = create_temp_project();

        plan_review()
            .current_dir(dir.path())
            .arg("checkpoints")
            .assert()
            .success()
            .stdout(predicate::str::contains("No checkpoints in"));
    }
}

// =============================================================================
// End-to-end review against a fake analyzer CLI
// =============================================================================

#[cfg(unix)]
mod review_runs {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fake_claude(dir: &TempDir, severity: &str) -> String {
        let path = dir.path().join("fake-claude.sh");
        let body = format!(
            "#!/bin/sh\ncat > /dev/null\necho '{{\"severity\": \"{}\", \"issues\": [], \"recommendation\": \"tighten wording\"}}'\n",
            severity
        );
        fs::write(&path, body).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn run_review(severity: &str, expected_code: i32) -> (TempDir, serde_json::Value) {
        let dir = create_temp_project();
        let plan = write_plan(&dir, "plan.json", VALID_PLAN);
        let claude = fake_claude(&dir, severity);

        plan_review()
            .current_dir(dir.path())
            .env("CLAUDE_CMD", &claude)
            .args(["--yes", "review", "--plan", &plan, "--all-phases", "--output", "report.json"])
            .assert()
            .code(expected_code)
            .stdout(predicate::str::contains("Report written to"));

        let report = fs::read_to_string(dir.path().join("report.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&report).unwrap();
        (dir, value)
    }

    #[test]
    fn test_clean_run_exits_zero() {
        let (dir, report) = run_review("well_defined", 0);
        assert_eq!(report["exit_code"], 0);
        assert_eq!(report["termination"], "all_complete");
        assert_eq!(report["plan_name"], "auth-v2");

        let files = checkpoint_files(&dir.path().join(".plan-review/checkpoints"));
        assert!(!files.is_empty());
        assert!(files.iter().all(|f| f.starts_with("review-auth-v2-")));
    }

    #[test]
    fn test_warning_run_exits_one() {
        let (_dir, report) = run_review("warning", 1);
        assert_eq!(report["exit_code"], 1);
        assert_eq!(report["termination"], "all_complete");
    }

    #[test]
    fn test_critical_run_exits_two() {
        let (_dir, report) = run_review("critical", 2);
        assert_eq!(report["exit_code"], 2);
        assert!(!report["skipped"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_markdown_report_to_stdout() {
        let dir = create_temp_project();
        let plan = write_plan(&dir, "plan.json", VALID_PLAN);
        let claude = fake_claude(&dir, "well_defined");

        plan_review()
            .current_dir(dir.path())
            .env("CLAUDE_CMD", &claude)
            .args(["review", "--plan", &plan, "--phase", "multi-doc", "--step", "contracts"])
            .assert()
            .code(0)
            .stdout(predicate::str::contains("## Summary"));
    }

    #[test]
    fn test_checkpoints_listed_after_run() {
        let (dir, _report) = run_review("well_defined", 0);

        plan_review()
            .current_dir(dir.path())
            .args(["checkpoints", "--plan", "auth-v2"])
            .assert()
            .success()
            .stdout(predicate::str::contains("auth-v2"));
    }

    #[test]
    fn test_resume_missing_checkpoint_is_fatal() {
        let dir = create_temp_project();
        let plan = write_plan(&dir, "plan.json", VALID_PLAN);
        let claude = fake_claude(&dir, "well_defined");

        plan_review()
            .current_dir(dir.path())
            .env("CLAUDE_CMD", &claude)
            .args(["review", "--plan", &plan, "--resume", "latest"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("No checkpoint found"));
    }
}
