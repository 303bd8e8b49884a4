//! Issue status via the beads (`bd`) CLI.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

use super::IssueTracker;

pub const DEFAULT_BD_CMD: &str = "bd";

#[derive(Debug, Deserialize)]
struct IssueStatus {
    #[serde(default)]
    status: String,
}

/// Runs `bd show <id> --json` and reads the `status` field.
pub struct BeadsTracker {
    bd_cmd: String,
    project_dir: PathBuf,
}

impl BeadsTracker {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            bd_cmd: DEFAULT_BD_CMD.to_string(),
            project_dir: project_dir.to_path_buf(),
        }
    }

    pub fn with_command(mut self, bd_cmd: impl Into<String>) -> Self {
        self.bd_cmd = bd_cmd.into();
        self
    }
}

/// `bd show --json` prints either one object or a one-element array.
fn parse_status(stdout: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).ok()?;
    let object = match value {
        serde_json::Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    let issue: IssueStatus = serde_json::from_value(object).ok()?;
    Some(issue.status)
}

impl IssueTracker for BeadsTracker {
    fn is_closed(&self, issue_id: &str) -> bool {
        let output = match Command::new(&self.bd_cmd)
            .args(["show", issue_id, "--json"])
            .current_dir(&self.project_dir)
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                warn!(issue_id, error = %e, "Failed to run bd");
                return false;
            }
        };
        if !output.status.success() {
            debug!(issue_id, code = ?output.status.code(), "bd show failed");
            return false;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let closed = parse_status(&stdout).is_some_and(|s| s.eq_ignore_ascii_case("closed"));
        debug!(issue_id, closed, "Checked issue status");
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_object_and_array() {
        assert_eq!(
            parse_status(r#"{"id":"bd-1","status":"closed"}"#).as_deref(),
            Some("closed")
        );
        assert_eq!(
            parse_status(r#"[{"id":"bd-1","status":"open"}]"#).as_deref(),
            Some("open")
        );
        assert!(parse_status("not json").is_none());
    }

    #[test]
    fn test_missing_binary_counts_as_open() {
        let tracker = BeadsTracker::new(Path::new(".")).with_command("definitely-not-bd-xyz");
        assert!(!tracker.is_closed("bd-1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_closed_issue_via_script() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-bd.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nif [ \"$2\" = \"bd-1\" ]; then echo '{\"status\":\"closed\"}'; else echo '{\"status\":\"open\"}'; fi\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let tracker = BeadsTracker::new(dir.path()).with_command(script.to_string_lossy());
        assert!(tracker.is_closed("bd-1"));
        assert!(!tracker.is_closed("bd-2"));
    }
}
