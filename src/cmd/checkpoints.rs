//! `plan-review checkpoints`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use plan_review::config::ReviewConfig;
use plan_review::requirements::plan_slug;

pub fn cmd_checkpoints(
    project_dir: &Path,
    plan: Option<&str>,
    checkpoint_dir: Option<&Path>,
) -> Result<()> {
    let config = ReviewConfig::new(project_dir.to_path_buf())?;
    let store = config.checkpoint_store(checkpoint_dir);
    let mut entries = store.list_all().context("Failed to list checkpoints")?;
    if let Some(name) = plan {
        let slug = plan_slug(name);
        entries.retain(|e| e.plan_slug == slug);
    }

    if entries.is_empty() {
        println!("No checkpoints in {}", store.dir().display());
        return Ok(());
    }

    println!("{}", style(format!("Checkpoints in {}", store.dir().display())).bold());
    for entry in entries {
        let file_name = entry
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!(
            "  {}  {}  {}",
            style(entry.saved_at.format("%Y-%m-%d %H:%M:%S")).dim(),
            style(&entry.plan_slug).yellow(),
            file_name
        );
    }
    Ok(())
}
