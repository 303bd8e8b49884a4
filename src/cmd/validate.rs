//! `plan-review validate`.

use anyhow::Result;
use console::style;
use std::path::Path;

use plan_review::config::ReviewConfig;
use plan_review::requirements::LoadedPlan;

/// Returns 0 for a valid tree and 2 otherwise.
pub fn cmd_validate(project_dir: &Path, plan_path: &Path) -> Result<i32> {
    let config = ReviewConfig::new(project_dir.to_path_buf())?;
    let plan_path = if plan_path.is_absolute() {
        plan_path.to_path_buf()
    } else {
        config.project_dir.join(plan_path)
    };
    let loaded = LoadedPlan::load(&plan_path)?;
    let tree = &loaded.plan.requirements;
    let errors = tree.validate_with_max_depth(config.toml.review.max_depth);

    if errors.is_empty() {
        println!(
            "{} {} is valid ({} nodes)",
            style("✓").green().bold(),
            style(&loaded.plan.name).yellow(),
            tree.len()
        );
        return Ok(0);
    }

    println!(
        "{} {} has {} validation error(s):",
        style("✗").red().bold(),
        style(&loaded.plan.name).yellow(),
        errors.len()
    );
    for error in errors.iter() {
        println!("  - {}", error);
    }
    Ok(2)
}
