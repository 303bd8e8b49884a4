//! On-disk plan documents.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use super::hierarchy::RequirementHierarchy;

/// A machine-generated implementation plan: a name, the issue ids it
/// references and the requirement forest under review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub issues: Vec<String>,
    pub requirements: RequirementHierarchy,
}

/// A plan together with the identity of the bytes it was parsed from.
#[derive(Debug, Clone)]
pub struct LoadedPlan {
    pub plan: Plan,
    /// Hex SHA-256 of the raw plan file.
    pub hash: String,
    pub path: PathBuf,
}

impl LoadedPlan {
    /// Read and parse a plan file. A missing `name` falls back to the file stem.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;

        let mut plan: Plan = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse plan JSON: {}", path.display()))?;

        if plan.name.trim().is_empty() {
            plan.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "plan".to_string());
        }

        Ok(Self {
            plan,
            hash: compute_plan_hash(&bytes),
            path: path.to_path_buf(),
        })
    }

    /// Hash the plan file as it is on disk right now.
    pub fn current_hash(&self) -> Result<String> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read plan file: {}", self.path.display()))?;
        Ok(compute_plan_hash(&bytes))
    }
}

impl Plan {
    /// File-name-safe identifier used in checkpoint names.
    pub fn slug(&self) -> String {
        plan_slug(&self.name)
    }
}

/// Full hex SHA-256 of the given bytes.
pub fn compute_plan_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Lowercase ASCII alphanumerics, everything else collapsed to single dashes.
pub fn plan_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "plan".to_string()
    } else {
        trimmed.to_string()
    }
}
