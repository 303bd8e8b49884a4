use anyhow::{Context, Result};
use git2::Repository;
use std::path::{Path, PathBuf};

use super::SourceControl;

/// `git2`-backed source control view.
///
/// `Repository` is not `Sync`, so it is reopened per call.
pub struct GitSourceControl {
    project_dir: PathBuf,
}

impl GitSourceControl {
    pub fn new(project_dir: &Path) -> Result<Self> {
        Repository::discover(project_dir).context("Failed to open git repository")?;
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
        })
    }

    fn open(&self) -> Result<Repository> {
        Repository::discover(&self.project_dir).context("Failed to open git repository")
    }
}

impl SourceControl for GitSourceControl {
    fn head_revision(&self) -> Result<Option<String>> {
        let repo = self.open()?;
        // Unborn branch: no commits yet
        let commit = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
        Ok(commit.map(|c| c.id().to_string()))
    }
}
