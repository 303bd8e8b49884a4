//! Checkpoint persistence for resumable review runs.
//!
//! Checkpoints are immutable snapshots written at phase or batch boundaries:
//!
//! ```text
//! <dir>/review-<plan-slug>-<YYYYMMDDTHHMMSSfffZ>.json
//! ```
//!
//! Writes go to a temp file in the same directory, are fsynced, then renamed
//! into place, so a crash never leaves a half-written checkpoint under a
//! final name. After each save only the newest `retention` checkpoints for
//! the plan are kept.

use chrono::{DateTime, NaiveDateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::autonomy::AutonomyMode;
use crate::errors::CheckpointError;
use crate::phase::PhaseType;
use crate::requirements::plan_slug;
use crate::review::ResultsTable;

/// Default directory, relative to the project root.
pub const DEFAULT_CHECKPOINT_DIR: &str = ".plan-review/checkpoints";

/// Default number of checkpoints kept per plan.
pub const DEFAULT_RETENTION: usize = 5;

const FILE_PREFIX: &str = "review-";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";
const TIMESTAMP_LEN: usize = 19;
const LOCK_FILE: &str = ".checkpoint.lock";

/// Snapshot of orchestration progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub plan_hash: String,
    pub plan_name: String,
    /// Index of the next phase to run.
    pub current_phase_index: usize,
    pub autonomy_mode: AutonomyMode,
    pub completed_results: ResultsTable,
    pub pending_phases: Vec<PhaseType>,
    pub saved_at: DateTime<Utc>,
    /// Serialized as `{secs, nanos}` so the value survives a round trip exactly.
    pub cumulative_duration: Duration,
}

impl Checkpoint {
    /// The phase the run will resume at, if any remain.
    pub fn current_phase(&self) -> Option<PhaseType> {
        PhaseType::from_index(self.current_phase_index)
    }
}

/// A checkpoint file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    pub plan_slug: String,
    pub saved_at: DateTime<Utc>,
}

/// Directory-scoped checkpoint store.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    retention: usize,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CheckpointError + '_ {
        move |source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Persist `checkpoint` atomically and rotate old checkpoints for its plan.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf, CheckpointError> {
        fs::create_dir_all(&self.dir).map_err(Self::io_err(&self.dir))?;

        let lock_path = self.dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(Self::io_err(&lock_path))?;
        lock.lock_exclusive().map_err(Self::io_err(&lock_path))?;

        let result = self.save_locked(checkpoint);
        let _ = FileExt::unlock(&lock);
        result
    }

    fn save_locked(&self, checkpoint: &Checkpoint) -> Result<PathBuf, CheckpointError> {
        let slug = plan_slug(&checkpoint.plan_name);
        let target = self.free_target(&slug, checkpoint.saved_at);
        let json = serde_json::to_string_pretty(checkpoint).map_err(CheckpointError::Serialize)?;

        let tmp = self
            .dir
            .join(format!(".{}{}-{}.json.tmp", FILE_PREFIX, slug, uuid::Uuid::new_v4()));
        {
            let mut file = File::create(&tmp).map_err(Self::io_err(&tmp))?;
            file.write_all(json.as_bytes()).map_err(Self::io_err(&tmp))?;
            file.sync_all().map_err(Self::io_err(&tmp))?;
        }
        if let Err(source) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(CheckpointError::Io {
                path: target,
                source,
            });
        }
        sync_dir(&self.dir);

        info!(path = %target.display(), phase_index = checkpoint.current_phase_index, "Checkpoint saved");
        self.rotate(&slug)?;
        Ok(target)
    }

    /// First unused file name at or after `saved_at`, in millisecond steps.
    fn free_target(&self, slug: &str, saved_at: DateTime<Utc>) -> PathBuf {
        let mut stamp = saved_at;
        loop {
            let candidate = self.dir.join(file_name(slug, stamp));
            if !candidate.exists() {
                return candidate;
            }
            stamp += chrono::Duration::milliseconds(1);
        }
    }

    fn rotate(&self, slug: &str) -> Result<(), CheckpointError> {
        let entries = self.entries_for_slug(slug)?;
        for stale in entries.iter().skip(self.retention) {
            match fs::remove_file(&stale.path) {
                Ok(()) => debug!(path = %stale.path.display(), "Rotated old checkpoint"),
                Err(e) => warn!(path = %stale.path.display(), error = %e, "Failed to remove old checkpoint"),
            }
        }
        Ok(())
    }

    /// Read a checkpoint and check it was written for the plan with `plan_hash`.
    ///
    /// Never modifies or deletes the file.
    pub fn load(&self, path: &Path, plan_hash: &str) -> Result<Checkpoint, CheckpointError> {
        let content = fs::read_to_string(path).map_err(Self::io_err(path))?;
        let checkpoint: Checkpoint =
            serde_json::from_str(&content).map_err(|source| CheckpointError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;
        if checkpoint.plan_hash != plan_hash {
            return Err(CheckpointError::HashMismatch {
                path: path.to_path_buf(),
                expected: plan_hash.to_string(),
                found: checkpoint.plan_hash,
            });
        }
        Ok(checkpoint)
    }

    /// Checkpoints for `plan_name`, newest first.
    pub fn list(&self, plan_name: &str) -> Result<Vec<PathBuf>, CheckpointError> {
        Ok(self
            .entries_for_slug(&plan_slug(plan_name))?
            .into_iter()
            .map(|e| e.path)
            .collect())
    }

    /// Newest checkpoint for `plan_name`.
    pub fn latest(&self, plan_name: &str) -> Result<Option<PathBuf>, CheckpointError> {
        Ok(self.list(plan_name)?.into_iter().next())
    }

    /// Every checkpoint in the directory, newest first.
    pub fn list_all(&self) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        self.scan(&format!("{}*.json", FILE_PREFIX), None)
    }

    fn entries_for_slug(&self, slug: &str) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        self.scan(&format!("{}{}-*.json", FILE_PREFIX, slug), Some(slug))
    }

    fn scan(
        &self,
        file_pattern: &str,
        slug: Option<&str>,
    ) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&self.dir.to_string_lossy()),
            file_pattern
        );
        let paths = glob::glob(&pattern).map_err(|e| CheckpointError::Pattern(e.to_string()))?;

        let mut entries: Vec<CheckpointEntry> = paths
            .filter_map(|p| p.ok())
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?.to_string();
                let (entry_slug, saved_at) = parse_file_name(&name)?;
                if slug.is_some_and(|s| s != entry_slug) {
                    return None;
                }
                Some(CheckpointEntry {
                    path,
                    plan_slug: entry_slug,
                    saved_at,
                })
            })
            .collect();

        entries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at).then_with(|| b.path.cmp(&a.path)));
        Ok(entries)
    }
}

fn file_name(slug: &str, saved_at: DateTime<Utc>) -> String {
    format!(
        "{}{}-{}.json",
        FILE_PREFIX,
        slug,
        saved_at.format(TIMESTAMP_FORMAT)
    )
}

/// Split `review-<slug>-<timestamp>.json` into its slug and timestamp.
fn parse_file_name(name: &str) -> Option<(String, DateTime<Utc>)> {
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(".json")?;
    if stem.len() < TIMESTAMP_LEN + 2 || !stem.is_char_boundary(stem.len() - TIMESTAMP_LEN) {
        return None;
    }
    let (head, stamp) = stem.split_at(stem.len() - TIMESTAMP_LEN);
    let slug = head.strip_suffix('-')?;
    let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    Some((slug.to_string(), naive.and_utc()))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{ReviewFinding, ReviewStep, ReviewStepResult, Severity};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_790_000_000_000 + ms).unwrap()
    }

    fn checkpoint(name: &str, saved_at: DateTime<Utc>) -> Checkpoint {
        let mut results = ResultsTable::new();
        results.insert(ReviewStepResult::from_findings(
            PhaseType::Research,
            ReviewStep::Contracts,
            vec![
                ReviewFinding::new("REQ_000", ReviewStep::Contracts, Severity::Warning, "drift")
                    .with_category("naming_inconsistency"),
            ],
        ));
        Checkpoint {
            plan_hash: "abc123".to_string(),
            plan_name: name.to_string(),
            current_phase_index: 1,
            autonomy_mode: AutonomyMode::Checkpoint,
            completed_results: results,
            pending_phases: PhaseType::ALL[1..].to_vec(),
            saved_at,
            cumulative_duration: Duration::from_millis(12_345),
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), DEFAULT_RETENTION);
        let original = checkpoint("Auth Plan", at(0));

        let path = store.save(&original).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("review-auth-plan-"));
        assert!(name.ends_with(".json"));

        let loaded = store.load(&path, "abc123").unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.current_phase(), Some(PhaseType::Decomposition));
    }

    #[test]
    fn test_round_trip_keeps_sub_millisecond_duration() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), DEFAULT_RETENTION);
        let mut original = checkpoint("p", at(0));
        original.cumulative_duration = Duration::new(3, 456_789_123);

        let path = store.save(&original).unwrap();
        let loaded = store.load(&path, "abc123").unwrap();
        assert_eq!(loaded.cumulative_duration, Duration::new(3, 456_789_123));
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_saved_file_is_pretty_json_with_checkpoint_fields() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), DEFAULT_RETENTION);
        let path = store.save(&checkpoint("p", at(0))).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\n  \"plan_hash\""));
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "autonomy_mode",
                "completed_results",
                "cumulative_duration",
                "current_phase_index",
                "pending_phases",
                "plan_hash",
                "plan_name",
                "saved_at"
            ]
        );
        assert_eq!(value["cumulative_duration"]["secs"], 12);
        assert_eq!(value["cumulative_duration"]["nanos"], 345_000_000);
    }

    #[test]
    fn test_hash_mismatch_rejects_and_keeps_file() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), DEFAULT_RETENTION);
        let path = store.save(&checkpoint("p", at(0))).unwrap();
        let before = fs::read(&path).unwrap();

        let err = store.load(&path, "different").unwrap_err();
        assert!(matches!(err, CheckpointError::HashMismatch { .. }));
        assert!(err.is_corruption());
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), DEFAULT_RETENTION);
        let path = dir.path().join("review-p-20260101T000000000Z.json");
        fs::write(&path, "{ truncated").unwrap();
        let err = store.load(&path, "abc123").unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
        assert!(path.exists());
    }

    #[test]
    fn test_rotation_keeps_five_most_recent() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), DEFAULT_RETENTION);
        let mut saved = Vec::new();
        for i in 0..7 {
            saved.push(store.save(&checkpoint("plan", at(i * 1000))).unwrap());
        }
        let remaining = store.list("plan").unwrap();
        assert_eq!(remaining.len(), 5);
        let expected: Vec<PathBuf> = saved.iter().rev().take(5).cloned().collect();
        assert_eq!(remaining, expected);
        assert!(!saved[0].exists());
        assert!(!saved[1].exists());
    }

    #[test]
    fn test_rotation_is_per_plan() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 2);
        for i in 0..3 {
            store.save(&checkpoint("auth", at(i))).unwrap();
            store.save(&checkpoint("auth-v2", at(i))).unwrap();
        }
        assert_eq!(store.list("auth").unwrap().len(), 2);
        assert_eq!(store.list("auth-v2").unwrap().len(), 2);
        assert_eq!(store.list_all().unwrap().len(), 4);
    }

    #[test]
    fn test_same_timestamp_does_not_overwrite() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), DEFAULT_RETENTION);
        let first = store.save(&checkpoint("p", at(0))).unwrap();
        let second = store.save(&checkpoint("p", at(0))).unwrap();
        assert_ne!(first, second);
        assert_eq!(store.latest("p").unwrap(), Some(second));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), DEFAULT_RETENTION);
        store.save(&checkpoint("p", at(0))).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_latest_on_missing_dir() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("absent"), DEFAULT_RETENTION);
        assert_eq!(store.latest("p").unwrap(), None);
    }

    #[test]
    fn test_parse_file_name() {
        let (slug, stamp) = parse_file_name("review-auth-v2-20260115T093012345Z.json").unwrap();
        assert_eq!(slug, "auth-v2");
        assert_eq!(stamp.format(TIMESTAMP_FORMAT).to_string(), "20260115T093012345Z");
        assert!(parse_file_name("review-auth.json").is_none());
        assert!(parse_file_name("other-auth-20260115T093012345Z.json").is_none());
    }
}
