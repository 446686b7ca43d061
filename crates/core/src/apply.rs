use crate::planner::{RenamePair, RenamePlan};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const PARK_PREFIX: &str = ".renamer_tmp_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    DryRun,
    /// Mutating; the caller obtained confirmation.
    Confirmed,
    /// Mutating; no confirmation was required.
    Unconfirmed,
}

impl ExecutionMode {
    pub fn is_dry_run(self) -> bool {
        matches!(self, ExecutionMode::DryRun)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    DryRun,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PairOutcome {
    WouldRename,
    Renamed,
    /// Source and target are the same path.
    Skipped,
    Failed {
        reason: String,
    },
    NotAttempted {
        /// Where the source currently lives if it was moved aside to free a target.
        parked_at: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub source: PathBuf,
    pub target: PathBuf,
    #[serde(flatten)]
    pub outcome: PairOutcome,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("source no longer exists: {}", .path.display())]
    SourceVanished { path: PathBuf },
    #[error("target already exists and is not part of this batch: {}", .path.display())]
    TargetOccupied { path: PathBuf },
    #[error("failed to move {} aside to {}: {source}", .from.display(), .to.display())]
    Park {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
    #[error("failed to rename {} -> {}: {source}", .from.display(), .to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

#[derive(Debug, Serialize)]
pub struct ExecutionReport {
    pub mode: ExecutionMode,
    pub status: ExecutionStatus,
    pub entries: Vec<ReportEntry>,
    /// Position in `entries` of the pair that stopped the run.
    pub failed_at: Option<usize>,
    #[serde(skip)]
    pub error: Option<ExecutionError>,
}

impl ExecutionReport {
    fn count(&self, pred: impl Fn(&PairOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }

    pub fn renamed(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Renamed))
    }

    pub fn would_rename(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::WouldRename))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::Skipped))
    }

    pub fn not_attempted(&self) -> usize {
        self.count(|o| matches!(o, PairOutcome::NotAttempted { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.status != ExecutionStatus::Aborted
    }

    /// Renames applied before an abort are not rolled back.
    pub fn applied_renames_are_permanent(&self) -> bool {
        self.status == ExecutionStatus::Aborted && self.renamed() > 0
    }
}

/// Applies (or, in dry-run, lists) a validated plan in plan order, stopping
/// at the first failure. Never overwrites: a target still held by a pending
/// source is parked under a temporary name first.
pub fn execute(plan: &RenamePlan, mode: ExecutionMode) -> ExecutionReport {
    if mode.is_dry_run() {
        let entries = plan
            .pairs
            .iter()
            .map(|pair| entry(pair, planned_outcome(pair, PairOutcome::WouldRename)))
            .collect();
        return ExecutionReport {
            mode,
            status: ExecutionStatus::DryRun,
            entries,
            failed_at: None,
            error: None,
        };
    }

    let mut pending: HashMap<PathBuf, usize> = plan
        .pairs
        .iter()
        .enumerate()
        .filter(|(_, pair)| !pair.is_noop())
        .map(|(position, pair)| (pair.source.clone(), position))
        .collect();
    let mut parked = HashMap::<usize, PathBuf>::new();
    let mut entries = Vec::with_capacity(plan.pairs.len());

    for (position, pair) in plan.pairs.iter().enumerate() {
        if pair.is_noop() {
            entries.push(entry(pair, PairOutcome::Skipped));
            continue;
        }
        pending.remove(&pair.source);

        let current = parked
            .remove(&position)
            .unwrap_or_else(|| pair.source.clone());
        if let Err(err) = rename_one(&current, pair, position, &mut pending, &mut parked) {
            tracing::warn!(
                source = %pair.source.display(),
                target = %pair.target.display(),
                error = %err,
                "rename batch aborted"
            );
            entries.push(entry(
                pair,
                PairOutcome::Failed {
                    reason: err.to_string(),
                },
            ));
            // The failing pair may itself have been parked; keep that visible.
            if current != pair.source {
                parked.insert(position, current);
            }
            for (rest_position, rest) in plan.pairs.iter().enumerate().skip(position + 1) {
                entries.push(entry(
                    rest,
                    PairOutcome::NotAttempted {
                        parked_at: parked.get(&rest_position).cloned(),
                    },
                ));
            }
            return ExecutionReport {
                mode,
                status: ExecutionStatus::Aborted,
                entries,
                failed_at: Some(position),
                error: Some(err),
            };
        }

        tracing::debug!(
            source = %pair.source.display(),
            target = %pair.target.display(),
            "renamed"
        );
        entries.push(entry(pair, PairOutcome::Renamed));
    }

    let report = ExecutionReport {
        mode,
        status: ExecutionStatus::Completed,
        entries,
        failed_at: None,
        error: None,
    };
    tracing::info!(
        renamed = report.renamed(),
        skipped = report.skipped(),
        "rename batch completed"
    );
    report
}

fn rename_one(
    current: &Path,
    pair: &RenamePair,
    position: usize,
    pending: &mut HashMap<PathBuf, usize>,
    parked: &mut HashMap<usize, PathBuf>,
) -> Result<(), ExecutionError> {
    if !exists(current) {
        return Err(ExecutionError::SourceVanished {
            path: pair.source.clone(),
        });
    }

    if exists(&pair.target) {
        let Some(owner) = pending.remove(&pair.target) else {
            return Err(ExecutionError::TargetOccupied {
                path: pair.target.clone(),
            });
        };
        let park_path = park_path_for(&pair.target, owner);
        fs::rename(&pair.target, &park_path).map_err(|source| ExecutionError::Park {
            from: pair.target.clone(),
            to: park_path.clone(),
            source,
        })?;
        tracing::debug!(
            path = %pair.target.display(),
            parked_at = %park_path.display(),
            freed_for = position,
            "moved pending source aside"
        );
        parked.insert(owner, park_path);
    }

    fs::rename(current, &pair.target).map_err(|source| ExecutionError::Rename {
        from: current.to_path_buf(),
        to: pair.target.clone(),
        source,
    })
}

fn planned_outcome(pair: &RenamePair, outcome: PairOutcome) -> PairOutcome {
    if pair.is_noop() {
        PairOutcome::Skipped
    } else {
        outcome
    }
}

fn entry(pair: &RenamePair, outcome: PairOutcome) -> ReportEntry {
    ReportEntry {
        source: pair.source.clone(),
        target: pair.target.clone(),
        outcome,
    }
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// A free hidden name next to `path` for the pair at `owner`. Anything
/// already there, including another run's leftovers, bumps the counter.
fn park_path_for(path: &Path, owner: usize) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().unwrap_or_else(|| OsStr::new("file"));
    let stem = format!("{PARK_PREFIX}{}_{owner}", std::process::id());

    let mut n = 0usize;
    loop {
        let mut name = if n == 0 {
            OsString::from(format!("{stem}_"))
        } else {
            OsString::from(format!("{stem}_{n:03}_"))
        };
        name.push(file_name);
        let candidate = parent.join(name);
        if !exists(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::RenameStats;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::tempdir;

    fn plan(dir: &Path, pairs: &[(&str, &str)]) -> RenamePlan {
        RenamePlan {
            template: "{name}".to_string(),
            run_date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
            pairs: pairs
                .iter()
                .enumerate()
                .map(|(i, (from, to))| RenamePair {
                    index: i + 1,
                    source: dir.join(from),
                    target: dir.join(to),
                })
                .collect(),
            stats: RenameStats::default(),
        }
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read dir")
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn dry_run_lists_pairs_without_touching_files() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), b"a").expect("write a");
        fs::write(temp.path().join("same.txt"), b"s").expect("write same");

        let report = execute(
            &plan(temp.path(), &[("a.txt", "b.txt"), ("same.txt", "same.txt")]),
            ExecutionMode::DryRun,
        );

        assert_eq!(report.status, ExecutionStatus::DryRun);
        assert_eq!(report.would_rename(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(listing(temp.path()), vec!["a.txt", "same.txt"]);
    }

    #[test]
    fn renames_in_order_and_skips_noops() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), b"A").expect("write a");
        fs::write(temp.path().join("keep.txt"), b"K").expect("write keep");

        let report = execute(
            &plan(temp.path(), &[("a.txt", "x_01.txt"), ("keep.txt", "keep.txt")]),
            ExecutionMode::Unconfirmed,
        );

        assert_eq!(report.status, ExecutionStatus::Completed);
        assert_eq!(report.renamed(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(listing(temp.path()), vec!["keep.txt", "x_01.txt"]);
        assert_eq!(
            fs::read(temp.path().join("x_01.txt")).expect("read renamed"),
            b"A"
        );
    }

    #[test]
    fn swap_parks_pending_source_instead_of_overwriting() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), b"A").expect("write a");
        fs::write(temp.path().join("b.txt"), b"B").expect("write b");

        let report = execute(
            &plan(temp.path(), &[("a.txt", "b.txt"), ("b.txt", "a.txt")]),
            ExecutionMode::Confirmed,
        );

        assert_eq!(report.status, ExecutionStatus::Completed);
        assert_eq!(report.renamed(), 2);
        assert_eq!(listing(temp.path()), vec!["a.txt", "b.txt"]);
        assert_eq!(fs::read(temp.path().join("a.txt")).expect("read a"), b"B");
        assert_eq!(fs::read(temp.path().join("b.txt")).expect("read b"), b"A");
    }

    #[test]
    fn swap_never_parks_over_an_existing_file() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), b"A").expect("write a");
        fs::write(temp.path().join("b.txt"), b"B").expect("write b");
        // b.txt is owned by the second pair, so that is where it would park.
        let decoy = park_path_for(&temp.path().join("b.txt"), 1);
        fs::write(&decoy, b"decoy").expect("write decoy");

        let report = execute(
            &plan(temp.path(), &[("a.txt", "b.txt"), ("b.txt", "a.txt")]),
            ExecutionMode::Confirmed,
        );

        assert!(report.is_success());
        assert_eq!(fs::read(&decoy).expect("read decoy"), b"decoy");
        assert_eq!(fs::read(temp.path().join("a.txt")).expect("read a"), b"B");
        assert_eq!(fs::read(temp.path().join("b.txt")).expect("read b"), b"A");
    }

    #[test]
    fn park_path_adds_incremental_suffix() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("b.txt");
        let first = park_path_for(&target, 4);
        assert_eq!(first.parent(), Some(temp.path()));
        fs::write(&first, b"x").expect("create first");

        let second = park_path_for(&target, 4);
        fs::write(&second, b"x").expect("create second");
        let third = park_path_for(&target, 4);

        let name = |p: &Path| p.file_name().and_then(|v| v.to_str()).unwrap_or("").to_string();
        assert!(name(&first).starts_with(PARK_PREFIX) && name(&first).ends_with("_4_b.txt"));
        assert!(name(&second).ends_with("_4_001_b.txt"));
        assert!(name(&third).ends_with("_4_002_b.txt"));
    }

    #[test]
    fn chain_renames_preserve_contents() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("1.txt"), b"one").expect("write 1");
        fs::write(temp.path().join("2.txt"), b"two").expect("write 2");

        let report = execute(
            &plan(temp.path(), &[("1.txt", "2.txt"), ("2.txt", "3.txt")]),
            ExecutionMode::Unconfirmed,
        );

        assert!(report.is_success());
        assert_eq!(listing(temp.path()), vec!["2.txt", "3.txt"]);
        assert_eq!(fs::read(temp.path().join("2.txt")).expect("read 2"), b"one");
        assert_eq!(fs::read(temp.path().join("3.txt")).expect("read 3"), b"two");
    }

    #[test]
    fn vanished_source_aborts_and_reports_remaining_pairs() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), b"A").expect("write a");
        fs::write(temp.path().join("c.txt"), b"C").expect("write c");

        let report = execute(
            &plan(
                temp.path(),
                &[("a.txt", "p_01.txt"), ("b.txt", "p_02.txt"), ("c.txt", "p_03.txt")],
            ),
            ExecutionMode::Unconfirmed,
        );

        assert_eq!(report.status, ExecutionStatus::Aborted);
        assert_eq!(report.failed_at, Some(1));
        assert_eq!(report.renamed(), 1);
        assert_eq!(report.not_attempted(), 1);
        assert!(report.applied_renames_are_permanent());
        assert!(matches!(
            report.error,
            Some(ExecutionError::SourceVanished { .. })
        ));
        assert!(matches!(
            report.entries[2].outcome,
            PairOutcome::NotAttempted { parked_at: None }
        ));
        assert_eq!(listing(temp.path()), vec!["c.txt", "p_01.txt"]);
    }

    #[test]
    fn target_created_after_planning_is_never_overwritten() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), b"A").expect("write a");
        fs::write(temp.path().join("late.txt"), b"L").expect("write late");

        let report = execute(
            &plan(temp.path(), &[("a.txt", "late.txt")]),
            ExecutionMode::Unconfirmed,
        );

        assert_eq!(report.status, ExecutionStatus::Aborted);
        assert!(matches!(
            report.error,
            Some(ExecutionError::TargetOccupied { .. })
        ));
        assert_eq!(fs::read(temp.path().join("late.txt")).expect("read late"), b"L");
        assert!(temp.path().join("a.txt").exists());
        assert!(!report.applied_renames_are_permanent());
    }

    #[test]
    fn abort_reports_where_parked_sources_are() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("a.txt"), b"A").expect("write a");
        fs::write(temp.path().join("b.txt"), b"B").expect("write b");

        // a -> b parks b, then the middle pair fails, so b stays parked.
        let report = execute(
            &plan(
                temp.path(),
                &[("a.txt", "b.txt"), ("gone.txt", "x.txt"), ("b.txt", "c.txt")],
            ),
            ExecutionMode::Unconfirmed,
        );

        assert_eq!(report.status, ExecutionStatus::Aborted);
        let PairOutcome::NotAttempted {
            parked_at: Some(parked),
        } = &report.entries[2].outcome
        else {
            panic!("expected parked source, got {:?}", report.entries[2].outcome);
        };
        assert!(parked
            .file_name()
            .map(|n| n.to_string_lossy().starts_with(PARK_PREFIX))
            .unwrap_or(false));
        assert_eq!(fs::read(parked).expect("read parked"), b"B");
    }
}
