use crate::planner::RenamePlan;
use crate::scanner::DirectorySnapshot;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Collision {
    /// Several plan entries resolve to the same target.
    Internal {
        target: PathBuf,
        sources: Vec<PathBuf>,
    },
    /// The target exists and is not renamed away by this plan.
    External { target: PathBuf, source: PathBuf },
}

impl fmt::Display for Collision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collision::Internal { target, sources } => {
                let sources = sources
                    .iter()
                    .map(|s| display_name(s))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{} <- {} (duplicate target)", display_name(target), sources)
            }
            Collision::External { target, source } => write!(
                f,
                "{} <- {} (would overwrite an existing file)",
                display_name(target),
                display_name(source)
            ),
        }
    }
}

/// Every conflict found in a plan, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} collision(s) in rename plan: {}", .collisions.len(), join_collisions(.collisions))]
pub struct CollisionError {
    pub collisions: Vec<Collision>,
}

impl CollisionError {
    pub fn internal(&self) -> impl Iterator<Item = &Collision> {
        self.collisions
            .iter()
            .filter(|c| matches!(c, Collision::Internal { .. }))
    }

    pub fn external(&self) -> impl Iterator<Item = &Collision> {
        self.collisions
            .iter()
            .filter(|c| matches!(c, Collision::External { .. }))
    }
}

/// Checks a plan against the snapshot it was built from. No-op pairs are
/// allowed; a target may be another pair's source since that file moves away.
pub fn validate(plan: &RenamePlan, snapshot: &DirectorySnapshot) -> Result<(), CollisionError> {
    let sources: HashSet<&Path> = plan.pairs.iter().map(|p| p.source.as_path()).collect();
    let mut by_target = BTreeMap::<&Path, Vec<&Path>>::new();
    for pair in &plan.pairs {
        by_target
            .entry(pair.target.as_path())
            .or_default()
            .push(pair.source.as_path());
    }

    let mut collisions = Vec::new();
    for (target, owners) in &by_target {
        if owners.len() > 1 {
            collisions.push(Collision::Internal {
                target: target.to_path_buf(),
                sources: owners.iter().map(|p| p.to_path_buf()).collect(),
            });
        }
    }

    for pair in &plan.pairs {
        if pair.is_noop() || sources.contains(pair.target.as_path()) {
            continue;
        }
        let occupied = pair
            .target
            .file_name()
            .map(|name| snapshot.contains_name(name))
            .unwrap_or(false);
        if occupied {
            collisions.push(Collision::External {
                target: pair.target.clone(),
                source: pair.source.clone(),
            });
        }
    }

    if collisions.is_empty() {
        return Ok(());
    }

    tracing::debug!(count = collisions.len(), "rename plan rejected");
    Err(CollisionError { collisions })
}

fn join_collisions(collisions: &[Collision]) -> String {
    collisions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{RenamePair, RenameStats};
    use crate::scanner::FileEntry;
    use chrono::{Local, NaiveDate, TimeZone};

    fn dir() -> PathBuf {
        PathBuf::from("/dir")
    }

    fn snapshot(names: &[&str]) -> DirectorySnapshot {
        let modified = Local.timestamp_opt(0, 0).single().expect("valid timestamp");
        let files = names
            .iter()
            .map(|name| FileEntry::new(dir().join(name), modified).expect("utf-8 name"))
            .collect();
        DirectorySnapshot::from_files(dir(), files)
    }

    fn plan(pairs: &[(&str, &str)]) -> RenamePlan {
        RenamePlan {
            template: "{name}".to_string(),
            run_date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
            pairs: pairs
                .iter()
                .enumerate()
                .map(|(i, (from, to))| RenamePair {
                    index: i + 1,
                    source: dir().join(from),
                    target: dir().join(to),
                })
                .collect(),
            stats: RenameStats::default(),
        }
    }

    #[test]
    fn duplicate_targets_name_every_source() {
        let err = validate(
            &plan(&[("x.txt", "dup.txt"), ("y.txt", "dup.txt")]),
            &snapshot(&["x.txt", "y.txt"]),
        )
        .expect_err("duplicate target must be rejected");

        assert_eq!(
            err.collisions,
            vec![Collision::Internal {
                target: dir().join("dup.txt"),
                sources: vec![dir().join("x.txt"), dir().join("y.txt")],
            }]
        );
        let message = err.to_string();
        assert!(message.contains("x.txt") && message.contains("y.txt"));
    }

    #[test]
    fn target_over_untouched_file_is_external() {
        let err = validate(
            &plan(&[("a.txt", "keep.txt")]),
            &snapshot(&["a.txt", "keep.txt"]),
        )
        .expect_err("overwrite must be rejected");
        assert_eq!(err.external().count(), 1);
        assert_eq!(err.internal().count(), 0);
    }

    #[test]
    fn target_over_directory_is_external() {
        let mut snap = snapshot(&["a.txt"]);
        snap.names.insert("folder".into());
        let err = validate(&plan(&[("a.txt", "folder")]), &snap)
            .expect_err("directory name must be rejected");
        assert_eq!(err.external().count(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn lossy_lookalike_of_an_existing_name_is_not_external() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let mut snap = snapshot(&["a.txt"]);
        snap.names.insert(OsStr::from_bytes(b"\xffb.txt").to_os_string());
        validate(&plan(&[("a.txt", "\u{fffd}b.txt")]), &snap)
            .expect("names are compared byte for byte");

        snap.names.insert("\u{fffd}b.txt".into());
        let err = validate(&plan(&[("a.txt", "\u{fffd}b.txt")]), &snap)
            .expect_err("exact name must be rejected");
        assert_eq!(err.external().count(), 1);
    }

    #[test]
    fn target_that_is_another_source_is_allowed() {
        validate(
            &plan(&[("a.txt", "b.txt"), ("b.txt", "a.txt")]),
            &snapshot(&["a.txt", "b.txt"]),
        )
        .expect("swap is not a collision");
        validate(
            &plan(&[("1.txt", "2.txt"), ("2.txt", "3.txt")]),
            &snapshot(&["1.txt", "2.txt"]),
        )
        .expect("chain is not a collision");
    }

    #[test]
    fn noop_pairs_are_not_collisions() {
        validate(
            &plan(&[("a.txt", "a.txt"), ("b.txt", "c.txt")]),
            &snapshot(&["a.txt", "b.txt"]),
        )
        .expect("no-op is fine");
    }

    #[test]
    fn every_conflict_is_reported() {
        let err = validate(
            &plan(&[
                ("a.txt", "same.txt"),
                ("b.txt", "same.txt"),
                ("c.txt", "other.txt"),
                ("d.txt", "other.txt"),
                ("e.txt", "z.txt"),
            ]),
            &snapshot(&["a.txt", "b.txt", "c.txt", "d.txt", "e.txt", "z.txt"]),
        )
        .expect_err("must fail");
        assert_eq!(err.internal().count(), 2);
        assert_eq!(err.external().count(), 1);
    }
}
