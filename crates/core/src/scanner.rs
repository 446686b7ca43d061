use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// A regular file as it was seen when the directory was scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub original_path: PathBuf,
    pub file_name: String,
    pub base_name: String,
    /// Includes the leading dot, empty when the file has none.
    pub extension: String,
    pub modified: DateTime<Local>,
}

impl FileEntry {
    /// Fails for names that are not valid UTF-8, since template values and
    /// exclusions are text and a lossy copy would rename to different bytes.
    pub fn new(
        original_path: PathBuf,
        modified: DateTime<Local>,
    ) -> Result<Self, EnumerationError> {
        let Some(file_name) = original_path.file_name().and_then(OsStr::to_str) else {
            return Err(EnumerationError::NonUtf8Name(original_path));
        };
        let file_name = file_name.to_string();
        let base_name = original_path
            .file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
            .to_string();
        let extension = original_path
            .extension()
            .and_then(OsStr::to_str)
            .map(|v| format!(".{v}"))
            .unwrap_or_default();
        Ok(Self {
            original_path,
            file_name,
            base_name,
            extension,
            modified,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortKey {
    #[default]
    #[serde(rename = "alpha")]
    Alphabetical,
    #[serde(rename = "date")]
    ModificationTime,
}

/// Direct children of one directory, captured once per run.
///
/// `names` covers every child (files, directories, links) byte for byte and
/// is what collision checks compare against; `files` only holds regular
/// files, including links that resolve to one.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    pub directory: PathBuf,
    pub names: BTreeSet<OsString>,
    pub files: Vec<FileEntry>,
}

impl DirectorySnapshot {
    /// Builds a snapshot without touching the filesystem.
    pub fn from_files(directory: impl Into<PathBuf>, files: Vec<FileEntry>) -> Self {
        let names = files.iter().map(|f| OsString::from(&f.file_name)).collect();
        Self {
            directory: directory.into(),
            names,
            files,
        }
    }

    pub fn contains_name(&self, name: impl AsRef<OsStr>) -> bool {
        self.names.contains(name.as_ref())
    }
}

#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("failed to read directory {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to read modification time of {}: {source}", .path.display())]
    Metadata { path: PathBuf, source: io::Error },
    #[error("file name is not valid UTF-8: {}", .0.display())]
    NonUtf8Name(PathBuf),
}

pub fn scan_directory(directory: &Path) -> Result<DirectorySnapshot, EnumerationError> {
    if !directory.exists() {
        return Err(EnumerationError::DirectoryNotFound(directory.to_path_buf()));
    }
    if !directory.is_dir() {
        return Err(EnumerationError::NotADirectory(directory.to_path_buf()));
    }

    let mut names = BTreeSet::new();
    let mut files = Vec::new();

    for entry in WalkDir::new(directory).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| EnumerationError::Read {
            path: err
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| directory.to_path_buf()),
            source: err
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("directory walk failed")),
        })?;
        names.insert(entry.file_name().to_os_string());

        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let path = entry.path().to_path_buf();
        // Links are followed for candidacy; a dangling one is just a name.
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(_) if file_type.is_symlink() => continue,
            Err(source) => return Err(EnumerationError::Metadata { path, source }),
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata
            .modified()
            .map_err(|source| EnumerationError::Metadata {
                path: path.clone(),
                source,
            })?;
        files.push(FileEntry::new(path, DateTime::from(modified))?);
    }

    tracing::debug!(
        directory = %directory.display(),
        entries = names.len(),
        files = files.len(),
        "scanned directory"
    );

    Ok(DirectorySnapshot {
        directory: directory.to_path_buf(),
        names,
        files,
    })
}

/// Filters out excluded names and orders the rest. Excluded files never
/// take an index slot because indices are assigned from this order.
pub fn select_candidates(
    snapshot: &DirectorySnapshot,
    exclusions: &HashSet<String>,
    sort_key: SortKey,
) -> Vec<FileEntry> {
    let mut out: Vec<FileEntry> = snapshot
        .files
        .iter()
        .filter(|entry| !exclusions.contains(&entry.file_name))
        .cloned()
        .collect();

    match sort_key {
        SortKey::Alphabetical => out.sort_by(|a, b| a.file_name.cmp(&b.file_name)),
        SortKey::ModificationTime => out.sort_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.file_name.cmp(&b.file_name))
        }),
    }

    out
}

pub fn enumerate(
    directory: &Path,
    exclusions: &HashSet<String>,
    sort_key: SortKey,
) -> Result<Vec<FileEntry>, EnumerationError> {
    let snapshot = scan_directory(directory)?;
    Ok(select_candidates(&snapshot, exclusions, sort_key))
}
