use crate::guard::{validate, CollisionError};
use crate::scanner::{scan_directory, select_candidates, EnumerationError, FileEntry, SortKey};
use crate::template::{compile, IndexFormat, RenderContext, Template, TemplateError};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

/// Literal replace-all applied to the rendered base name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    from: String,
    to: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubstitutionError {
    #[error("substitution pattern must not be empty")]
    EmptyPattern,
    #[error("substitution must look like old:new, got {0}")]
    MissingSeparator(String),
}

impl Substitution {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Result<Self, SubstitutionError> {
        let from = from.into();
        if from.is_empty() {
            return Err(SubstitutionError::EmptyPattern);
        }
        Ok(Self { from, to: to.into() })
    }

    /// Parses `old:new`, splitting at the first colon so `new` may contain colons.
    pub fn parse(input: &str) -> Result<Self, SubstitutionError> {
        let (from, to) = input
            .split_once(':')
            .ok_or_else(|| SubstitutionError::MissingSeparator(input.to_string()))?;
        Self::new(from, to)
    }

    pub fn pattern(&self) -> &str {
        &self.from
    }

    pub fn replacement(&self) -> &str {
        &self.to
    }

    pub fn apply(&self, value: &str) -> String {
        value.replace(&self.from, &self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamePair {
    pub index: usize,
    pub source: PathBuf,
    pub target: PathBuf,
}

impl RenamePair {
    pub fn is_noop(&self) -> bool {
        self.source == self.target
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RenameStats {
    pub scanned_files: usize,
    pub excluded: usize,
    pub planned: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenamePlan {
    pub template: String,
    pub run_date: NaiveDate,
    pub pairs: Vec<RenamePair>,
    pub stats: RenameStats,
}

impl RenamePlan {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn changed(&self) -> impl Iterator<Item = &RenamePair> {
        self.pairs.iter().filter(|pair| !pair.is_noop())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("resolved name for {} is empty", .path.display())]
    EmptyName { path: PathBuf },
    #[error("resolved name {name:?} for {} is not a plain file name", .path.display())]
    InvalidName { path: PathBuf, name: String },
}

/// Configuration for one run, already validated by the caller.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub directory: PathBuf,
    pub template: String,
    pub index_format: IndexFormat,
    pub substitution: Option<Substitution>,
    pub exclusions: HashSet<String>,
    pub sort_key: SortKey,
    /// Fixed date for `{date}`; today when unset.
    pub run_date: Option<NaiveDate>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::new(),
            template: crate::DEFAULT_TEMPLATE.to_string(),
            index_format: IndexFormat::default(),
            substitution: None,
            exclusions: HashSet::new(),
            sort_key: SortKey::Alphabetical,
            run_date: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Enumeration(#[from] EnumerationError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Collision(#[from] CollisionError),
}

pub fn format_run_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Expands `template` for every entry, in order. Indices start at 1 and
/// follow the order of `entries`.
pub fn resolve(
    template: &Template,
    index_format: IndexFormat,
    substitution: Option<&Substitution>,
    entries: &[FileEntry],
    run_date: NaiveDate,
) -> Result<Vec<RenamePair>, ResolutionError> {
    let date = format_run_date(run_date);
    let mut pairs = Vec::with_capacity(entries.len());

    for (offset, entry) in entries.iter().enumerate() {
        let index = offset + 1;
        let rendered = template.render(&RenderContext {
            index,
            name: &entry.base_name,
            date: &date,
            index_format,
        });
        let base = match substitution {
            Some(sub) => sub.apply(&rendered),
            None => rendered,
        };
        let file_name = format!("{}{}", base, entry.extension);
        check_file_name(entry, &file_name)?;

        let target = match entry.original_path.parent() {
            Some(parent) => parent.join(&file_name),
            None => PathBuf::from(&file_name),
        };
        pairs.push(RenamePair {
            index,
            source: entry.original_path.clone(),
            target,
        });
    }

    Ok(pairs)
}

fn check_file_name(entry: &FileEntry, name: &str) -> Result<(), ResolutionError> {
    if name.is_empty() {
        return Err(ResolutionError::EmptyName {
            path: entry.original_path.clone(),
        });
    }
    if name == "."
        || name == ".."
        || name.contains('\0')
        || name.chars().any(std::path::is_separator)
    {
        return Err(ResolutionError::InvalidName {
            path: entry.original_path.clone(),
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Runs every pre-mutation stage: compile, scan, select, resolve, validate.
pub fn plan_batch(options: &PlanOptions) -> Result<RenamePlan, PlanError> {
    let template = compile(&options.template)?;
    let snapshot = scan_directory(&options.directory)?;
    let candidates = select_candidates(&snapshot, &options.exclusions, options.sort_key);
    let run_date = options
        .run_date
        .unwrap_or_else(|| Local::now().date_naive());

    let pairs = resolve(
        &template,
        options.index_format,
        options.substitution.as_ref(),
        &candidates,
        run_date,
    )?;

    let unchanged = pairs.iter().filter(|pair| pair.is_noop()).count();
    let plan = RenamePlan {
        template: template.to_string(),
        run_date,
        stats: RenameStats {
            scanned_files: snapshot.files.len(),
            excluded: snapshot.files.len() - candidates.len(),
            planned: pairs.len(),
            unchanged,
        },
        pairs,
    };

    validate(&plan, &snapshot)?;

    tracing::info!(
        directory = %options.directory.display(),
        planned = plan.stats.planned,
        unchanged = plan.stats.unchanged,
        excluded = plan.stats.excluded,
        "rename plan ready"
    );

    Ok(plan)
}
