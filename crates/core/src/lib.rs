mod apply;
mod config;
mod guard;
mod planner;
mod scanner;
mod template;

pub const DEFAULT_TEMPLATE: &str = "{name}_{index}";

pub use apply::{
    execute, ExecutionError, ExecutionMode, ExecutionReport, ExecutionStatus, PairOutcome,
    ReportEntry,
};
pub use config::{
    app_paths, load_config, load_config_from, save_config, save_config_to, AppConfig, AppPaths,
};
pub use guard::{validate, Collision, CollisionError};
pub use planner::{
    format_run_date, plan_batch, resolve, PlanError, PlanOptions, RenamePair, RenamePlan,
    RenameStats, ResolutionError, Substitution, SubstitutionError,
};
pub use scanner::{
    enumerate, scan_directory, select_candidates, DirectorySnapshot, EnumerationError, FileEntry,
    SortKey,
};
pub use template::{
    compile, IndexFormat, IndexFormatError, RenderContext, Template, TemplateError, TemplatePart,
    Variable, DEFAULT_INDEX_WIDTH, MAX_INDEX_WIDTH,
};
