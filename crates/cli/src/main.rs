use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use renamer_core::{
    app_paths, compile, execute, load_config, plan_batch, ExecutionMode, ExecutionReport,
    IndexFormat, PairOutcome, PlanError, PlanOptions, RenamePlan, SortKey, Substitution,
};
use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "renamer")]
#[command(about = "Rename every file in a directory from a naming template")]
struct Cli {
    /// Log pipeline steps to stderr
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Rename(RenameArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Show,
}

#[derive(Debug, Args)]
struct RenameArgs {
    /// Directory whose files are renamed
    path: PathBuf,
    /// Naming template, e.g. 'image_{index}_{date}'
    #[arg(long)]
    pattern: Option<String>,
    /// Literal replacement on the new base name, as old:new
    #[arg(long)]
    replace: Option<String>,
    /// Show the changes without applying them
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Ask before applying the batch
    #[arg(long, default_value_t = false)]
    confirm: bool,
    /// File names to leave alone
    #[arg(long, num_args = 1..)]
    exclude: Vec<String>,
    #[arg(long, value_enum)]
    sort: Option<SortArg>,
    /// Index format, e.g. '{:03}' or 3
    #[arg(long)]
    index_format: Option<String>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Alpha,
    Date,
}

impl From<SortArg> for SortKey {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::Alpha => SortKey::Alphabetical,
            SortArg::Date => SortKey::ModificationTime,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Rename(args) => cmd_rename(args),
        Commands::Config(config) => match config.action {
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "renamer_core=debug,renamer=debug"
    } else {
        "renamer_core=warn,renamer=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn cmd_rename(args: RenameArgs) -> Result<()> {
    let config = load_config()?;

    let template = args.pattern.unwrap_or(config.template);
    compile(&template).with_context(|| format!("invalid pattern: {template}"))?;

    let index_format = match args.index_format.as_deref() {
        Some(raw) => IndexFormat::parse(raw)?,
        None => IndexFormat::new(config.index_width)
            .context("invalid index_width in config file")?,
    };
    let substitution = args
        .replace
        .as_deref()
        .map(Substitution::parse)
        .transpose()?;

    let mut exclusions: HashSet<String> = config.exclusions.into_iter().collect();
    exclusions.extend(args.exclude);

    let options = PlanOptions {
        directory: args.path,
        template,
        index_format,
        substitution,
        exclusions,
        sort_key: args.sort.map(Into::into).unwrap_or(config.sort),
        run_date: None,
    };

    let plan = match plan_batch(&options) {
        Ok(plan) => plan,
        Err(PlanError::Collision(err)) => {
            eprintln!("refusing to rename, {} conflict(s):", err.collisions.len());
            for collision in &err.collisions {
                eprintln!("  {collision}");
            }
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    if plan.changed().next().is_none() {
        if args.output == OutputFormat::Json {
            let report = execute(&plan, ExecutionMode::DryRun);
            print_json(&plan, &report)?;
        } else {
            println!("nothing to rename ({} file(s) already match)", plan.len());
        }
        return Ok(());
    }

    let mode = if args.dry_run {
        ExecutionMode::DryRun
    } else if args.confirm || config.confirm {
        print_plan(&plan, &options.directory);
        if !ask_confirmation(plan.changed().count())? {
            eprintln!("cancelled: no files were renamed");
            return Ok(());
        }
        ExecutionMode::Confirmed
    } else {
        ExecutionMode::Unconfirmed
    };

    tracing::debug!(?mode, pairs = plan.len(), "executing rename plan");
    let report = execute(&plan, mode);

    match args.output {
        OutputFormat::Json => print_json(&plan, &report)?,
        OutputFormat::Table => print_report(&report, &options.directory),
    }

    let renamed = report.renamed();
    let not_attempted = report.not_attempted();
    let permanent = report.applied_renames_are_permanent();
    if let Some(err) = report.error {
        if permanent {
            eprintln!("{renamed} rename(s) were already applied and are not rolled back");
        }
        return Err(anyhow::Error::from(err).context(format!(
            "stopped after {} of {} rename(s); {} not attempted",
            renamed,
            plan.changed().count(),
            not_attempted
        )));
    }

    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let paths = app_paths()?;
    println!("config file: {}", paths.config_path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn ask_confirmation(count: usize) -> Result<bool> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    loop {
        print!("apply {count} rename(s)? [y/n] : ");
        io::stdout().flush().context("failed to flush stdout")?;

        let mut line = String::new();
        if input
            .read_line(&mut line)
            .context("failed to read confirmation")?
            == 0
        {
            bail!("no confirmation received (stdin closed)");
        }
        match line.trim().to_lowercase().as_str() {
            "y" => return Ok(true),
            "n" => return Ok(false),
            _ => continue,
        }
    }
}

fn print_plan(plan: &RenamePlan, root: &Path) {
    for pair in plan.changed() {
        println!("{} -> {}", relative(&pair.source, root), relative(&pair.target, root));
    }
}

fn print_report(report: &ExecutionReport, root: &Path) {
    for entry in &report.entries {
        let source = relative(&entry.source, root);
        let target = relative(&entry.target, root);
        match &entry.outcome {
            PairOutcome::WouldRename => println!("[DRY-RUN] {source} -> {target}"),
            PairOutcome::Renamed => println!("renamed: {source} -> {target}"),
            PairOutcome::Skipped => {}
            PairOutcome::Failed { reason } => println!("FAILED: {source} -> {target}: {reason}"),
            PairOutcome::NotAttempted { parked_at: None } => {
                println!("not attempted: {source} -> {target}")
            }
            PairOutcome::NotAttempted {
                parked_at: Some(parked),
            } => println!(
                "not attempted: {source} -> {target} (file currently at {})",
                relative(parked, root)
            ),
        }
    }

    eprintln!(
        "\nsummary: renamed={} would_rename={} unchanged={} not_attempted={}",
        report.renamed(),
        report.would_rename(),
        report.skipped(),
        report.not_attempted()
    );
    if report.mode.is_dry_run() {
        eprintln!("dry-run: no files were changed. Run without --dry-run to apply.");
    }
}

fn print_json(plan: &RenamePlan, report: &ExecutionReport) -> Result<()> {
    let body = serde_json::json!({
        "plan": plan,
        "report": report,
        "error": report.error.as_ref().map(ToString::to_string),
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
