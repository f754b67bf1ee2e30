use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use preprint_trends::app::{App, BuildOutcome, ProgressSink, Session, StopFlag};
use preprint_trends::config::{ConfigLoader, ConfigOverrides, ResolvedConfig};
use preprint_trends::domain::{FilterMode, SourceId};
use preprint_trends::error::TrendsError;
use preprint_trends::input::{TEMPLATE_CSV, dedupe_names, names_from_csv_file};
use preprint_trends::openalex::OpenAlexHttpClient;
use preprint_trends::output::{
    BuildReport, ConsoleProgress, JsonOutput, OutputMode, SelectReport, print_build_summary,
    print_session_summary,
};
use preprint_trends::package::{archive_file_name, validate_archive};
use preprint_trends::resolver::Pick;
use preprint_trends::store::Store;

#[derive(Parser)]
#[command(name = "preprint-trends")]
#[command(about = "Export OpenAlex metadata and publication trends for preprint servers")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    /// Contact address sent as `mailto` to use the OpenAlex polite pool.
    #[arg(long, global = true)]
    mailto: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve server names to OpenAlex sources and store the session")]
    Resolve(ResolveArgs),
    #[command(about = "Change which sources are selected for a name")]
    Select(SelectArgs),
    #[command(about = "Fetch the selected sources and write the archive")]
    Build(BuildArgs),
    #[command(about = "Resolve, select and build in one step")]
    Run(RunArgs),
    #[command(about = "Print a starter CSV of server names")]
    Template,
}

#[derive(Args, Clone)]
struct NameArgs {
    names: Vec<String>,

    /// CSV whose first column lists server names (first row is a header).
    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long)]
    per_page: Option<u32>,

    #[arg(long, value_enum)]
    pick: Option<Pick>,
}

#[derive(Args, Clone)]
struct ResolveArgs {
    #[command(flatten)]
    names: NameArgs,
}

#[derive(Args, Clone)]
struct SelectArgs {
    name: String,

    ids: Vec<String>,

    #[arg(long, conflicts_with = "ids")]
    all: bool,
}

#[derive(Args, Clone)]
struct BuildArgs {
    #[arg(long)]
    output: Option<String>,

    #[arg(long)]
    monthly: bool,

    /// Turn monthly aggregation off even when the config enables it.
    #[arg(long, conflicts_with = "monthly")]
    no_monthly: bool,

    #[arg(long)]
    from: Option<String>,

    #[arg(long)]
    to: Option<String>,

    #[arg(long, value_enum)]
    filter: Option<FilterMode>,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    names: NameArgs,

    #[command(flatten)]
    build: BuildArgs,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<TrendsError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TrendsError) -> u8 {
    match error {
        TrendsError::NotFound(_) | TrendsError::NoSelection => 2,
        TrendsError::OpenAlexHttp(_)
        | TrendsError::OpenAlexStatus { .. }
        | TrendsError::Fetch { .. } => 3,
        TrendsError::Packaging(_) | TrendsError::Archive(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?.apply(ConfigOverrides {
        mailto: cli.mailto.clone(),
        ..ConfigOverrides::default()
    })?;
    if let Some(path) = &config.path {
        info!(path = %path.display(), "using config file");
    }

    match cli.command {
        Commands::Resolve(args) => run_resolve(args, config, output_mode),
        Commands::Select(args) => run_select(args, output_mode),
        Commands::Build(args) => run_build(args, config, output_mode),
        Commands::Run(args) => run_all(args, config, output_mode),
        Commands::Template => {
            print!("{TEMPLATE_CSV}");
            Ok(())
        }
    }
}

fn run_resolve(
    args: ResolveArgs,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let config = config.apply(ConfigOverrides {
        per_page: args.names.per_page,
        ..ConfigOverrides::default()
    })?;
    let app = App::new(OpenAlexHttpClient::new(config.http.clone())?).with_per_page(config.per_page);
    let session = resolve_session(&app, &args.names, &config, sink_for(output_mode))?;

    let store = Store::new()?;
    let path = store.save_session(&session)?;
    info!(path = %path, "session saved");

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_session(&session).into_diagnostic(),
        OutputMode::Interactive => {
            print_session_summary(&session);
            Ok(())
        }
    }
}

fn run_select(args: SelectArgs, output_mode: OutputMode) -> miette::Result<()> {
    let store = Store::new()?;
    let mut session = store.load_session()?.unwrap_or_default();
    if args.all {
        session.select_all(&args.name)?;
    } else {
        let ids = args
            .ids
            .iter()
            .map(|id| id.parse::<SourceId>())
            .collect::<Result<Vec<_>, TrendsError>>()?;
        session.select(&args.name, ids);
    }
    store.save_session(&session)?;

    match output_mode {
        OutputMode::NonInteractive => {
            let entry = session.entry(&args.name);
            let report = SelectReport {
                name: entry.map(|entry| entry.name.as_str()).unwrap_or(&args.name),
                selected: entry
                    .map(|entry| entry.selected.iter().map(SourceId::as_str).collect())
                    .unwrap_or_default(),
            };
            JsonOutput::print_select(&report).into_diagnostic()
        }
        OutputMode::Interactive => {
            print_session_summary(&session);
            Ok(())
        }
    }
}

fn run_build(args: BuildArgs, config: ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let config = config.apply(build_overrides(&args))?;
    let store = Store::new()?;
    let session = store.load_session()?.ok_or(TrendsError::NoSelection)?;
    let app = App::new(OpenAlexHttpClient::new(config.http.clone())?).with_per_page(config.per_page);
    let outcome = app.build(&session, &config.build, sink_for(output_mode), &StopFlag::new())?;
    finish_build(&args, &outcome, output_mode)
}

fn run_all(args: RunArgs, config: ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let mut overrides = build_overrides(&args.build);
    overrides.per_page = args.names.per_page;
    let config = config.apply(overrides)?;
    let app = App::new(OpenAlexHttpClient::new(config.http.clone())?).with_per_page(config.per_page);
    let sink = sink_for(output_mode);

    let session = resolve_session(&app, &args.names, &config, sink)?;
    let store = Store::new()?;
    store.save_session(&session)?;
    let outcome = app.build(&session, &config.build, sink, &StopFlag::new())?;
    finish_build(&args.build, &outcome, output_mode)
}

/// Names from the command line and `--input` win; otherwise the configured
/// servers are used.
fn resolve_session(
    app: &App<OpenAlexHttpClient>,
    args: &NameArgs,
    config: &ResolvedConfig,
    sink: &dyn ProgressSink,
) -> miette::Result<Session> {
    let mut names = args.names.clone();
    if let Some(input) = &args.input {
        names.extend(names_from_csv_file(input)?);
    }
    let names = dedupe_names(names);
    let pick = args.pick.unwrap_or_default();

    if names.is_empty() {
        if config.servers.is_empty() {
            return Err(TrendsError::NoSelection.into());
        }
        return Ok(app.resolve_requests(&config.servers, pick, sink)?);
    }
    let mut session = app.resolve_names(&names, sink)?;
    session.apply_pick(pick);
    Ok(session)
}

fn build_overrides(args: &BuildArgs) -> ConfigOverrides {
    ConfigOverrides {
        filter: args.filter,
        monthly: monthly_override(args),
        date_from: args.from.clone(),
        date_to: args.to.clone(),
        ..ConfigOverrides::default()
    }
}

fn monthly_override(args: &BuildArgs) -> Option<bool> {
    match (args.monthly, args.no_monthly) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn finish_build(
    args: &BuildArgs,
    outcome: &BuildOutcome,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let path = args
        .output
        .clone()
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| Utf8PathBuf::from(archive_file_name(Local::now())));
    Store::write_bytes_atomic(&path, &outcome.archive)?;
    let entries = validate_archive(path.as_std_path())?;
    info!(archive = %path, entries = entries.len(), "archive written");

    let report = BuildReport {
        archive: path.to_string(),
        entries,
        summary: &outcome.summary,
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_build(&report).into_diagnostic(),
        OutputMode::Interactive => {
            print_build_summary(&report);
            Ok(())
        }
    }
}

fn sink_for(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Interactive => &ConsoleProgress,
        OutputMode::NonInteractive => &JsonOutput,
    }
}
