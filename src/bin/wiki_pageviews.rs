use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use wiki_pageviews::availability::{AvailabilityProbe, DEFAULT_LOOKBACK_HOURS, ScheduleDecision};
use wiki_pageviews::config::{ConfigLoader, Settings};
use wiki_pageviews::domain::{HourSlot, parse_instant};
use wiki_pageviews::error::IngestError;
use wiki_pageviews::output::{JsonOutput, ProbeResult, StatusEntry};
use wiki_pageviews::source::HttpSource;
use wiki_pageviews::store::LocalStore;
use wiki_pageviews::warehouse::{Connector, LocalWarehouse, MemoryWarehouse};
use wiki_pageviews::window::TimeSelection;
use wiki_pageviews::workflow::{RunReport, Workflow};

#[derive(Parser)]
#[command(name = "wiki-pageviews")]
#[command(about = "Download hourly Wikipedia pageview dumps and load them into the warehouse")]
#[command(version)]
struct Cli {
    /// JSON config file; environment variables and `.env` take precedence.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    data_dir: Option<Utf8PathBuf>,

    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Print machine-readable JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch and load the current hour, one hour, or a range")]
    Run(RunArgs),
    #[command(about = "Decide which hour a scheduled trigger should process")]
    Schedule(ScheduleArgs),
    #[command(about = "Check whether an hour has been published upstream")]
    Probe(ProbeArgs),
    #[command(about = "List local artifacts and their state")]
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    /// Directory-backed warehouse under WAREHOUSE_ROOT.
    Local,
    /// In-process warehouse discarded on exit.
    Memory,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, requires = "end", conflicts_with_all = ["hour", "latest"])]
    start: Option<String>,

    #[arg(long, requires = "start")]
    end: Option<String>,

    #[arg(long, conflicts_with = "latest")]
    hour: Option<String>,

    /// Process the most recent published hour.
    #[arg(long)]
    latest: bool,

    #[arg(long, default_value_t = DEFAULT_LOOKBACK_HOURS)]
    lookback: usize,

    #[arg(long, value_enum, default_value_t = Backend::Local)]
    warehouse: Backend,
}

#[derive(Args)]
struct ScheduleArgs {
    /// Scheduled execution time; defaults to now.
    #[arg(long)]
    at: Option<String>,

    #[arg(long, default_value_t = DEFAULT_LOOKBACK_HOURS)]
    lookback: usize,

    /// Run the workflow for the chosen hour instead of only printing the decision.
    #[arg(long)]
    execute: bool,

    #[arg(long, value_enum, default_value_t = Backend::Local)]
    warehouse: Backend,
}

#[derive(Args)]
struct ProbeArgs {
    #[arg(long)]
    hour: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<IngestError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IngestError) -> u8 {
    match error {
        IngestError::InvalidTimestamp(_)
        | IngestError::InvalidRange { .. }
        | IngestError::MissingSetting(_)
        | IngestError::InvalidSetting { .. }
        | IngestError::ConfigRead(_)
        | IngestError::ConfigParse(_) => 2,
        IngestError::TargetHourUnavailable(_)
        | IngestError::Network(_)
        | IngestError::HttpStatus { .. } => 3,
        IngestError::WarehouseConnection(_) | IngestError::DdlSetup { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = ConfigLoader::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }
    if let Some(workers) = cli.workers {
        if workers == 0 {
            return Err(IngestError::InvalidSetting {
                name: "--workers".to_string(),
                message: "must be at least 1".to_string(),
            }
            .into());
        }
        settings.max_workers = workers;
    }

    match cli.command {
        Commands::Run(args) => run_workflow(args, settings, cli.json),
        Commands::Schedule(args) => run_schedule(args, settings, cli.json),
        Commands::Probe(args) => run_probe(args, settings, cli.json),
        Commands::Status => run_status(settings, cli.json),
    }
}

fn run_workflow(args: RunArgs, settings: Settings, json: bool) -> miette::Result<()> {
    let selection = match (&args.start, &args.end, &args.hour) {
        (Some(start), Some(end), _) => TimeSelection::Range {
            start: parse_instant(start)?,
            end: parse_instant(end)?,
        },
        (_, _, Some(hour)) => TimeSelection::SingleHour(parse_instant(hour)?),
        _ if args.latest => {
            let source = HttpSource::new(settings.http_timeout)?;
            let probe = AvailabilityProbe::new(source, settings.base_url.clone());
            let slot = probe.manual_slot(Utc::now().naive_utc(), args.lookback);
            TimeSelection::SingleHour(slot.as_datetime())
        }
        _ => TimeSelection::CurrentHour,
    };
    let report = execute(selection, settings, args.warehouse)?;
    emit_report(&report, json)
}

fn run_schedule(args: ScheduleArgs, settings: Settings, json: bool) -> miette::Result<()> {
    let scheduled_at = match &args.at {
        Some(value) => parse_instant(value)?,
        None => Utc::now().naive_utc(),
    };
    let source = HttpSource::new(settings.http_timeout)?;
    let probe = AvailabilityProbe::new(source, settings.base_url.clone());
    let decision = probe.scheduled_decision(scheduled_at, args.lookback);

    if json {
        JsonOutput::print_decision(&decision).into_diagnostic()?;
    }
    match decision {
        ScheduleDecision::Skip { reason } => {
            if !json {
                println!("skip: {reason}");
            }
            Ok(())
        }
        ScheduleDecision::Run { slot, run_key } => {
            if !json {
                println!("run {run_key}: {slot}");
            }
            if !args.execute {
                return Ok(());
            }
            let report = execute(
                TimeSelection::SingleHour(slot.as_datetime()),
                settings,
                args.warehouse,
            )?;
            emit_report(&report, json)
        }
    }
}

fn run_probe(args: ProbeArgs, settings: Settings, json: bool) -> miette::Result<()> {
    let slot = args.hour.parse::<HourSlot>()?;
    let source = HttpSource::new(settings.http_timeout)?;
    let probe = AvailabilityProbe::new(source, settings.base_url);
    let result = ProbeResult {
        slot,
        url: probe.url(slot),
        available: probe.check_available(slot),
    };
    if json {
        JsonOutput::print_probe(&result).into_diagnostic()?;
    } else {
        let verdict = if result.available {
            "available"
        } else {
            "not available"
        };
        println!("{} {verdict} ({})", result.slot, result.url);
    }
    Ok(())
}

fn run_status(settings: Settings, json: bool) -> miette::Result<()> {
    let store = LocalStore::new(settings.data_dir);
    let entries = store
        .list_slots()?
        .into_iter()
        .map(|(slot, state)| StatusEntry { slot, state })
        .collect::<Vec<_>>();
    if json {
        JsonOutput::print_status(&entries).into_diagnostic()?;
    } else if entries.is_empty() {
        println!("no artifacts in {}", store.root());
    } else {
        for entry in &entries {
            println!("{}  {}", entry.slot, entry.state);
        }
    }
    Ok(())
}

fn execute(
    selection: TimeSelection,
    settings: Settings,
    backend: Backend,
) -> Result<RunReport, IngestError> {
    let source = HttpSource::new(settings.http_timeout)?;
    match backend {
        Backend::Local => {
            let root = match &settings.warehouse_root {
                Some(root) => root.clone(),
                None => LocalWarehouse::default_root()?,
            };
            execute_with(selection, settings, source, LocalWarehouse::new(root))
        }
        Backend::Memory => execute_with(selection, settings, source, MemoryWarehouse::new()),
    }
}

fn execute_with<C: Connector>(
    selection: TimeSelection,
    settings: Settings,
    source: HttpSource,
    connector: C,
) -> Result<RunReport, IngestError> {
    Workflow::new(settings, source, connector).run(selection)
}

fn emit_report(report: &RunReport, json: bool) -> miette::Result<()> {
    if json {
        return JsonOutput::print_report(report).into_diagnostic();
    }
    let fetched = report.slots.iter().filter(|slot| slot.fetched).count();
    let loaded = report.files.iter().filter(|file| file.loaded).count();
    println!("hours fetched: {fetched}/{}", report.slots.len());
    for slot in report.slots.iter().filter(|slot| !slot.fetched) {
        println!("  failed: {}", slot.slot);
    }
    println!("files loaded: {loaded}/{}", report.files.len());
    for file in &report.files {
        let status = match (file.uploaded, file.loaded) {
            (false, _) => "upload failed".to_string(),
            (true, false) => "load failed".to_string(),
            (true, true) => format!(
                "{} rows, {} rejected",
                file.rows_loaded, file.rows_rejected
            ),
        };
        println!("  {}: {status}", file.file_name);
    }
    println!(
        "rows loaded: {} (rejected {})",
        report.rows_loaded, report.rows_rejected
    );
    Ok(())
}
