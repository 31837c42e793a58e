use anyhow::{bail, Result};
use bookshift::config::{MigrationConfig, DEFAULT_CHUNK_SIZE, SNAPSHOT_FILE};
use bookshift::export;
use bookshift::models::{EntityKind, Table};
use bookshift::pipeline::{JobReport, Launch, MigrationJob, Stage, StageOutcome};
use bookshift::seed::Library;
use bookshift::snapshot;
use bookshift::source::JsonlSourceStore;
use bookshift::target::{CsvTargetStore, TargetStore};
use bookshift::transform::UnresolvedPolicy;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "bookshift")]
#[command(about = "Migrate a document-store library catalogue into relational tables")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate source exports into target CSV tables
    Migrate(MigrateArgs),
    /// Write the sample library as source exports
    Seed(SeedArgs),
    /// Show target table counts and the registry snapshot
    Status(StatusArgs),
    /// Write target tables back out as source exports
    Export(ExportArgs),
}

#[derive(Args)]
struct MigrateArgs {
    /// Directory of source exports (<collection>.jsonl or .jsonl.bz2)
    #[arg(short, long)]
    source: PathBuf,

    /// Directory of target tables (<table>.csv)
    #[arg(short, long)]
    target: PathBuf,

    /// Run one stage only (parent or dependent)
    #[arg(long)]
    stage: Option<Stage>,

    /// Records per chunk; each chunk is one transaction
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// What to do with comments whose book was never migrated (fail, skip, detach)
    #[arg(long, default_value_t = UnresolvedPolicy::Fail)]
    on_unresolved: UnresolvedPolicy,

    /// Skip comments whose book and text already exist in the target
    #[arg(long)]
    dedupe_comments: bool,

    /// Registry snapshot file (defaults to <target>/registry.snapshot)
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Keep the registry in memory only
    #[arg(long, conflicts_with = "snapshot")]
    no_snapshot: bool,

    /// Remove existing target tables and snapshot before starting
    #[arg(long)]
    clean: bool,
}

#[derive(Args)]
struct SeedArgs {
    /// Directory to write source exports into
    #[arg(short, long)]
    source: PathBuf,

    /// Write bzip2-compressed exports
    #[arg(long)]
    compress: bool,
}

#[derive(Args)]
struct StatusArgs {
    /// Directory of target tables
    #[arg(short, long)]
    target: PathBuf,

    /// Registry snapshot file (defaults to <target>/registry.snapshot)
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Args)]
struct ExportArgs {
    /// Directory of target tables
    #[arg(short, long)]
    target: PathBuf,

    /// Directory to write exports into
    #[arg(short, long)]
    output: PathBuf,

    /// Write bzip2-compressed exports
    #[arg(long)]
    compress: bool,
}

fn snapshot_path(target: &Path, explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| target.join(SNAPSHOT_FILE))
}

fn run_migrate(args: MigrateArgs) -> Result<()> {
    let snapshot = if args.no_snapshot {
        None
    } else {
        Some(snapshot_path(&args.target, args.snapshot))
    };

    if args.clean {
        info!(dir = %args.target.display(), "Cleaning target tables");
        CsvTargetStore::clean(&args.target)?;
        if let Some(path) = &snapshot {
            snapshot::clear(path)?;
        }
    }

    let source = JsonlSourceStore::open(&args.source)?;
    let mut target = CsvTargetStore::open(&args.target)?;

    let config = MigrationConfig {
        chunk_size: args.chunk_size,
        unresolved_policy: args.on_unresolved,
        dedupe_comments: args.dedupe_comments,
        snapshot_path: snapshot,
        show_progress: true,
    };
    let launch = match args.stage {
        Some(stage) => Launch::Stage(stage),
        None => Launch::Full,
    };

    let start = Instant::now();
    let report = MigrationJob::new(&source, &mut target, config)?.launch(launch);
    print_report(&report, start.elapsed().as_secs_f64());

    match report.error() {
        Some(e) => bail!("Migration failed: {:#}", e),
        None => Ok(()),
    }
}

fn print_report(report: &JobReport, duration_secs: f64) {
    println!();
    println!("=== Summary ===");
    println!("Status:             {:?}", report.status);
    println!("Total time:         {:.2}s", duration_secs);
    for (stage, outcome) in &report.stages {
        println!();
        let label = match outcome {
            StageOutcome::NotRun => "not run",
            StageOutcome::Completed(_) => "completed",
            StageOutcome::Failed { .. } => "failed",
        };
        println!("Stage {stage}: {label}");
        let Some(summary) = outcome.summary() else {
            continue;
        };
        for sweep in &summary.sweeps {
            let name = sweep.collection.map_or("?", |c| c.name());
            println!(
                "  {:<10} read {:>6}  written {:>6}  skipped {:>6}  unresolved {:>6}  chunks {:>5}",
                name, sweep.read, sweep.written, sweep.skipped_existing, sweep.unresolved, sweep.chunks
            );
        }
    }
}

fn run_seed(args: SeedArgs) -> Result<()> {
    let library = Library::classics();
    for path in library.write_to(&args.source, args.compress)? {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn run_status(args: StatusArgs) -> Result<()> {
    let target = CsvTargetStore::open(&args.target)?;
    println!("=== Target: {} ===", target.dir().display());
    for table in Table::ALL {
        println!("{:<12} {:>8}", table.name(), target.count(table)?);
    }

    let path = snapshot_path(&args.target, args.snapshot);
    println!();
    match snapshot::load_if_valid(&path)? {
        Some(snapshot) => {
            println!("=== Registry: {} ===", path.display());
            for kind in EntityKind::ALL {
                println!("{:<12} {:>8}", kind.to_string(), snapshot.mappings(kind));
            }
            let stages: Vec<String> = snapshot
                .completed_stages
                .iter()
                .map(Stage::to_string)
                .collect();
            println!("Completed stages: {}", stages.join(", "));
        }
        None => println!("No registry snapshot at {}", path.display()),
    }
    Ok(())
}

fn run_export(args: ExportArgs) -> Result<()> {
    let target = CsvTargetStore::open(&args.target)?;
    for path in export::export_tables(target.tables(), &args.output, args.compress)? {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Migrate(args) => run_migrate(args),
        Commands::Seed(args) => run_seed(args),
        Commands::Status(args) => run_status(args),
        Commands::Export(args) => run_export(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
