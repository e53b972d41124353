use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::ProgressBar;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use wdkb::calendar::DayDate;
use wdkb::config::{DEFAULT_DATABASE_FILE, DEFAULT_DATA_DIR, DEFAULT_OUTPUT_DIR};
use wdkb::consumer::DebugLogger;
use wdkb::dbwriter::DatabaseWriter;
use wdkb::edits::{BotList, EditCountAggregator};
use wdkb::filter::EntityFilter;
use wdkb::history::StatHistory;
use wdkb::kb::KbWriter;
use wdkb::latest::LatestRevisionResolver;
use wdkb::output::OutputFile;
use wdkb::parser::DumpProcessor;
use wdkb::revstats::RevisionStatsRecorder;
use wdkb::source::{process_dumps, DumpSource};
use wdkb::stats::StatsCounter;
use wdkb::store::{EntityStore, SqliteStore};
use wdkb::turtle::TurtleWriter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "wdkb")]
#[command(about = "Process Wikidata history dumps into edit statistics, KB and Turtle exports")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// Directory holding dumpYYYYMMDD/ and dailyYYYYMMDD/ subdirectories
    #[arg(long, default_value = DEFAULT_DATA_DIR, global = true)]
    data_dir: PathBuf,

    /// Output directory for result files
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR, global = true)]
    output: PathBuf,

    /// Limit number of pages to process per file (for testing)
    #[arg(long, global = true)]
    limit: Option<u64>,

    /// Process these dump files, in the given order, instead of the
    /// discovered ones. Must be newest first.
    #[arg(short, long, global = true)]
    file: Vec<PathBuf>,

    /// Log every page block and revision at debug level
    #[arg(long, global = true)]
    log_events: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Count edits per day by bots, registered users and anonymous users
    Edits(EditsArgs),
    /// Export the latest revision of every entity
    Export(ExportArgs),
    /// Record per-entity revision statistics in the database
    Revstats(DatabaseArgs),
    /// Aggregate recorded revision statistics into a daily CSV
    History(DatabaseArgs),
}

#[derive(Args)]
struct EditsArgs {
    /// File with bot account names, one per line
    #[arg(long)]
    bots: Option<PathBuf>,
}

#[derive(Args)]
struct ExportArgs {
    /// Write the KB text format to this file (.bz2 to compress)
    #[arg(long)]
    kb: Option<PathBuf>,

    /// Write OWL/RDF Turtle to this file (.bz2 to compress)
    #[arg(long)]
    turtle: Option<PathBuf>,

    /// Store reduced entity data in this SQLite database
    #[arg(long)]
    database: Option<PathBuf>,

    /// Only export terms in these languages (comma separated)
    #[arg(long, value_delimiter = ',')]
    languages: Option<Vec<String>>,

    /// Only export links to these sites (comma separated)
    #[arg(long, value_delimiter = ',')]
    sites: Option<Vec<String>>,

    /// Only export statements with these property types (comma separated)
    #[arg(long, value_delimiter = ',')]
    property_types: Option<Vec<String>>,

    /// Do not export statements
    #[arg(long)]
    no_statements: bool,

    /// Do not export references
    #[arg(long)]
    no_references: bool,

    /// Export the state as of this date (YYYY-MM-DD); later revisions are ignored
    #[arg(long)]
    max_date: Option<String>,
}

#[derive(Args)]
struct DatabaseArgs {
    /// SQLite database file (defaults to the output directory)
    #[arg(long)]
    database: Option<PathBuf>,
}

impl DatabaseArgs {
    fn path(&self, common: &CommonArgs) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| common.output.join(DEFAULT_DATABASE_FILE))
    }
}

fn spinner() -> ProgressBar {
    ProgressBar::new_spinner()
}

fn create_csv(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    Ok(BufWriter::with_capacity(128 * 1024, file))
}

/// Runs the processor over the explicit files or the discovered dumps.
/// Returns a label for result file names: the date of the newest dump.
fn run_inputs(common: &CommonArgs, processor: &mut DumpProcessor<'_>) -> Result<String> {
    if !common.file.is_empty() {
        let mut failed = 0;
        for path in &common.file {
            if let Err(e) = processor.process_path(path) {
                failed += 1;
                error!(path = %path.display(), error = %format!("{:#}", e), "Failed to process dump");
            }
        }
        if failed == common.file.len() {
            bail!("None of the {} input files could be processed", failed);
        }
        return Ok("local".to_string());
    }

    let source = DumpSource::new(&common.data_dir);
    let dumps = source.recent_dumps()?;
    let Some(newest) = dumps.first() else {
        bail!("No dump files found in {}", common.data_dir.display());
    };
    let label = newest.date.clone();
    info!(count = dumps.len(), newest = %label, "Found dump files");

    let summary = process_dumps(&dumps, processor);
    info!(
        processed = summary.processed,
        failed = summary.failed,
        "Finished dump files"
    );
    if summary.processed == 0 {
        bail!("No dump file could be processed");
    }
    Ok(label)
}

fn scan(common: &CommonArgs, processor: DumpProcessor<'_>) -> Result<String> {
    let pb = spinner();
    let mut processor = processor
        .with_page_limit(common.limit)
        .with_progress(pb.clone());
    let label = run_inputs(common, &mut processor);
    pb.finish_and_clear();
    processor.log_report();
    label
}

fn run_edits(common: &CommonArgs, args: EditsArgs) -> Result<()> {
    let bots = match &args.bots {
        Some(path) => BotList::from_file(path)?,
        None => BotList::default(),
    };
    let mut stats = StatsCounter::new();
    let mut edits = EditCountAggregator::new(bots);
    let mut events = DebugLogger::new();

    let label = {
        let mut processor = DumpProcessor::new();
        if common.log_events {
            processor.register(&mut events);
        }
        processor.register(&mut stats);
        processor.register(&mut edits);
        scan(common, processor)?
    };

    let path = common.output.join(format!("edits-{}.csv", label));
    edits.write_results(create_csv(&path)?)?;
    info!(path = %path.display(), "Wrote daily edit counts");

    let path = common.output.join(format!("editsByUser-{}.csv", label));
    edits.write_edits_by_user(create_csv(&path)?)?;
    info!(path = %path.display(), "Wrote edits by user");

    let totals = edits.totals();
    println!();
    println!("=== Edits ===");
    println!("Bots:        {}", totals.bots);
    println!("Humans:      {}", totals.humans);
    println!("Anonymous:   {}", totals.anons);
    println!("Total:       {}", totals.total());
    Ok(())
}

fn run_export(common: &CommonArgs, args: ExportArgs) -> Result<()> {
    if args.kb.is_none() && args.turtle.is_none() && args.database.is_none() {
        bail!("Nothing to export: pass --kb, --turtle or --database");
    }
    let max_timestamp = args
        .max_date
        .as_deref()
        .map(|date| {
            DayDate::parse_date(date)
                .map(|date| date.start_timestamp())
                .with_context(|| format!("Invalid --max-date: {}", date))
        })
        .transpose()?;

    let filter = EntityFilter::new()
        .with_languages(args.languages)
        .with_sites(args.sites)
        .with_property_types(args.property_types)
        .with_statements(!args.no_statements)
        .with_references(!args.no_references);

    let mut kb = match &args.kb {
        Some(path) => Some(KbWriter::new(OutputFile::create(path)?)),
        None => None,
    };
    let mut turtle = match &args.turtle {
        Some(path) => Some(TurtleWriter::new(OutputFile::create(path)?, filter)?),
        None => None,
    };
    let mut store = args.database.as_deref().map(SqliteStore::open).transpose()?;
    let mut database = store
        .as_mut()
        .map(|store| DatabaseWriter::new(store as &mut dyn EntityStore));

    let mut stats = StatsCounter::new();
    let mut events = DebugLogger::new();
    let mut resolver = LatestRevisionResolver::new().with_max_timestamp(max_timestamp);
    if let Some(kb) = kb.as_mut() {
        resolver.register(kb);
    }
    if let Some(turtle) = turtle.as_mut() {
        resolver.register(turtle);
    }
    if let Some(database) = database.as_mut() {
        resolver.register(database);
    }

    let start = Instant::now();
    {
        let mut processor = DumpProcessor::new();
        if common.log_events {
            processor.register(&mut events);
        }
        processor.register(&mut stats);
        processor.register(&mut resolver);
        scan(common, processor)?;
    }
    resolver.close_processors()?;

    println!();
    println!("=== Export ===");
    println!("Time:               {:.2}s", start.elapsed().as_secs_f64());
    println!("Entities exported:  {}", resolver.entities_found());
    println!("Order anomalies:    {}", resolver.order_anomalies());
    println!("Processor failures: {}", resolver.processor_failures());
    Ok(())
}

fn run_revstats(common: &CommonArgs, args: DatabaseArgs) -> Result<()> {
    let path = args.path(common);
    let mut store = SqliteStore::open(&path)?;
    {
        let mut stats = StatsCounter::new();
        let mut events = DebugLogger::new();
        let mut recorder = RevisionStatsRecorder::new(&mut store);
        {
            let mut processor = DumpProcessor::new();
            if common.log_events {
                processor.register(&mut events);
            }
            processor.register(&mut stats);
            processor.register(&mut recorder);
            scan(common, processor)?;
        }
        let (items, properties) = recorder.recorded();
        println!();
        println!("=== Revision statistics ===");
        println!("Item rows:      {}", items);
        println!("Property rows:  {}", properties);
        println!("Stale:          {}", recorder.stale());
        println!("Errors:         {}", recorder.errors());
    }
    store.close()?;
    info!(path = %path.display(), "Database updated");
    Ok(())
}

fn run_history(common: &CommonArgs, args: DatabaseArgs) -> Result<()> {
    let db_path = args.path(common);
    if !db_path.exists() {
        bail!("Database not found: {}", db_path.display());
    }
    let store = SqliteStore::open(&db_path)?;
    let history = StatHistory::from_store(&store)?;

    let path = common.output.join("history.csv");
    history.write_csv(create_csv(&path)?)?;
    info!(path = %path.display(), days = history.days().len(), "Wrote statistics history");
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

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Edits(args) => run_edits(&cli.common, args),
        Commands::Export(args) => run_export(&cli.common, args),
        Commands::Revstats(args) => run_revstats(&cli.common, args),
        Commands::History(args) => run_history(&cli.common, args),
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
