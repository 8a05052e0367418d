use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use venue_dedup::{
    insert_venues, load_csv, load_file_plan, open_sink, verify_count, ArtifactConfig,
    DedupConfig, DeduplicationEngine, FilePlanSink, RunSummary, SqliteStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Venue directory deduplication", long_about = None)]
struct Cli {
    /// JSON config file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Venue database; overrides config and VENUE_DEDUP_DB
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Emit the summary as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load venues from a CSV file into the store
    Import { csv: PathBuf },

    /// Build and persist the plan without changing anything
    Plan {
        /// Plan file; overrides the configured artifact
        #[arg(long)]
        plan: Option<PathBuf>,
    },

    /// Plan, persist, then apply
    Run {
        #[arg(long)]
        plan: Option<PathBuf>,
    },

    /// Re-apply a persisted file plan, skipping work its progress log marks done
    Replay {
        #[arg(long)]
        plan: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let cli = Cli::parse();
    let mut config = DedupConfig::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.database = db.clone();
    }

    match &cli.command {
        Command::Import { csv } => run_import(&config, csv),
        Command::Plan { plan } => run_plan(config, plan.as_deref(), cli.json),
        Command::Run { plan } => run_dedup(config, plan.as_deref(), cli.json),
        Command::Replay { plan } => run_replay(config, plan, cli.json),
    }
}

fn run_import(config: &DedupConfig, csv_path: &Path) -> Result<()> {
    println!("📂 Loading CSV...");
    let venues = load_csv(csv_path)?;
    println!("✓ Loaded {} venues from CSV", venues.len());

    let store = SqliteStore::open(&config.database)?;
    let inserted = insert_venues(store.connection(), &venues)?;
    let count = verify_count(store.connection())?;

    println!("✓ Inserted {} new venues", inserted);
    println!("✓ Database contains {} venues", count);

    Ok(())
}

fn with_plan_override(mut config: DedupConfig, plan: Option<&Path>) -> DedupConfig {
    if let Some(path) = plan {
        config.artifact = ArtifactConfig::File {
            path: path.to_path_buf(),
        };
    }
    config
}

fn run_plan(config: DedupConfig, plan_path: Option<&Path>, json: bool) -> Result<()> {
    let config = with_plan_override(config, plan_path);
    let store = SqliteStore::open(&config.database)?;
    let mut sink = open_sink(&config.artifact, &config.database)?;

    let engine = DeduplicationEngine::new(config);
    let plan = engine.plan(&store)?;
    sink.write_plan(&plan).context("Failed to persist the plan")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("📋 {}", plan.summary());
        for entry in &plan.entries {
            println!("  • {}", entry.justification);
        }
    }

    Ok(())
}

fn run_dedup(config: DedupConfig, plan_path: Option<&Path>, json: bool) -> Result<()> {
    let config = with_plan_override(config, plan_path);
    let store = SqliteStore::open(&config.database)?;
    let mut sink = open_sink(&config.artifact, &config.database)?;

    let engine = DeduplicationEngine::new(config);
    let report = engine.run(&store, sink.as_mut(), &AtomicBool::new(false))?;

    print_summary(&report.summary, json)
}

fn run_replay(config: DedupConfig, plan_path: &Path, json: bool) -> Result<()> {
    let (plan, resume) = load_file_plan(plan_path)?;
    info!("Loaded plan {} with {} entries", plan.run_id, plan.entries.len());

    let store = SqliteStore::open(&config.database)?;
    let mut sink = FilePlanSink::new(plan_path);

    let engine = DeduplicationEngine::new(config);
    let summary = engine.replay(&plan, &resume, &store, &mut sink, &AtomicBool::new(false));

    print_summary(&summary, json)
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{}", summary.report());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if summary.operations_failed() > 0 {
        println!("⚠️  Some operations failed; replay the plan to retry outstanding removals");
    } else {
        println!("✅ Deduplication complete");
    }

    Ok(())
}
