//! Strata CLI - drive the consolidation engine from the shell
//!
//! Usage:
//!   strata ingest events.jsonl          Record raw activity into the sensory tier
//!   strata consolidate <stage|all>      Run one stage or the full pipeline
//!   strata stats                        Show per-tier statistics
//!   strata search --text report         Search archival records
//!   strata schedule                     Run consolidation periodically until Ctrl-C

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::io::BufRead;
use std::path::PathBuf;
use strata::{
    ConceptFilter, ConsolidationSummary, EngineConfig, EngineStatistics, RawActivity,
    SearchQuery, Stage, StageOverrides, StageReport, Strata,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Strata - Tiered memory consolidation for storage activity")]
#[command(version)]
struct Cli {
    /// Path to data directory
    #[arg(short, long, env = "STRATA_DATA_DIR", default_value = "./strata_data")]
    data_dir: PathBuf,

    /// JSON engine configuration
    #[arg(short, long, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record raw activity events (one JSON object per line)
    Ingest {
        /// Input file; `-` reads stdin
        input: PathBuf,
    },

    /// Promote eligible records to the next tier
    Consolidate {
        /// Stage name, source tier name, or `all`
        stage: String,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Show per-tier statistics
    Stats,

    /// Search archival records
    Search {
        /// Case-insensitive path substring
        #[arg(short, long)]
        text: Option<String>,

        /// Required concept tag (repeatable)
        #[arg(long = "concept")]
        concepts: Vec<String>,

        /// Minimum importance
        #[arg(short, long)]
        min_importance: Option<f64>,

        /// Attach knowledge-graph neighbours
        #[arg(short, long)]
        graph: bool,

        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Run the full pipeline at the configured interval until Ctrl-C
    Schedule {
        /// Interval in seconds (overrides the configuration)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

#[derive(Args)]
struct OverrideArgs {
    /// Minimum record age in days
    #[arg(long)]
    min_age_days: Option<f64>,

    /// Minimum importance score
    #[arg(long)]
    min_importance: Option<f64>,

    /// Maximum candidates per stage
    #[arg(long)]
    batch_limit: Option<usize>,

    /// Classify candidates without writing
    #[arg(long)]
    dry_run: bool,
}

impl From<OverrideArgs> for StageOverrides {
    fn from(args: OverrideArgs) -> Self {
        Self {
            min_age_days: args.min_age_days,
            min_importance: args.min_importance,
            batch_limit: args.batch_limit,
            dry_run: args.dry_run.then_some(true),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,strata=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Commands::Schedule {
        interval: Some(secs),
    } = &cli.command
    {
        config.schedule_interval_secs = *secs;
    }

    let engine = Strata::open(&cli.data_dir, config)
        .await
        .with_context(|| format!("opening data directory {}", cli.data_dir.display()))?;

    match cli.command {
        Commands::Ingest { input } => cmd_ingest(&engine, input, cli.json).await,
        Commands::Consolidate { stage, overrides } => {
            cmd_consolidate(&engine, &stage, overrides.into(), cli.json).await
        }
        Commands::Stats => cmd_stats(&engine, cli.json).await,
        Commands::Search {
            text,
            concepts,
            min_importance,
            graph,
            limit,
        } => {
            let mut query = SearchQuery::default().include_graph(graph).limit(limit);
            query.query_text = text;
            query.min_importance = min_importance;
            if !concepts.is_empty() {
                query = query.with_filter(ConceptFilter::Concepts(concepts.into_iter().collect()));
            }
            cmd_search(&engine, &query, cli.json).await
        }
        Commands::Schedule { .. } => cmd_schedule(&engine).await,
    }
}

fn read_events(input: &PathBuf) -> anyhow::Result<Vec<RawActivity>> {
    let reader: Box<dyn BufRead> = if input.as_os_str() == "-" {
        Box::new(std::io::stdin().lock())
    } else {
        let file = std::fs::File::open(input)
            .with_context(|| format!("opening {}", input.display()))?;
        Box::new(std::io::BufReader::new(file))
    };

    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid activity", index + 1))?;
        events.push(event);
    }
    Ok(events)
}

async fn cmd_ingest(engine: &Strata, input: PathBuf, json: bool) -> anyhow::Result<()> {
    let events = read_events(&input)?;
    let report = engine.ingest(events).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Activity recorded".green().bold());
    println!("  Events:     {}", report.received);
    println!("  Entities:   {}", report.entities);
    println!("  Inserted:   {}", report.inserted.to_string().cyan());
    println!("  Duplicates: {}", report.duplicates);
    if report.rejected > 0 {
        println!("  Rejected:   {}", report.rejected.to_string().yellow());
    }
    Ok(())
}

async fn cmd_consolidate(
    engine: &Strata,
    stage: &str,
    overrides: StageOverrides,
    json: bool,
) -> anyhow::Result<()> {
    if stage == "all" {
        let summary = engine.consolidate_all(&overrides).await;
        if json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_summary(&summary);
        }
        if !summary.failed_stages.is_empty() {
            anyhow::bail!("{} stage(s) failed", summary.failed_stages.len());
        }
        return Ok(());
    }

    let stage: Stage = stage.parse()?;
    let report = engine.consolidate(stage, &overrides).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    match report.error {
        Some(error) => anyhow::bail!("{stage} failed: {error}"),
        None => Ok(()),
    }
}

fn print_report(report: &StageReport) {
    let status = if report.cancelled {
        "cancelled".yellow()
    } else if report.is_success() {
        "ok".green()
    } else {
        "failed".red()
    };
    let dry_run = if report.params.dry_run { " (dry run)" } else { "" };

    println!(
        "{} {}{} [{} ms]",
        report.stage.to_string().bold(),
        status,
        dry_run.dimmed(),
        report.elapsed_ms
    );
    let stats = &report.stats;
    println!(
        "  processed {} | consolidated {} | present {} | below threshold {} | errors {} | edges {}",
        stats.processed,
        stats.consolidated.to_string().cyan(),
        stats.already_present,
        stats.below_threshold,
        stats.errors,
        stats.edges_created
    );
    if let Some(error) = &report.error {
        println!("  {}", error.red());
    }
}

fn print_summary(summary: &ConsolidationSummary) {
    println!("{}", "Consolidation run".bold().underline());
    println!("  Run:  {}", summary.run_id.to_string().dimmed());
    for report in &summary.stages {
        print_report(report);
    }
    println!();
    println!(
        "Total: {} processed, {} consolidated, {} errors in {} ms",
        summary.total_processed,
        summary.total_consolidated.to_string().green(),
        summary.total_errors,
        summary.elapsed_ms
    );
}

async fn cmd_stats(engine: &Strata, json: bool) -> anyhow::Result<()> {
    let stats = engine.statistics().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    print_statistics(&stats);
    Ok(())
}

fn print_statistics(stats: &EngineStatistics) {
    println!("{}", "Strata Statistics".bold().underline());
    println!(
        "  {:<11} {:>8} {:>8} {:>12} {:>10}",
        "tier", "total", "pending", "consolidated", "importance"
    );
    for tier in &stats.tiers {
        if !tier.available {
            println!(
                "  {:<11} {}",
                tier.tier.as_str(),
                tier.error.as_deref().unwrap_or("unavailable").red()
            );
            continue;
        }
        println!(
            "  {:<11} {:>8} {:>8} {:>12} {:>10.2}",
            tier.tier.as_str(),
            tier.total,
            tier.pending,
            tier.consolidated,
            tier.mean_importance
        );
    }
    println!();
    println!("  Graph edges:   {}", stats.edge_count.to_string().cyan());
    println!(
        "  Ontology cache: {} entries, {:.0}% hit rate",
        stats.ontology_cache.entries,
        stats.ontology_cache.hit_rate() * 100.0
    );
}

async fn cmd_search(engine: &Strata, query: &SearchQuery, json: bool) -> anyhow::Result<()> {
    let hits = engine.search(query).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("{}", "No archival records found".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} records", hits.len()).bold());
    for hit in &hits {
        let record = &hit.record;
        println!(
            "  {:.2} | {} | {}",
            record.importance_score,
            record.path,
            record.entity_id.dimmed()
        );
        for neighbor in &hit.neighbors {
            println!(
                "      -> {} ({}, {:.2}) {}",
                neighbor.entity_id.cyan(),
                neighbor.edge_type,
                neighbor.strength,
                neighbor.description.dimmed()
            );
        }
    }
    Ok(())
}

async fn cmd_schedule(engine: &Strata) -> anyhow::Result<()> {
    let mut handle = engine.schedule()?;
    println!(
        "{} every {}s (Ctrl-C to stop)",
        "Scheduler running".green().bold(),
        engine.config().schedule_interval_secs
    );

    tokio::signal::ctrl_c().await?;
    println!("{}", "Stopping scheduler...".yellow());
    handle.shutdown().await;

    if let Some(summary) = handle.last_summary().await {
        print_summary(&summary);
    }
    println!("Completed runs: {}", handle.runs());
    Ok(())
}
