use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use racing_registry::{
    ChangeLog, EditContext, ImportMode, RefreshOutcome, Registry, RegistryConfig,
};
use std::fs::File;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const CLI_SOURCE: &str = "cli";

#[derive(Parser)]
#[command(name = "racing-registry", version, about = "Racing registry: results, grades, titles, audit")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database (overrides config and environment)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Editor recorded in the change log
    #[arg(long, global = true)]
    actor: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init,
    /// Print a dog with its awarded titles
    Show { cwa: String },
    /// Preview grade and qualifying titles without writing
    Evaluate { cwa: String },
    /// Recompute stats, grade and titles for one dog
    Refresh { cwa: String },
    /// Refresh every dog
    RefreshAll,
    /// Reconcile titles against stored counters only
    Reconcile { cwa: String },
    /// Re-rank a meet from its race results and update its meet results
    Rollup { meet: String },
    /// Show change-log entries (all, one record, or one editor's)
    History {
        #[arg(long, requires = "key", conflicts_with = "by")]
        table: Option<String>,
        #[arg(long, requires = "table")]
        key: Option<String>,
        /// Entries written by this editor
        #[arg(long)]
        by: Option<String>,
    },
    /// Load meet results from a CSV file
    ImportResults {
        csv: PathBuf,
        #[arg(long, default_value_t = ImportMode::Insert)]
        mode: ImportMode,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = RegistryConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    let actor = cli.actor.unwrap_or_else(|| config.default_actor.clone());
    let ctx = EditContext::now(actor, CLI_SOURCE);

    let mut registry = Registry::open(&config)
        .with_context(|| format!("Failed to open {}", config.database_path.display()))?;

    match cli.command {
        Command::Init => {
            println!("✓ Database ready at {}", config.database_path.display());
        }
        Command::Show { cwa } => {
            let dog = registry.get_dog(&cwa)?;
            println!("{}", serde_json::to_string_pretty(&dog)?);
            let titles = registry.list_dog_titles(&cwa)?;
            let codes: Vec<&str> = titles.iter().map(|t| t.title.as_str()).collect();
            println!("Titles: {}", if codes.is_empty() { "-".to_string() } else { codes.join(", ") });
        }
        Command::Evaluate { cwa } => {
            let eligibility = registry.evaluate_dog(&cwa, ctx.at.date_naive())?;
            println!("{}", serde_json::to_string_pretty(&eligibility)?);
        }
        Command::Refresh { cwa } => {
            let outcome = registry
                .refresh_dog(&cwa, &ctx)
                .with_context(|| format!("Failed to refresh {}", cwa))?;
            print_refresh(&outcome);
        }
        Command::RefreshAll => {
            let outcomes = registry.refresh_all_dogs(&ctx)?;
            for outcome in &outcomes {
                print_refresh(outcome);
            }
            println!("✓ {} dogs refreshed", outcomes.len());
        }
        Command::Reconcile { cwa } => {
            let report = registry.reconcile_dog_titles(&cwa, &ctx)?;
            println!("{}", report.summary());
        }
        Command::Rollup { meet } => {
            let rollup = registry
                .rollup_meet(&meet, &ctx)
                .with_context(|| format!("Failed to roll up {}", meet))?;
            for (index, cwa) in rollup.placements.iter().enumerate() {
                println!("  {:>3}. {}", index + 1, cwa);
            }
            println!(
                "✓ {}: {} meet results created, {} updated",
                rollup.meet_number,
                rollup.inserted.len(),
                rollup.updated.len()
            );
        }
        Command::History { table, key, by } => {
            let entries = match (table, key, by) {
                (Some(table), Some(key), _) => registry.change_log_for_record(&table, &key)?,
                (_, _, Some(by)) => registry.change_log_for_actor(&by)?,
                _ => registry.change_log()?,
            };
            for entry in &entries {
                print_entry(entry);
            }
        }
        Command::ImportResults { csv, mode } => {
            let file = File::open(&csv).with_context(|| format!("Failed to open {}", csv.display()))?;
            let summary = registry.import_meet_results(file, mode, &ctx)?;
            println!("✓ {}", summary.summary());
            for row in &summary.row_errors {
                eprintln!("  line {}: {}", row.line, row.message);
            }
        }
    }

    Ok(())
}

fn print_refresh(outcome: &RefreshOutcome) {
    println!(
        "{}: grade {}, average {:.2}, {} meets{}",
        outcome.dog.cwa_number,
        outcome.dog.current_grade,
        outcome.dog.average,
        outcome.dog.meet_appearances,
        if outcome.stats_changed { " (updated)" } else { "" }
    );
    println!("  {}", outcome.titles.summary());
}

fn print_entry(entry: &ChangeLog) {
    println!(
        "#{:<5} {} {:<6} {:<10} {:<30} by {} ({})",
        entry.id,
        entry.changed_at.format("%Y-%m-%d %H:%M:%S"),
        entry.operation.as_str(),
        entry.changed_table,
        entry.record_pk,
        entry.changed_by,
        entry.source
    );
}
