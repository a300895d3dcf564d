mod config;
mod display;
mod ingest;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use cargobill_cache::{DirCache, QuotaMonitor, spawn_quota_watch};
use cargobill_core::{RateBook, RateDefinition, Rule, RuleListKind, RuleSet};
use cargobill_store::{
    AssignMode, JsonFileStore, RecordStore, assign_records, delete_in_batches, plan_assignments,
    reorder_and_persist,
};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

/// Rule-based customer and rate assignment for cargo and mail records.
#[derive(Parser)]
#[command(name = "cargobill", version)]
struct Cli {
    /// Record store file
    #[arg(long, global = true, env = "CARGOBILL_STORE", default_value = "cargobill.json")]
    store: PathBuf,

    /// Local cache directory
    #[arg(long, global = true, env = "CARGOBILL_CACHE_DIR", default_value = ".cargobill-cache")]
    cache_dir: PathBuf,

    /// JSON settings file (ingest, quota, and field names)
    #[arg(long, global = true, env = "CARGOBILL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage customer and rate rule lists
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },

    /// Manage rate definitions
    Rates {
        #[command(subcommand)]
        command: RatesCommand,
    },

    /// Import a JSON array of rows into the store
    Ingest {
        file: PathBuf,
        /// Records per write
        #[arg(long, env = "CARGOBILL_CHUNK_SIZE")]
        chunk_size: Option<usize>,
        /// Fraction of rows allowed to fail conversion (0.0 to 1.0)
        #[arg(long, env = "CARGOBILL_MAX_DROP_RATE")]
        max_drop_rate: Option<f64>,
    },

    /// Resolve every record against a rule list and write the result back
    Assign {
        #[arg(long)]
        kind: RuleListKind,
        /// Print the assignments without writing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete records
    Delete {
        /// Delete every record
        #[arg(long, conflicts_with = "ids")]
        all: bool,
        /// Record ids to delete
        #[arg(long, num_args = 1.., required_unless_present = "all")]
        ids: Vec<String>,
    },

    /// Inspect or clean the local cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum RulesCommand {
    /// Replace a rule list with the rules in a JSON file
    Import {
        #[arg(long)]
        kind: RuleListKind,
        file: PathBuf,
    },
    /// Append one rule (JSON object) at the lowest priority
    Add {
        #[arg(long)]
        kind: RuleListKind,
        file: PathBuf,
    },
    /// Remove a rule and close the gap in priorities
    Remove {
        #[arg(long)]
        kind: RuleListKind,
        id: String,
    },
    /// Enable or disable a rule
    Toggle {
        #[arg(long)]
        kind: RuleListKind,
        id: String,
        #[arg(long, action = clap::ArgAction::Set)]
        active: bool,
    },
    /// Print a rule list in priority order
    List {
        #[arg(long)]
        kind: RuleListKind,
    },
    /// Move a rule onto another rule's position
    Reorder {
        #[arg(long)]
        kind: RuleListKind,
        #[arg(long)]
        moved: String,
        #[arg(long)]
        target: String,
    },
}

#[derive(Subcommand)]
enum RatesCommand {
    /// Replace the rate definitions with those in a JSON file
    Import { file: PathBuf },
    List,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show usage against the quota
    Status,
    /// Run progressive cleanup now
    Cleanup,
    /// Print a quota reading every watch interval until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    debug!(version = env!("CARGO_PKG_VERSION"), store = %cli.store.display(), "cargobill");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Interrupted, stopping after the current batch...");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Cache { command } => {
            let monitor = open_cache(&cli.cache_dir, &config).await?;
            run_cache(command, monitor, &cancel).await
        }
        Commands::Rules { command } => run_rules(&open_store(&cli.store).await?, command).await,
        Commands::Rates { command } => run_rates(&open_store(&cli.store).await?, command).await,
        Commands::Ingest {
            file,
            chunk_size,
            max_drop_rate,
        } => {
            let mut settings = config.ingest.clone();
            if let Some(n) = chunk_size {
                settings.chunk_size = n;
            }
            if let Some(rate) = max_drop_rate {
                settings.max_drop_rate = rate;
            }
            let store = open_store(&cli.store).await?;
            let monitor = open_cache(&cli.cache_dir, &config).await?;
            run_ingest(&store, &monitor, &file, settings, &cancel).await
        }
        Commands::Assign { kind, dry_run } => {
            run_assign(&open_store(&cli.store).await?, &config, kind, dry_run).await
        }
        Commands::Delete { all, ids } => {
            run_delete(&open_store(&cli.store).await?, &config, all, ids, &cancel).await
        }
    }
}

async fn open_store(path: &Path) -> anyhow::Result<JsonFileStore> {
    JsonFileStore::open(path)
        .await
        .with_context(|| format!("opening store {}", path.display()))
}

async fn open_cache(dir: &Path, config: &AppConfig) -> anyhow::Result<Arc<QuotaMonitor>> {
    let cache = DirCache::open(dir, config.quota.quota_bytes)
        .await
        .with_context(|| format!("opening cache {}", dir.display()))?;
    Ok(Arc::new(QuotaMonitor::new(Arc::new(cache), config.quota.clone())))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

async fn load_rules(store: &JsonFileStore, kind: RuleListKind) -> anyhow::Result<RuleSet> {
    let rules = store
        .fetch_rules(kind)
        .await
        .with_context(|| format!("loading {kind} rules"))?;
    RuleSet::new(rules).with_context(|| format!("stored {kind} rules are inconsistent"))
}

async fn run_rules(store: &JsonFileStore, command: RulesCommand) -> anyhow::Result<()> {
    let (kind, next) = match command {
        RulesCommand::List { kind } => {
            display::print_rules(kind, &load_rules(store, kind).await?);
            return Ok(());
        }
        RulesCommand::Reorder {
            kind,
            moved,
            target,
        } => {
            let current = load_rules(store, kind).await?;
            if current.get(&moved).is_none() || current.get(&target).is_none() {
                bail!("both --moved and --target must name existing {kind} rules");
            }
            let next = reorder_and_persist(store, kind, &current, &moved, &target, |set| {
                debug!(version = set.version, "rule list changed")
            })
            .await
            .context("reorder was rolled back")?;
            display::print_rules(kind, &next);
            return Ok(());
        }
        RulesCommand::Import { kind, file } => {
            let rules: Vec<Rule> = read_json(&file)?;
            (kind, RuleSet::new(rules)?)
        }
        RulesCommand::Add { kind, file } => {
            let rule: Rule = read_json(&file)?;
            (kind, load_rules(store, kind).await?.with_rule(rule)?)
        }
        RulesCommand::Remove { kind, id } => (kind, load_rules(store, kind).await?.without_rule(&id)?),
        RulesCommand::Toggle { kind, id, active } => {
            (kind, load_rules(store, kind).await?.with_active(&id, active)?)
        }
    };

    store
        .save_rules(kind, next.rules())
        .await
        .with_context(|| format!("saving {kind} rules"))?;
    display::print_rules(kind, &next);
    Ok(())
}

async fn run_rates(store: &JsonFileStore, command: RatesCommand) -> anyhow::Result<()> {
    match command {
        RatesCommand::Import { file } => {
            let rates: Vec<RateDefinition> = read_json(&file)?;
            store.save_rates(&rates).await.context("saving rates")?;
            eprintln!("  Imported {} rate definitions", rates.len());
            display::print_rates(&rates);
        }
        RatesCommand::List => display::print_rates(&store.fetch_rates().await?),
    }
    Ok(())
}

async fn run_ingest(
    store: &JsonFileStore,
    monitor: &QuotaMonitor,
    file: &Path,
    settings: cargobill_core::IngestSettings,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let stats = ingest::run_ingest(store, monitor, file, settings, cancel).await?;
    let report = &stats.report;
    if report.cancelled {
        eprintln!(
            "  Cancelled: {}/{} records saved before the stop",
            report.saved_count, report.total_count
        );
    } else {
        eprintln!(
            "  Saved {} records in {} batches ({:.1}s)",
            report.saved_count, report.batches_written, stats.elapsed_secs
        );
    }
    if !report.rejected.is_empty() {
        eprintln!("  Skipped {} rows:", report.rejected.len());
        for r in report.rejected.iter().take(20) {
            eprintln!("    row {}: {}", r.row + 1, r.error);
        }
    }
    if stats.cached {
        eprintln!("  Cached as dataset {}", stats.dataset_id);
    }
    Ok(())
}

async fn run_assign(
    store: &JsonFileStore,
    config: &AppConfig,
    kind: RuleListKind,
    dry_run: bool,
) -> anyhow::Result<()> {
    let rules = load_rules(store, kind).await?;
    let book = match kind {
        RuleListKind::Rate => RateBook::new(store.fetch_rates().await.context("loading rates")?),
        RuleListKind::Customer => RateBook::default(),
    };
    let mode = match kind {
        RuleListKind::Customer => AssignMode::Customer,
        RuleListKind::Rate => AssignMode::Rate(&book),
    };

    if dry_run {
        let records = store.fetch_records(None).await.context("loading records")?;
        display::print_plan(&plan_assignments(&records, &rules, mode, &config.fields));
        return Ok(());
    }

    let outcome = assign_records(store, &rules, mode, &config.fields, config.ingest.chunk_size)
        .await
        .context("assigning records")?;
    display::print_plan(&outcome.plan);
    display::print_update_report(&outcome.report);
    Ok(())
}

async fn run_delete(
    store: &JsonFileStore,
    config: &AppConfig,
    all: bool,
    ids: Vec<String>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let ids = if all {
        store
            .fetch_records(None)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect()
    } else {
        ids
    };
    let report = delete_in_batches(store, &ids, config.ingest.chunk_size, cancel).await?;
    if report.cancelled {
        eprintln!("  Cancelled after deleting {} records", report.deleted);
    } else {
        eprintln!("  Deleted {} records", report.deleted);
    }
    Ok(())
}

async fn run_cache(
    command: CacheCommand,
    monitor: Arc<QuotaMonitor>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let quota_bytes = monitor.settings().quota_bytes;
    match command {
        CacheCommand::Status => {
            display::print_quota(&monitor.check_quota().await?, quota_bytes);
            display::print_entries(&monitor.cache().entries().await?);
        }
        CacheCommand::Cleanup => {
            let report = monitor
                .perform_progressive_cleanup(|p| {
                    eprintln!(
                        "  [{}/{}] {}: removed {}",
                        p.step, p.total_steps, p.description, p.items_removed
                    )
                })
                .await;
            display::print_cleanup(&report);
        }
        CacheCommand::Watch => {
            let interval = monitor.settings().watch_interval;
            let (handle, mut rx) = spawn_quota_watch(monitor, interval);
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let status = *rx.borrow_and_update();
                        println!(
                            "  {:.1}% used, {} bytes free{}",
                            status.percentage,
                            status.available_bytes,
                            if status.is_full { " (full)" } else if status.is_near_limit { " (near limit)" } else { "" }
                        );
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            drop(rx);
            handle.await.context("quota watch task")?;
        }
    }
    Ok(())
}
