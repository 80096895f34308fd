use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use finlayer::pipeline::facts;
use finlayer::{logging, metrics, Entity, Orchestrator, Settings, Store};

#[derive(Parser)]
#[command(name = "finlayer")]
#[command(about = "Layered consolidation of market, reference and macro time series")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to ./finlayer.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Land, rank and promote the batches of one run date
    Run {
        /// Partition date to load (YYYY-MM-DD), defaults to today
        #[arg(long)]
        run_date: Option<NaiveDate>,
        /// Entities to run (comma-separated). Available: ohlcv, company_meta, macro, exchange_rate
        #[arg(long, value_delimiter = ',')]
        entities: Vec<Entity>,
    },
    /// Apply pending schema migrations
    Migrate,
    /// Show row counts per layer and the last run
    Status {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print analytical facts computed from the silver layer
    Facts {
        #[command(subcommand)]
        view: FactsView,
    },
}

#[derive(Subcommand)]
enum FactsView {
    /// Daily returns, rolling volatility and rolling average close
    Stocks {
        #[arg(long)]
        ticker: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Year-over-year macro indicator changes
    Macro {
        #[arg(long)]
        country: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Csv,
}

fn open_store(settings: &Settings) -> anyhow::Result<Store> {
    let mut store = Store::open(&settings.store.path, settings.store.busy_timeout_ms)
        .with_context(|| format!("opening store at {}", settings.store.path.display()))?;
    let applied = store.migrate()?;
    if applied > 0 {
        info!(applied, "schema migrations applied");
    }
    Ok(store)
}

fn print_rows<T: Serialize>(rows: &[T], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Csv => print!("{}", facts::to_csv(rows)?),
        OutputFormat::Json | OutputFormat::Text => println!("{}", facts::to_json(rows)?),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref())?;
    let _log_guard = logging::init_logging(&settings.logging)?;
    metrics::init_metrics(&settings.metrics);

    match cli.command {
        Commands::Run { run_date, entities } => {
            let run_date = run_date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let entities = if entities.is_empty() {
                Entity::ALL.to_vec()
            } else {
                entities
            };

            let mut store = open_store(&settings)?;
            let report = Orchestrator::new(&mut store, &settings).run(run_date, &entities)?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if let Some(reason) = &report.aborted {
                bail!("run {} aborted: {}", report.run_id, reason);
            }
            if report.failed() > 0 {
                bail!(
                    "run {} finished with {} failed entities",
                    report.run_id,
                    report.failed()
                );
            }
        }
        Commands::Migrate => {
            let mut store = Store::open(&settings.store.path, settings.store.busy_timeout_ms)?;
            let applied = store.migrate()?;
            println!(
                "✅ {} migration(s) applied, schema at version {}",
                applied,
                store.schema_version()?
            );
        }
        Commands::Status { format } => {
            let store = open_store(&settings)?;
            let counts = Entity::ALL
                .iter()
                .map(|e| store.layer_counts(e.spec()))
                .collect::<finlayer::Result<Vec<_>>>()?;
            match format {
                OutputFormat::Text => {
                    println!(
                        "{:<14} {:>8} {:>8} {:>8} {:>8} {:>8}",
                        "entity", "raw", "lineage", "ranked", "clean", "silver"
                    );
                    for c in &counts {
                        println!(
                            "{:<14} {:>8} {:>8} {:>8} {:>8} {:>8}",
                            c.entity, c.raw, c.lineage, c.ranked, c.clean, c.silver
                        );
                    }
                    match store.last_run()? {
                        Some(run) => println!(
                            "\n📊 Last run {} ({}): {} succeeded, {} skipped, {} failed, finished {}",
                            run.run_id,
                            run.run_date,
                            run.succeeded,
                            run.skipped,
                            run.failed,
                            run.finished_at
                        ),
                        None => println!("\nNo runs recorded yet"),
                    }
                }
                other => print_rows(&counts, other)?,
            }
        }
        Commands::Facts { view } => {
            let store = open_store(&settings)?;
            match view {
                FactsView::Stocks { ticker, format } => {
                    let rows = facts::stock_facts(&store, settings.facts, ticker.as_deref())?;
                    print_rows(&rows, format)?;
                }
                FactsView::Macro { country, format } => {
                    let rows = facts::macro_facts(&store, country.as_deref())?;
                    print_rows(&rows, format)?;
                }
            }
        }
    }

    Ok(())
}
