//! Statboard CLI
//!
//! - `collect` - run the configured collectors and store their series
//! - `show` - print a stored series
//! - `serve` - start the reporter API
//! - `config` - write a commented default config

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use statboard::api::{serve, AppState};
use statboard::config::{generate_default_config, Config, LoggingConfig};
use statboard::integrations::{CollectionJob, CollectionRunner, CollectorRegistry};
use statboard::storage::{open_store, MetricStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "statboard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Collect personal activity metrics into calendar-aligned series")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/statboard/config.toml, then ./statboard.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Collect configured metrics and write them to the store
    Collect {
        /// Only this source (fitbit, github, goodreads)
        #[arg(short, long)]
        source: Option<String>,
        /// Only this metric (`steps` or `fitbit.steps`)
        #[arg(short, long)]
        metric: Option<String>,
    },

    /// Print a stored series
    Show {
        /// Full metric name, e.g. fitbit.steps
        metric: String,
        /// Only points after this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
    },

    /// Start the reporter API
    Serve,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing config to {}", path.display()))?;
                println!("Wrote default config to {}", path.display());
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default()?,
    };
    init_tracing(&config.logging);

    tracing::info!("Statboard v{}", env!("CARGO_PKG_VERSION"));

    let store = open_store(&config.storage)
        .with_context(|| format!("opening metric store at {}", config.storage.path.display()))?;

    let result = match cli.command {
        Commands::Collect { source, metric } => {
            collect(&config, Arc::clone(&store), source.as_deref(), metric.as_deref(), &cli.format)
                .await
        }
        Commands::Show { metric, since } => show(store.as_ref(), &metric, since, &cli.format).await,
        Commands::Serve => serve(AppState::from_config(Arc::clone(&store), &config))
            .await
            .context("reporter server failed"),
        Commands::Config { .. } => Ok(()),
    };

    // Release the store even when the command failed
    if let Err(e) = store.close().await {
        tracing::warn!(error = %e, "Closing metric store failed");
    }
    result
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("statboard={},tower_http=info", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn collect(
    config: &Config,
    store: Arc<dyn MetricStore>,
    source: Option<&str>,
    metric: Option<&str>,
    format: &str,
) -> anyhow::Result<()> {
    config.validate()?;

    let jobs = CollectionJob::from_config(config, source, metric);
    if jobs.is_empty() {
        bail!("no configured metrics match the given --source/--metric");
    }

    let registry = Arc::new(CollectorRegistry::from_config(config)?);
    let summary = CollectionRunner::new(registry, store)
        .policy(config.collector.failure_policy)
        .timeout(config.collector.request_timeout())
        .run(jobs)
        .await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for report in &summary.succeeded {
            println!("ok      {:<28} {:>6} points", report.metric, report.points);
        }
        for failure in &summary.failed {
            println!("failed  {:<28} {}", failure.metric, failure.error);
        }
    }

    if !summary.is_clean() {
        bail!("{} metric(s) failed", summary.failed.len());
    }
    Ok(())
}

async fn show(
    store: &dyn MetricStore,
    metric: &str,
    since: Option<NaiveDate>,
    format: &str,
) -> anyhow::Result<()> {
    let since = since
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let points = store.get_metric(metric, since).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&points)?);
        return Ok(());
    }

    if points.is_empty() {
        println!("No points stored for {}", metric);
        return Ok(());
    }

    println!("{:<12} {:>12}", "date", "value");
    for point in &points {
        println!("{:<12} {:>12}", point.date.format("%Y-%m-%d"), point.value);
    }
    Ok(())
}
