mod render;
mod topics;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use pulse_core::AppConfig;
use pulse_db::{HarvestStore, MemoryStore};
use pulse_harvest::{ChatClassifier, CollectionCoordinator, Harvester, SourceHandle};
use tracing_subscriber::EnvFilter;

/// Placeholder connection string used when no database is involved.
const IN_MEMORY_DATABASE_URL: &str = "memory://";

#[derive(Debug, Parser)]
#[command(name = "pulse-cli")]
#[command(about = "SentimentPulse harvest-and-classify command line interface")]
struct Cli {
    /// Keep all state in process memory instead of Postgres
    #[arg(long, global = true)]
    in_memory: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Harvest, classify and report a topic in the foreground
    Run {
        topic: String,
        /// Records requested from each source
        #[arg(long)]
        target: Option<u32>,
    },
    /// Start a job in the background and poll it until it finishes
    Submit {
        topic: String,
        /// Records requested from each source
        #[arg(long)]
        target: Option<u32>,
        /// Seconds between status polls
        #[arg(long, default_value = "2")]
        poll_secs: u64,
    },
    /// Show per-source and classification status of a topic's job
    Status { topic: String },
    /// Print the stored report for a topic
    Report {
        topic: String,
        /// Emit the raw report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List every analyzed topic, newest first
    History,
    /// Delete everything stored for a topic
    Delete { topic: String },
    /// Re-classify stored rows that are unlabelled or failed
    Reconcile { topic: String },
    /// Database management commands
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Verify the database connection
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(cli.in_memory)?;
    init_tracing(&config.log_level);

    let Some(command) = cli.command else {
        println!("pulse-cli ready; run `pulse-cli --help` for commands");
        return Ok(());
    };

    if let Commands::Db { command } = &command {
        if cli.in_memory {
            anyhow::bail!("database commands are not available with --in-memory");
        }
        return run_db(&config, command).await;
    }

    let store = build_store(&config, cli.in_memory).await?;
    let target_or_default = |target: Option<u32>| target.unwrap_or(config.default_target_count);

    match command {
        Commands::Run { topic, target } => {
            let harvester = build_harvester(&config, store, load_source_handles(&config)?)?;
            topics::run_topic(&harvester, &topic, target_or_default(target)).await
        }
        Commands::Submit {
            topic,
            target,
            poll_secs,
        } => {
            let harvester = build_harvester(&config, store, load_source_handles(&config)?)?;
            topics::submit_topic(
                &harvester,
                &topic,
                target_or_default(target),
                Duration::from_secs(poll_secs.max(1)),
            )
            .await
        }
        Commands::Status { topic } => {
            let harvester = build_harvester(&config, store, Vec::new())?;
            topics::show_status(&harvester, &topic).await
        }
        Commands::Report { topic, json } => {
            let harvester = build_harvester(&config, store, Vec::new())?;
            topics::show_report(&harvester, &topic, json).await
        }
        Commands::History => {
            let harvester = build_harvester(&config, store, Vec::new())?;
            topics::show_history(&harvester).await
        }
        Commands::Delete { topic } => {
            let harvester = build_harvester(&config, store, Vec::new())?;
            topics::delete_topic(&harvester, &topic).await
        }
        Commands::Reconcile { topic } => {
            let harvester = build_harvester(&config, store, Vec::new())?;
            topics::reconcile_topic(&harvester, &topic).await
        }
        Commands::Db { .. } => Ok(()),
    }
}

/// Load configuration; `--in-memory` does not need `DATABASE_URL`.
fn load_config(in_memory: bool) -> anyhow::Result<AppConfig> {
    let config = pulse_core::build_app_config(|key| match std::env::var(key) {
        Err(_) if in_memory && key == "DATABASE_URL" => Ok(IN_MEMORY_DATABASE_URL.to_string()),
        other => other,
    })?;
    Ok(config)
}

/// `RUST_LOG` wins; otherwise the configured log level applies.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_db(config: &AppConfig, command: &DbCommands) -> anyhow::Result<()> {
    let store = pulse_db::connect_store(config).await?;
    let pool = store.pool();
    match command {
        DbCommands::Ping => {
            pulse_db::ping(pool).await?;
            println!("database connection ok");
        }
        DbCommands::Migrate => {
            let applied = pulse_db::run_migrations(pool).await?;
            println!("applied {applied} migration(s)");
        }
    }
    Ok(())
}

async fn build_store(config: &AppConfig, in_memory: bool) -> anyhow::Result<Arc<dyn HarvestStore>> {
    if in_memory {
        tracing::info!("using in-memory store; nothing will outlive this process");
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(pulse_db::connect_store(config).await?))
}

fn load_source_handles(config: &AppConfig) -> anyhow::Result<Vec<SourceHandle>> {
    let sources = pulse_core::load_sources(&config.sources_path).map_err(|e| {
        anyhow::anyhow!(
            "failed to load sources from {}: {e}",
            config.sources_path.display()
        )
    })?;
    tracing::info!(count = sources.len(), "sources loaded");
    Ok(sources.into_iter().map(SourceHandle::command).collect())
}

fn build_harvester(
    config: &AppConfig,
    store: Arc<dyn HarvestStore>,
    sources: Vec<SourceHandle>,
) -> anyhow::Result<Harvester> {
    let classifier = Arc::new(
        ChatClassifier::from_app_config(config)
            .map_err(|e| anyhow::anyhow!("failed to build classifier client: {e}"))?,
    );
    if !classifier.has_api_key() {
        tracing::warn!(
            "PULSE_CLASSIFIER_API_KEY is not set; records will be labelled NotApplicable"
        );
    }

    let coordinator =
        CollectionCoordinator::new(sources, Duration::from_secs(config.source_timeout_secs));
    Ok(Harvester::new(
        store,
        coordinator,
        classifier.clone(),
        config.classify_concurrency,
    )
    .with_narrator(classifier))
}
