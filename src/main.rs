// ABOUTME: Entry point for the hostal operator CLI.
// ABOUTME: Loads config from the environment, initializes tracing, and runs one store maintenance command.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hostal_store::{JsonFileSource, LocalStore, MigrationRunner, StoreConfig};

#[derive(Parser)]
#[command(name = "hostal", about = "Inspect and maintain the hostal local store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open (and create or upgrade) the database
    Init,
    /// Import legacy key/value data from a JSON object file, once
    Migrate {
        #[arg(long)]
        from: PathBuf,
    },
    /// Remove expired cache entries
    Sweep,
    /// Inspect and maintain the sync queue
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
    /// Read or write cache entries
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Count entries by status
    Stats,
    /// Print every entry as JSON
    List,
    /// Delete completed entries older than the retention window
    Prune {
        #[arg(long)]
        days: Option<i64>,
    },
    /// Move a dead-lettered entry back to pending
    Requeue { id: i64 },
}

#[derive(Subcommand)]
enum CacheCommand {
    Get {
        key: String,
    },
    Set {
        key: String,
        /// JSON value; anything that does not parse is stored as a string
        value: String,
        #[arg(long)]
        ttl_minutes: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hostal=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = StoreConfig::from_env().context("invalid configuration")?;
    tracing::info!("using database {}", config.database_path().display());

    let store = LocalStore::from_config(config);
    store.open().await.context("failed to open local store")?;

    run(cli.command, &store).await
}

async fn run(command: Command, store: &LocalStore) -> anyhow::Result<()> {
    match command {
        Command::Init => {
            let version = store.collections().schema_version().await?;
            println!("ready at schema version {}", version);
        }
        Command::Migrate { from } => {
            let source = JsonFileSource::load(&from)
                .with_context(|| format!("failed to read legacy data from {}", from.display()))?;
            let report = MigrationRunner::new(store.clone()).run(&source).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Sweep => {
            let removed = store.cache().sweep_expired().await?;
            println!("removed {} expired cache entries", removed);
        }
        Command::Queue { command } => run_queue(command, store).await?,
        Command::Cache { command } => run_cache(command, store).await?,
    }
    Ok(())
}

async fn run_queue(command: QueueCommand, store: &LocalStore) -> anyhow::Result<()> {
    let queue = store.queue();
    match command {
        QueueCommand::Stats => {
            let stats = queue.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        QueueCommand::List => {
            for entry in queue.list_all().await? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        QueueCommand::Prune { days } => {
            let days = days.unwrap_or(store.config().queue_retention_days);
            let removed = queue.prune_completed(days).await?;
            println!("pruned {} completed entries", removed);
        }
        QueueCommand::Requeue { id } => {
            if !queue.requeue(id).await? {
                anyhow::bail!("entry {} is not dead-lettered", id);
            }
            println!("entry {} is pending again", id);
        }
    }
    Ok(())
}

async fn run_cache(command: CacheCommand, store: &LocalStore) -> anyhow::Result<()> {
    let cache = store.cache();
    match command {
        CacheCommand::Get { key } => match cache.get_cache_value(&key).await? {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => anyhow::bail!("no live cache entry for {}", key),
        },
        CacheCommand::Set {
            key,
            value,
            ttl_minutes,
        } => {
            let value = serde_json::from_str(&value)
                .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
            cache.set_cache_value(&key, value, ttl_minutes).await?;
            println!("stored {}", key);
        }
    }
    Ok(())
}
