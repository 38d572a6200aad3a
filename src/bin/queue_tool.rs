use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use heartlink::queue::{FileQueueStore, QueueStore, QueuedReading};
use heartlink::HeartlinkConfig;
use tracing::{info, warn};

/// Inspect or clear the persisted offline queue.
#[derive(Parser, Debug)]
#[command(name = "queuetool")]
#[command(about = "Inspect the heartlink offline queue file")]
struct Args {
    /// Queue file (defaults to queue.path in the configuration)
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Path to heartlink configuration file (for the queue path)
    #[arg(short = 'c', long, default_value = "heartlink.toml")]
    config: PathBuf,

    /// Print the number of queued readings
    #[arg(long, conflicts_with_all = ["dump", "clear"])]
    count: bool,

    /// Print every queued reading as one JSON line, oldest first
    #[arg(long, conflicts_with = "clear")]
    dump: bool,

    /// Remove every queued reading
    #[arg(long)]
    clear: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let path = match args.path {
        Some(path) => path,
        None => PathBuf::from(load_queue_path(&args.config)?),
    };
    let store = FileQueueStore::new(&path);

    if args.clear {
        let before = load_records(&store).await?.len();
        store
            .save(&[])
            .await
            .with_context(|| format!("Failed to clear {}", path.display()))?;
        info!("Cleared {} queued reading(s) from {}", before, path.display());
        println!("cleared {}", before);
        return Ok(());
    }

    let records = load_records(&store).await?;

    if args.dump {
        for record in &records {
            let line = serde_json::to_string(record)
                .with_context(|| format!("Failed to render record {}", record.position))?;
            println!("{}", line);
        }
        return Ok(());
    }

    // --count is the default action
    println!("{}", records.len());
    if let (Some(first), Some(last)) = (records.first(), records.last()) {
        info!(
            "Queued readings span {} to {}",
            first.reading.recorded_at, last.reading.recorded_at
        );
    }
    Ok(())
}

fn load_queue_path(config_path: &Path) -> Result<String> {
    if config_path.exists() {
        let cfg = HeartlinkConfig::load_from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
        Ok(cfg.queue.path)
    } else {
        warn!(
            "Config file {} not found, using built-in defaults",
            config_path.display()
        );
        Ok(HeartlinkConfig::default().queue.path)
    }
}

async fn load_records(store: &FileQueueStore) -> Result<Vec<QueuedReading>> {
    store
        .load()
        .await
        .with_context(|| format!("Failed to read {}", store.path().display()))
}
