//! Upload queue daemon: flushes locally queued records to their endpoints.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use upload_queue_config_and_utils::{init_logging, Config, Paths};

/// Upload queue command-line interface.
#[derive(Parser)]
#[command(name = "upload-queue")]
#[command(about = "Offline-first upload queue daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config and database. Defaults to ~/.upload-queue
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Flush every configured queue on a timer until interrupted
    Run {
        /// Override the flush interval, in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Send one batch from each queue (or a single queue) and exit
    Flush {
        /// Only flush this queue
        #[arg(short, long)]
        queue: Option<String>,
    },
    /// Show stored and in-flight counts per queue
    Status,
    /// Append a record to a queue
    Enqueue {
        /// Queue id
        #[arg(short, long)]
        queue: String,
        /// Key column as column=value; repeatable. Defaults to a fresh id=<uuid>
        #[arg(short, long = "key")]
        keys: Vec<String>,
        /// Record payload as JSON
        #[arg(short, long)]
        payload: String,
    },
    /// Delete records from a queue
    Clear {
        /// Queue id
        #[arg(short, long)]
        queue: String,
        /// Only records at or before this RFC 3339 timestamp
        #[arg(long)]
        until: Option<String>,
        /// Only the record with this key (column=value; repeatable)
        #[arg(short, long = "key")]
        keys: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;
    config.validate()?;

    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));

    let app = app::App::open(config, paths).await?;

    match cli.command.unwrap_or(Commands::Run { interval_ms: None }) {
        Commands::Run { interval_ms } => {
            app.run(interval_ms.map(std::time::Duration::from_millis))
                .await?;
        }
        Commands::Flush { queue } => {
            for line in app.flush(queue.as_deref()).await? {
                println!("{line}");
            }
        }
        Commands::Status => {
            for line in app.status().await? {
                println!("{line}");
            }
        }
        Commands::Enqueue {
            queue,
            keys,
            payload,
        } => {
            let key = app.enqueue(&queue, &keys, &payload).await?;
            println!("Enqueued {key} on {queue}");
        }
        Commands::Clear { queue, until, keys } => {
            let removed = app.clear(&queue, until.as_deref(), &keys).await?;
            println!("Removed {removed} record(s) from {queue}");
        }
    }

    Ok(())
}
