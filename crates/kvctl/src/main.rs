//! kvctl - command-line wrapper around the embedded store and invalidation log

mod handler;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use kvstore::EmbeddedStore;
use stampede::{Context, LogConfig, DEFAULT_CHECKPOINT_KEY, DEFAULT_MAX_LEN, DEFAULT_STREAM};
use tracing::{debug, error};

use crate::handler::CommandHandler;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./data")]
    data: PathBuf,

    /// Invalidation stream name
    #[arg(long, default_value = DEFAULT_STREAM)]
    stream: String,

    /// Maximum retained invalidation events
    #[arg(long, default_value_t = DEFAULT_MAX_LEN)]
    max_len: usize,

    /// Key holding the consumer checkpoint
    #[arg(long, default_value = DEFAULT_CHECKPOINT_KEY)]
    checkpoint_key: String,

    /// How long stream reads wait for new events (milliseconds)
    #[arg(long, default_value_t = 100)]
    block_ms: u64,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ping the store
    Ping,

    /// Get a key
    GetKey {
        /// Key to read
        key: String,
    },

    /// Set a key and record its invalidation
    SetKey {
        /// Key to write
        key: String,
        /// Value to store
        value: String,
    },

    /// Read invalidation events (from the checkpoint unless --from is given)
    ReadStream {
        /// Read after this id instead of the checkpoint; does not advance it
        #[arg(long)]
        from: Option<String>,
    },

    /// Show the oldest retained invalidation events
    Range {
        /// Maximum entries to show
        #[arg(short, long, default_value_t = 10)]
        count: usize,
    },

    /// Demonstrate stampede prevention on an in-memory store
    Demo {
        /// Concurrent callers
        #[arg(long, default_value_t = 5)]
        callers: usize,
        /// Simulated load time (milliseconds)
        #[arg(long, default_value_t = 2000)]
        delay_ms: u64,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Logs go to stderr; stdout carries command output
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match run(args).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            error!("Command failed: {:#}", e);
            println!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<String> {
    debug!(data = %args.data.display(), stream = %args.stream, "Opening store");

    let config = LogConfig {
        stream: args.stream,
        max_len: args.max_len,
        checkpoint_key: args.checkpoint_key,
        ..LogConfig::default()
    }
    .with_block_timeout(Duration::from_millis(args.block_ms));

    let store = Arc::new(EmbeddedStore::open(&args.data)?);
    let handler = CommandHandler::new(Context::new(Arc::clone(&store), config));

    let output = match args.command {
        Command::Ping => handler.ping().await,
        Command::GetKey { key } => handler.get_key(&key).await,
        Command::SetKey { key, value } => handler.set_key(&key, &value).await,
        Command::ReadStream { from } => handler.read_stream(from.as_deref()).await,
        Command::Range { count } => handler.range(count).await,
        Command::Demo { callers, delay_ms } => {
            handler.demo(callers, Duration::from_millis(delay_ms)).await
        }
    };

    store.close()?;
    output
}
