//! timedkv - A Sharded Key-Value Store with Expiring Entries
//!
//! This is the entry point of the timedkv daemon. It loads the configuration,
//! starts the store and keeps it running until Ctrl+C.

use std::path::PathBuf;
use timedkv::{Config, TimedStore};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Command-line options. Values given here override the config file.
#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    workers: Option<usize>,
    data_dir: Option<PathBuf>,
    no_persist: bool,
}

impl Args {
    /// Parse options from the process arguments
    fn parse() -> Self {
        let mut parsed = Args::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    parsed.config = Some(PathBuf::from(value_of(&args, i)));
                    i += 2;
                }
                "--workers" | "-w" => {
                    parsed.workers = Some(value_of(&args, i).parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid worker count");
                        std::process::exit(1);
                    }));
                    i += 2;
                }
                "--data-dir" | "-d" => {
                    parsed.data_dir = Some(PathBuf::from(value_of(&args, i)));
                    i += 2;
                }
                "--no-persist" => {
                    parsed.no_persist = true;
                    i += 1;
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("timedkv version {}", timedkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        parsed
    }

    /// Builds the effective configuration
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(workers) = self.workers {
            config.router.workers = workers;
        }
        if let Some(dir) = self.data_dir {
            config.store.save_path = dir;
        }
        if self.no_persist {
            config.store.persist = false;
        }

        config.validate()?;
        Ok(config)
    }
}

fn value_of(args: &[String], i: usize) -> &str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", args[i]);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
timedkv - A Sharded Key-Value Store with Expiring Entries

USAGE:
    timedkv [OPTIONS]

OPTIONS:
    -c, --config <FILE>      Read settings from a TOML file
    -w, --workers <N>        Number of shards (default: 5)
    -d, --data-dir <DIR>     Directory for shard logs (default: ./data/)
        --no-persist         Keep everything in memory only
    -v, --version            Print version information
    -h, --help               Print this help message

EXAMPLES:
    timedkv                             # 5 shards, logs under ./data/
    timedkv --workers 8 -d /var/timedkv # 8 shards under /var/timedkv
    timedkv --no-persist                # In-memory only

LOGGING:
    The level comes from [log] level in the config file and can be
    overridden with RUST_LOG, e.g. RUST_LOG=timedkv=debug
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))?;
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!(
        version = timedkv::VERSION,
        workers = config.router.workers,
        ttl = ?config.router.ttl,
        save_path = %config.store.save_path.display(),
        persist = config.store.persist,
        "Starting timedkv"
    );

    let mut store = TimedStore::open(config)?;
    store.start().await?;
    info!("Store ready. Use Ctrl+C to shut down gracefully.");

    signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping store...");

    store.shutdown().await;

    let stats = store.stats();
    info!(
        gets = stats.gets,
        sets = stats.sets,
        hits = stats.hits,
        misses = stats.misses,
        forwards = stats.forwards,
        "Shutdown complete"
    );
    Ok(())
}
