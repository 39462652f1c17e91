//! LedgerKV - An In-Memory Key-Value Store with an Append-Only Log
//!
//! This is the main entry point for the LedgerKV server.
//! It replays the log, sets up the TCP listener, and handles incoming
//! connections until a shutdown signal arrives.

use anyhow::Context;
use ledgerkv::aof::{self, AofConfig, AppendLog, FsyncPolicy, ReplayPolicy};
use ledgerkv::commands::CommandHandler;
use ledgerkv::connection::{handle_connection, ConnectionStats};
use ledgerkv::pubsub::{DeliveryPolicy, PubSub, PubSubConfig};
use ledgerkv::storage::{ExpiryConfig, ExpirySweeper, Store};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Append-only log settings; `None` runs without durability
    aof: Option<AofConfig>,
    expiry: ExpiryConfig,
    pubsub: PubSubConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: ledgerkv::DEFAULT_HOST.to_string(),
            port: ledgerkv::DEFAULT_PORT,
            aof: Some(AofConfig::default()),
            expiry: ExpiryConfig::default(),
            pubsub: PubSubConfig::default(),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();
        let mut aof = AofConfig::default();
        let mut aof_enabled = true;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = flag_value(&args, i).to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = parse_flag(&args, i);
                    i += 2;
                }
                "--aof" => {
                    aof.path = PathBuf::from(flag_value(&args, i));
                    i += 2;
                }
                "--no-aof" => {
                    aof_enabled = false;
                    i += 1;
                }
                "--replay" => {
                    aof.replay = match flag_value(&args, i) {
                        "strict" => ReplayPolicy::Strict,
                        "lenient" => ReplayPolicy::Lenient,
                        other => invalid(&args[i], other),
                    };
                    i += 2;
                }
                "--fsync" => {
                    aof.fsync = match flag_value(&args, i) {
                        "always" => FsyncPolicy::Always,
                        "everysec" => FsyncPolicy::EverySecond,
                        "no" => FsyncPolicy::Never,
                        other => invalid(&args[i], other),
                    };
                    i += 2;
                }
                "--sweep-interval-ms" => {
                    let ms: u64 = parse_flag(&args, i);
                    if ms == 0 {
                        invalid(&args[i], "0");
                    }
                    config.expiry.interval = Duration::from_millis(ms);
                    i += 2;
                }
                "--subscriber-queue" => {
                    let capacity: usize = parse_flag(&args, i);
                    if capacity == 0 {
                        invalid(&args[i], "0");
                    }
                    config.pubsub.queue_capacity = capacity;
                    i += 2;
                }
                "--publish" => {
                    config.pubsub.delivery = match flag_value(&args, i) {
                        "block" => DeliveryPolicy::Block,
                        "drop" => DeliveryPolicy::DropOnFull,
                        other => invalid(&args[i], other),
                    };
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("LedgerKV version {}", ledgerkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config.aof = aof_enabled.then_some(aof);
        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The value following the flag at `args[i]`.
fn flag_value(args: &[String], i: usize) -> &str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} requires a value", args[i]);
            std::process::exit(1);
        }
    }
}

fn parse_flag<T: FromStr>(args: &[String], i: usize) -> T {
    let value = flag_value(args, i);
    value.parse().unwrap_or_else(|_| invalid(&args[i], value))
}

fn invalid(flag: &str, value: &str) -> ! {
    eprintln!("Error: invalid value '{}' for {}", value, flag);
    std::process::exit(1);
}

fn print_help() {
    println!(
        r#"
LedgerKV - An In-Memory Key-Value Store with an Append-Only Log

USAGE:
    ledgerkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>               Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>               Port to listen on (default: 6379)
        --aof <PATH>                Append-only log file (default: appendonly.aof)
        --no-aof                    Run without a log (nothing is persisted)
        --replay <strict|lenient>   What to do with bad log lines on startup (default: lenient)
        --fsync <always|everysec|no>
                                    When to sync the log to disk (default: everysec)
        --sweep-interval-ms <MS>    Time between expiry sweeps (default: 1000)
        --subscriber-queue <N>      Pending messages per subscriber (default: 10)
        --publish <block|drop>      Full subscriber queue: wait or drop (default: block)
    -v, --version                   Print version information
        --help                      Print this help message

EXAMPLES:
    ledgerkv                           # Start on 127.0.0.1:6379
    ledgerkv --port 6380               # Start on port 6380
    ledgerkv --aof /var/lib/kv.aof     # Use a different log file
    ledgerkv --replay strict           # Refuse to start on a bad log line

CONNECTING:
    Any client that can send lines works:
    $ nc 127.0.0.1 6379
    SET name Ariz EX 60
    +OK
    GET name
    $4
    Ariz
"#
    );
}

fn print_banner(config: &Config) {
    let log = match &config.aof {
        Some(aof) => aof.path.display().to_string(),
        None => "disabled".to_string(),
    };
    println!(
        r#"
LedgerKV v{}
──────────────────────────────────────────────────────────────
Server started on {}
Append-only log: {}
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        ledgerkv::VERSION,
        config.bind_address(),
        log
    );
}

/// Builds the store, replaying the log first when one is configured.
fn open_store(config: Option<&AofConfig>) -> anyhow::Result<Store> {
    let store = Store::new();
    let Some(log_config) = config else {
        warn!("Append-only log disabled, writes will not survive a restart");
        return Ok(store);
    };

    let report = aof::replay(&log_config.path, &store, log_config.replay)
        .with_context(|| format!("failed to replay {}", log_config.path.display()))?;
    info!(
        path = %log_config.path.display(),
        applied = report.applied,
        skipped = report.skipped,
        keys = store.len(),
        "Log replayed"
    );

    let log = AppendLog::open(log_config)
        .with_context(|| format!("failed to open {}", log_config.path.display()))?;

    Ok(store.with_log(Arc::new(log)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // The keyspace must be fully rebuilt before the first client connects
    let store = Arc::new(open_store(config.aof.as_ref())?);

    let sweeper = ExpirySweeper::start(Arc::clone(&store), config.expiry.clone());

    let pubsub = Arc::new(PubSub::new(config.pubsub.clone()));
    let handler = CommandHandler::new(Arc::clone(&store), pubsub);
    let stats = Arc::new(ConnectionStats::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Bind the TCP listener
    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());

    print_banner(&config);

    // Main accept loop
    tokio::select! {
        _ = accept_loop(listener, handler, Arc::clone(&stats), shutdown_rx) => {}
        _ = shutdown_signal() => {}
    }

    // Stop accepting, then let connections notice
    let _ = shutdown_tx.send(true);
    sweeper.stop();

    if let Some(log) = store.log() {
        match log.flush() {
            Ok(()) => info!(path = %log.path().display(), "Append-only log flushed"),
            Err(e) => error!(error = %e, "Failed to flush append-only log"),
        }
    }

    let storage = store.stats();
    info!(
        keys = storage.keys,
        gets = storage.get_ops,
        sets = storage.set_ops,
        dels = storage.del_ops,
        expired = storage.expired,
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    shutdown: watch::Receiver<bool>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    handler.clone(),
                    Arc::clone(&stats),
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
