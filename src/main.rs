//! Spillwatch CLI - relays detector output to WebSocket subscribers.
//!
//! This is the main binary entry point. See the `spillwatch` library for the
//! core functionality.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use spillwatch::env::Environment;
use spillwatch::server::{self, AppState, ArtifactStore};
use spillwatch::viewer::{self, OutputFormat, WatchOptions};
use spillwatch::{BroadcastHub, Config, Supervisor};
use tokio_util::sync::CancellationToken;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "spillwatch")]
#[command(about = "Relay vessel anomaly records from a detector process to WebSocket viewers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        /// Config file (defaults to the config directory's config.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Listen address, overriding the config
        #[arg(long)]
        listen: Option<String>,
    },
    /// Subscribe to a relay and print visual deltas
    Watch {
        /// Server address, e.g. http://localhost:3000
        server: String,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
        /// Exit when the connection drops instead of reconnecting
        #[arg(long)]
        no_reconnect: bool,
    },
    /// Show the effective configuration
    Config {
        /// Write it to the config directory
        #[arg(long)]
        save: bool,
    },
}

fn init_logging() -> Result<()> {
    let env = Environment::current();
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(env.default_log_filter()),
    );
    if let Ok(path) = std::env::var("SPILLWATCH_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.format_timestamp_secs().init();
    Ok(())
}

/// Resolves once SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn run_server(config: Config) -> Result<()> {
    log::info!(
        "Starting relay (producer: {}, restart delay: {}ms)",
        config.producer.command_line(),
        config.restart_delay_ms
    );

    let (supervisor, records) = Supervisor::spawn(config.supervisor_options());
    let hub = BroadcastHub::new(supervisor.clone());
    let pump = hub.spawn_pump(records);

    let artifacts = ArtifactStore::new(config.artifact_dir());
    log::info!("Serving artifacts from {}", artifacts.root().display());

    let shutdown = CancellationToken::new();
    let listener = server::bind(&config.listen_addr).await?;
    let server_task = tokio::spawn(server::serve(
        listener,
        AppState::new(hub, artifacts, shutdown.clone()),
    ));

    shutdown_signal().await;
    log::info!("Shutting down...");

    // Subscriptions close first, then the producer is stopped.
    shutdown.cancel();
    supervisor.stop().await;

    server_task.await.context("Server task panicked")??;
    pump.abort();
    log::info!("Shutdown complete");
    Ok(())
}

async fn run_watch(options: WatchOptions) -> Result<()> {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });
    viewer::watch(options, shutdown).await
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let mut config = match config {
                Some(path) => Config::load_from(&path)?,
                None => Config::load()?,
            };
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            run_server(config).await?;
        }
        Commands::Watch {
            server,
            format,
            no_reconnect,
        } => {
            run_watch(WatchOptions {
                server,
                format,
                reconnect: !no_reconnect,
            })
            .await?;
        }
        Commands::Config { save } => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                let path = config.save()?;
                eprintln!("Saved to {}", path.display());
            }
        }
    }

    Ok(())
}
