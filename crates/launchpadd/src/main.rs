//! launchpadd — the Launchpad daemon.
//!
//! Single binary that assembles:
//! - Job store (redb, or in memory)
//! - Compute driver (local processes, or in memory)
//! - Instance catalog + orchestrator
//! - REST API
//!
//! # Usage
//!
//! ```text
//! launchpadd serve --config /etc/launchpad.toml --port 3000
//! launchpadd print-config > launchpad.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use launchpad_core::LaunchpadConfig;
use launchpad_core::config::DriverKind;
use launchpadd::{Overrides, build_state, load_config};

#[derive(Parser)]
#[command(name = "launchpadd", about = "Launchpad job orchestrator daemon")]
struct Cli {
    /// Log as JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API.
    Serve {
        /// Path to launchpad.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for the job store and local driver.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Compute driver: "local" or "memory".
        #[arg(long)]
        driver: Option<DriverKind>,

        /// Keep job records in memory only.
        #[arg(long)]
        in_memory: bool,
    },
    /// Print the default configuration as TOML.
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            driver,
            in_memory,
        } => {
            let overrides = Overrides {
                port,
                data_dir,
                driver,
            };
            let config = load_config(config.as_deref(), &overrides)?;
            run_server(config, in_memory).await
        }
        Command::PrintConfig => {
            print!("{}", LaunchpadConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::try_new("info,launchpadd=debug,launchpad=debug")?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn run_server(config: LaunchpadConfig, in_memory: bool) -> anyhow::Result<()> {
    info!(
        driver = ?config.driver.kind,
        data_dir = ?config.storage.data_dir,
        public_url = %config.server.public_url,
        "Launchpad daemon starting"
    );

    let port = config.server.port;
    let state = build_state(config, in_memory).await?;
    let router = launchpad_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("Launchpad daemon stopped");
    Ok(())
}
