use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chatguard::{
    config::{Config, LogFormat},
    server::{AppState, McpServer},
    AnalysisClient,
};

/// Real-time threat analysis server for AI chat conversations.
#[derive(Debug, Parser)]
#[command(name = "chatguard", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve JSON-RPC over stdio (default)
    Serve,
    /// Print the effective configuration with secrets redacted
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Config => {
            let mut shown = config;
            shown.backend.api_key = "<redacted>".to_string();
            println!("{:#?}", shown);
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Chatguard analysis server starting..."
    );

    let client = match AnalysisClient::new(&config.backend, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.backend.base_url, "Analysis client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize analysis client");
            return Err(e.into());
        }
    };

    let (state, reports) = AppState::new(config, Arc::new(client));
    let server = McpServer::new(Arc::new(state));

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run(reports).await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
