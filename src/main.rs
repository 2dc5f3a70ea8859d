//! calc-quiz: an arithmetic quiz server speaking TEXT TCP 1.0
//!
//! Each client connection gets:
//! - A protocol greeting and acknowledgment handshake
//! - One randomly generated integer or real arithmetic assignment
//! - A verdict on its answer, or a timeout notice after 5 seconds
//!
//! Connections are served strictly one at a time. Configuration comes from
//! CLI arguments or a TOML file.

mod acceptor;
mod config;
mod generator;
mod grader;
mod protocol;
mod server;
mod session;

use acceptor::Acceptor;
use config::{Config, ConfigError};
use generator::RandomProblems;
use server::Server;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Cli(e)) if !e.use_stderr() => e.exit(),
        Err(e) => {
            eprintln!("ERROR: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            eprintln!("ERROR: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(config))
}

async fn run(config: Config) -> ExitCode {
    info!(
        listen = %config.listen,
        backlog = config.backlog,
        response_timeout = ?config.timeouts.response,
        handshake_timeout = ?config.timeouts.handshake,
        seed = ?config.seed,
        "Starting calc-quiz server"
    );

    let acceptor = match Acceptor::bind(&config.listen, config.backlog).await {
        Ok(acceptor) => acceptor,
        Err(e) => {
            // Fatal errors reach stderr even when the log filter hides them.
            error!(error = %e, "Startup failed");
            eprintln!("ERROR: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(address = %acceptor.local_addr(), "Server listening");

    let generator = RandomProblems::new(config.seed, config.limits);
    Server::new(acceptor, generator, config.timeouts)
        .run(shutdown_signal())
        .await;

    ExitCode::SUCCESS
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
