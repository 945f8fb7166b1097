use log::*;
use relay::error::Error as RelayError;
use relay::{Manager, Server};
use service::{config::Config, logging::Logger};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let config = get_config();

    Logger::init_logger(&config);

    info!("Starting up Flexare chat relay...");

    match run(&config).await {
        Ok(()) => {
            info!("Have a nice day :)");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config) -> Result<(), RelayError> {
    let manager = Arc::new(Manager::new());
    let server = Server::bind(config.listen_addr(), manager)
        .await?
        .with_shutdown_grace(config.shutdown_grace());

    info!("Server listening on: {}", server.local_addr()?);

    server.run(shutdown_signal()).await
}

fn get_config() -> Config {
    Config::new()
}

/// Resolves on SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {e}");
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
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
