//! routegate HTTP server
//!
//! Serves the gateway over HTTP: `POST /route` plus health, dashboard and
//! Prometheus endpoints.

use clap::Parser;
use routegate::{
    cli::{Cli, Command, generate_config_template},
    config::Config,
    gateway::{Gateway, GatewayRegistry},
    handlers::{self, AppState},
    telemetry,
};
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        let template = generate_config_template();
        match output {
            Some(path) => {
                std::fs::write(&path, template)?;
                println!("Wrote template configuration to {}", path);
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    let config = Config::from_file(&cli.config)?;
    telemetry::init(&config.observability.log_level);

    let host = config
        .server
        .host
        .parse::<std::net::IpAddr>()
        .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0]));
    let addr = SocketAddr::from((host, config.server.port));

    let gateway = GatewayRegistry::global().get_or_create(|| Gateway::new(config))?;
    let app = handlers::router(AppState::new(gateway.clone()));

    tracing::info!("Listening on {}", addr);
    tracing::info!("Health check available at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    gateway.shutdown().await;
    GatewayRegistry::global().clear();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
