use anyhow::{Context, Result};
use clap::Parser;
use roundabout::proxy::forward::http_client;
use roundabout::{BackendPool, Config, HealthChecker, Proxy, Shutdown};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "roundabout")]
#[command(about = "Round-robin HTTP load balancer", long_about = None)]
struct Cli {
    /// Port to serve on
    #[arg(short, long)]
    port: Option<u16>,

    /// Optional TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roundabout=info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            Config::from_file(path)?
        }
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let targets = config.backend_targets()?;
    let backend_pool = Arc::new(BackendPool::from_targets(
        targets,
        http_client(),
        config.forward_timeout(),
    ));

    let health_checker = HealthChecker::new(
        backend_pool.clone(),
        config.check_interval(),
        config.check_timeout(),
    );
    health_checker.check_all_backends().await;

    let shutdown = Shutdown::new();
    let health_shutdown = shutdown.subscribe();
    let health_task = tokio::spawn(async move {
        health_checker.run(health_shutdown).await;
    });
    info!("Health checker started.");

    let listener = TcpListener::bind(("0.0.0.0", config.server.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.server.port))?;
    info!("Load Balancer started at: {}", config.server.port);

    let proxy = Proxy::new(backend_pool).with_drain_timeout(config.drain_timeout());
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
        shutdown.trigger();
    });

    proxy.serve(listener, server_shutdown).await?;
    health_task.await.context("health checker task failed")?;

    info!("Shutdown complete");
    Ok(())
}
