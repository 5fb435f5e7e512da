//! db-facade probe - Main entry point.
//!
//! Loads the environment's config file, initializes every enabled backend,
//! pings each one and prints a JSON health report.

use clap::Parser;
use db_facade::config::{self, Cli, ConfigStore};
use db_facade::lifecycle::backends;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout carries only the report
    if cli.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!(
        env = %cli.env,
        "Starting db-facade probe v{}",
        env!("CARGO_PKG_VERSION")
    );

    let path = cli.config_path();
    let store = config::install(ConfigStore::from_yaml_file(&path)?);

    let registry = backends();
    if let Err(e) = registry.init_from_config(&store).await {
        error!(error = %e, "Backend initialization failed");
        registry.close_all().await;
        return Err(e.into());
    }

    let reports = registry.health_check().await;
    registry.close_all().await;

    println!("{}", serde_json::to_string_pretty(&reports)?);

    let unhealthy = reports.iter().filter(|r| !r.healthy).count();
    if unhealthy > 0 {
        error!(unhealthy, "Some backends are unhealthy");
        std::process::exit(2);
    }

    info!("Probe complete");
    Ok(())
}
