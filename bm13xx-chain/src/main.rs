use std::time::Duration;

use tokio::signal::unix::{self, SignalKind};

use bm13xx_chain::{
    config::ChainConfig,
    driver::{DriverContext, DriverRegistry},
    tracing::{self, prelude::*},
};

/// How often the chain status is logged.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::init_journald_or_stdout();

    let config = ChainConfig::from_env()?;
    let registry = DriverRegistry::with_builtin();
    let context = DriverContext::serial(config.clone());
    let mut driver = registry.create(&config.family, &context)?;

    // A chain that fails discovery is never put to work.
    let handle = match driver.discover(&config.device_path).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Chain discovery failed: {}", e);
            driver.shutdown().await;
            return Err(e.into());
        }
    };

    info!(chain = %handle, "Started.");
    info!("{}", driver.status());
    info!("For debugging, set RUST_LOG=bm13xx_chain=debug or trace.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    let mut status_timer = tokio::time::interval(STATUS_INTERVAL);
    status_timer.tick().await;

    let outcome = loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT.");
                break Ok(());
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM.");
                break Ok(());
            },
            _ = status_timer.tick() => {
                info!("{}", driver.status());
            },
            result = driver.poll_result() => match result {
                Ok(Some(response)) => debug!(?response, "Chip response"),
                Ok(None) => {}
                Err(e) => {
                    error!("Chain stopped responding: {}", e);
                    break Err(e);
                }
            },
        }
    };

    driver.shutdown().await;
    info!("Exiting.");

    Ok(outcome?)
}
