mod config;
mod controller;
mod db;
mod error;
mod models;
mod network;
mod outbox;
mod service;
mod source;
mod status;
#[cfg(test)]
mod testing;
mod transport;

use config::AppConfig;
use controller::keep_alive::NoopKeepAlive;
use controller::DeliveryController;
use network::NetworkMonitor;
use outbox::Outbox;
use service::TrackingService;
use status::StatusSender;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use transport::{HttpTransport, OsmAndFormatter};

const STATUS_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let mut config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Siscom Tracker...");

    // Init outbox
    let pool = db::init_pool(&config.database_url).await?;
    info!("Opened outbox at {}", config.database_url);
    let device_id = db::device_id(&pool).await?;

    let status = StatusSender::new(STATUS_BUFFER);
    let collector = status::spawn_collector(status.subscribe(), config.status_capacity);

    let destination = match config.destination() {
        Ok(destination) => Some(destination),
        Err(e) => {
            warn!("{}", e);
            None
        }
    };

    let transport = HttpTransport::new(Duration::from_secs(config.request_timeout))?;
    let monitor = NetworkMonitor::new(config.probe_interval().is_none());

    let (handle, controller_task) = DeliveryController::new(
        Arc::new(Outbox::new(pool.clone())),
        Arc::new(OsmAndFormatter),
        Arc::new(transport),
        Arc::new(NoopKeepAlive),
        status.clone(),
        config.controller_config(),
    )
    .with_destination(destination.clone())
    .with_online(monitor.is_online())
    .spawn();

    let mut service = TrackingService::new(
        handle,
        monitor,
        config.source_settings(&device_id),
        destination,
        config.probe_interval(),
    );
    service.start();

    wait_for_shutdown(&mut config, &mut service, &device_id).await?;
    info!("Shutting down...");

    service.stop();
    drop(service);
    if let Err(e) = controller_task.await {
        error!("Delivery controller task failed: {}", e);
    }

    // The collector finishes once every status sender, including the
    // stop-time flush, is gone.
    drop(status);
    match collector.await {
        Ok(log) => {
            info!("Last {} status messages:", log.len());
            for message in log.iter() {
                info!("  {}", message);
            }
        }
        Err(e) => error!("Status collector failed: {}", e),
    }

    pool.close().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown(
    config: &mut AppConfig,
    service: &mut TrackingService,
    device_id: &str,
) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => return Ok(result?),
            _ = hangup.recv() => reload(config, service, device_id),
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(
    _config: &mut AppConfig,
    _service: &mut TrackingService,
    _device_id: &str,
) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[cfg(unix)]
fn reload(config: &mut AppConfig, service: &mut TrackingService, device_id: &str) {
    info!("Reloading configuration");
    let updated = match AppConfig::reload() {
        Ok(updated) => updated,
        Err(e) => {
            error!("Failed to reload configuration: {}", e);
            return;
        }
    };

    let changes = service::diff(config, &updated, device_id);
    if changes.is_empty() {
        info!("Configuration unchanged");
    }
    for change in changes {
        service.apply(change);
    }
    *config = updated;
}
