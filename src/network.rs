//! Online/offline tracking with edge detection.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Holds the current connectivity state and notifies listeners only when it
/// actually changes.
#[derive(Clone)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Records a raw connectivity report. Returns true if the state changed.
    pub fn report(&self, online: bool) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == online {
                return false;
            }
            *state = online;
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Runs `callback` with the new state on every transition.
    pub fn on_change<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(bool) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let mut last = *rx.borrow_and_update();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                // Fast flaps can collapse back to the value we already saw.
                if online != last {
                    last = online;
                    callback(online);
                }
            }
        })
    }
}

/// Feeds `monitor` with TCP reachability of `address:port`, checked every `interval`.
pub fn spawn_probe(
    monitor: NetworkMonitor,
    address: String,
    port: u16,
    interval: Duration,
) -> JoinHandle<()> {
    info!("Probing connectivity to {}:{} every {:?}", address, port, interval);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reachable = matches!(
                tokio::time::timeout(
                    PROBE_CONNECT_TIMEOUT,
                    TcpStream::connect((address.as_str(), port))
                )
                .await,
                Ok(Ok(_))
            );
            debug!("Probe {}:{} reachable={}", address, port, reachable);
            monitor.report(reachable);
        }
    })
}
