//! Tracking service lifecycle and runtime reconfiguration.

use crate::config::AppConfig;
use crate::controller::ControllerHandle;
use crate::network::{self, NetworkMonitor};
use crate::source::{self, SourceMode, SourceSettings};
use crate::transport::Destination;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChange {
    Destination(Option<Destination>),
    DeviceId(String),
    CaptureInterval(Duration),
    SourceMode(SourceMode),
}

/// Changes that matter to a running service when moving from `old` to `new`.
pub fn diff(old: &AppConfig, new: &AppConfig, device_id: &str) -> Vec<ConfigChange> {
    let mut changes = Vec::new();

    let old_destination = old.destination().ok();
    let new_destination = new.destination().ok();
    if old_destination != new_destination {
        changes.push(ConfigChange::Destination(new_destination));
    }

    let old_source = old.source_settings(device_id);
    let new_source = new.source_settings(device_id);
    if old_source.device_id != new_source.device_id {
        changes.push(ConfigChange::DeviceId(new_source.device_id));
    }
    if old_source.interval != new_source.interval {
        changes.push(ConfigChange::CaptureInterval(new_source.interval));
    }
    if old_source.mode != new_source.mode {
        changes.push(ConfigChange::SourceMode(new_source.mode));
    }

    changes
}

pub struct TrackingService {
    handle: ControllerHandle,
    monitor: NetworkMonitor,
    settings: SourceSettings,
    destination: Option<Destination>,
    probe_interval: Option<Duration>,
    source: Option<JoinHandle<()>>,
    probe: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl TrackingService {
    pub fn new(
        handle: ControllerHandle,
        monitor: NetworkMonitor,
        settings: SourceSettings,
        destination: Option<Destination>,
        probe_interval: Option<Duration>,
    ) -> Self {
        Self {
            handle,
            monitor,
            settings,
            destination,
            probe_interval,
            source: None,
            probe: None,
            listener: None,
        }
    }

    pub fn start(&mut self) {
        if self.listener.is_none() {
            let handle = self.handle.clone();
            self.listener = Some(
                self.monitor
                    .on_change(move |online| handle.network_changed(online)),
            );
        }
        self.handle.start();
        self.restart_probe();
        self.handle.network_changed(self.monitor.is_online());
        self.restart_source();
        info!("Tracking service started");
    }

    pub fn stop(&mut self) {
        if let Some(source) = self.source.take() {
            source.abort();
        }
        if let Some(probe) = self.probe.take() {
            probe.abort();
        }
        self.handle.stop();
        info!("Tracking service stopped");
    }

    pub fn apply(&mut self, change: ConfigChange) {
        info!("Applying configuration change: {:?}", change);
        match change {
            ConfigChange::Destination(destination) => {
                self.destination = destination.clone();
                self.handle.set_destination(destination);
                self.restart_probe();
            }
            ConfigChange::DeviceId(device_id) => {
                self.settings.device_id = device_id;
                self.restart_source();
            }
            ConfigChange::CaptureInterval(interval) => {
                self.settings.interval = interval;
                self.restart_source();
            }
            ConfigChange::SourceMode(mode) => {
                self.settings.mode = mode;
                self.restart_source();
            }
        }
    }

    fn restart_source(&mut self) {
        if let Some(source) = self.source.take() {
            source.abort();
        }
        let handle = self.handle.clone();
        self.source = Some(source::spawn(self.settings.clone(), move |position| {
            handle.position_captured(position)
        }));
    }

    fn restart_probe(&mut self) {
        if let Some(probe) = self.probe.take() {
            probe.abort();
        }
        let Some(interval) = self.probe_interval else {
            self.monitor.report(true);
            return;
        };
        match &self.destination {
            Some(destination) => {
                self.probe = Some(network::spawn_probe(
                    self.monitor.clone(),
                    destination.address().to_string(),
                    destination.port(),
                    interval,
                ));
            }
            None => warn!("No destination configured, connectivity probe disabled"),
        }
    }
}

impl Drop for TrackingService {
    fn drop(&mut self) {
        for task in [self.source.take(), self.probe.take(), self.listener.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}
