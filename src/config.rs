use crate::controller::{ControllerConfig, Retention};
use crate::error::ConfigurationError;
use crate::source::{SourceMode, SourceSettings};
use crate::status;
use crate::transport::Destination;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub device_id: Option<String>,
    pub server_address: Option<String>,
    pub server_port: String,
    pub capture_interval: u64,
    pub position_source: SourceMode,
    pub static_latitude: f64,
    pub static_longitude: f64,
    pub database_url: String,
    pub retry_delay: u64,
    pub keep_alive_timeout: u64,
    pub request_timeout: u64,
    pub network_probe_interval: u64,
    pub outbox_retention_hours: Option<u64>,
    pub status_capacity: usize,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Re-reads `.env`, letting it override the current environment.
    pub fn reload() -> Result<Self> {
        dotenvy::dotenv_override().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let device_id = non_empty("DEVICE_ID");
        let server_address = non_empty("SERVER_ADDRESS");
        let server_port = get("SERVER_PORT").unwrap_or_else(|| "5055".to_string());
        let capture_interval = get("CAPTURE_INTERVAL")
            .unwrap_or_else(|| "300".to_string())
            .parse()
            .unwrap_or(300);
        let position_source = get("POSITION_SOURCE")
            .unwrap_or_else(|| "stdin".to_string())
            .parse::<SourceMode>()?;
        let static_latitude = get("STATIC_LATITUDE")
            .unwrap_or_else(|| "0.0".to_string())
            .parse::<f64>()
            .context("STATIC_LATITUDE must be a number")?;
        let static_longitude = get("STATIC_LONGITUDE")
            .unwrap_or_else(|| "0.0".to_string())
            .parse::<f64>()
            .context("STATIC_LONGITUDE must be a number")?;

        let database_url = get("DATABASE_URL").unwrap_or_else(|| "sqlite:tracker.db".to_string());

        let retry_delay = get("RETRY_DELAY")
            .unwrap_or_else(|| "30".to_string())
            .parse()
            .unwrap_or(30);
        let keep_alive_timeout = get("KEEP_ALIVE_TIMEOUT")
            .unwrap_or_else(|| "60".to_string())
            .parse()
            .unwrap_or(60);
        let request_timeout = get("REQUEST_TIMEOUT")
            .unwrap_or_else(|| "15".to_string())
            .parse()
            .unwrap_or(15);
        let network_probe_interval = get("NETWORK_PROBE_INTERVAL")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .unwrap_or(10);
        let outbox_retention_hours = non_empty("OUTBOX_RETENTION_HOURS")
            .map(|v| v.trim().parse::<u64>())
            .transpose()
            .context("OUTBOX_RETENTION_HOURS must be a whole number of hours")?;
        let status_capacity = get("STATUS_CAPACITY")
            .and_then(|v| v.parse().ok())
            .unwrap_or(status::DEFAULT_CAPACITY);

        let log_level = get("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            device_id,
            server_address,
            server_port,
            capture_interval,
            position_source,
            static_latitude,
            static_longitude,
            database_url,
            retry_delay,
            keep_alive_timeout,
            request_timeout,
            network_probe_interval,
            outbox_retention_hours,
            status_capacity,
            log_level,
        })
    }

    pub fn destination(&self) -> Result<Destination, ConfigurationError> {
        let address = self
            .server_address
            .as_deref()
            .ok_or(ConfigurationError::MissingAddress)?;
        let port = self
            .server_port
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigurationError::InvalidPort(self.server_port.clone()))?;
        Destination::new(address, port)
    }

    pub fn retention(&self) -> Retention {
        match self.outbox_retention_hours {
            Some(hours) => Retention::PurgeAfter(Duration::from_secs(hours * 3600)),
            None => Retention::KeepAll,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            retry_delay: Duration::from_secs(self.retry_delay),
            keep_alive_timeout: Duration::from_secs(self.keep_alive_timeout),
            retention: self.retention(),
        }
    }

    /// `None` disables probing; the network is then assumed reachable.
    pub fn probe_interval(&self) -> Option<Duration> {
        (self.network_probe_interval > 0).then(|| Duration::from_secs(self.network_probe_interval))
    }

    pub fn source_settings(&self, device_id: &str) -> SourceSettings {
        SourceSettings {
            mode: self.position_source,
            device_id: self.device_id.clone().unwrap_or_else(|| device_id.to_string()),
            interval: Duration::from_secs(self.capture_interval),
            latitude: self.static_latitude,
            longitude: self.static_longitude,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.device_id, None);
        assert_eq!(config.capture_interval, 300);
        assert_eq!(config.position_source, SourceMode::Stdin);
        assert_eq!(config.database_url, "sqlite:tracker.db");
        assert_eq!(config.retention(), Retention::KeepAll);
        assert_eq!(config.status_capacity, 20);
        assert_eq!(config.probe_interval(), Some(Duration::from_secs(10)));

        let controller = config.controller_config();
        assert_eq!(controller.retry_delay, Duration::from_secs(30));
        assert_eq!(controller.keep_alive_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_destination_requires_address() {
        let config = config(&[]).unwrap();
        assert_eq!(
            config.destination().unwrap_err(),
            ConfigurationError::MissingAddress
        );

        let config = self::config(&[("SERVER_ADDRESS", "demo.example.com")]).unwrap();
        let destination = config.destination().unwrap();
        assert_eq!(destination.to_string(), "demo.example.com:5055");
    }

    #[test]
    fn test_invalid_port_is_configuration_error() {
        let config = config(&[("SERVER_ADDRESS", "host"), ("SERVER_PORT", "http")]).unwrap();
        assert_eq!(
            config.destination().unwrap_err(),
            ConfigurationError::InvalidPort("http".to_string())
        );
    }

    #[test]
    fn test_retention_and_source_overrides() {
        let config = config(&[
            ("OUTBOX_RETENTION_HOURS", "48"),
            ("POSITION_SOURCE", "static"),
            ("STATIC_LATITUDE", "19.4"),
            ("NETWORK_PROBE_INTERVAL", "0"),
            ("DEVICE_ID", "truck-7"),
        ])
        .unwrap();

        assert_eq!(
            config.retention(),
            Retention::PurgeAfter(Duration::from_secs(48 * 3600))
        );
        assert_eq!(config.probe_interval(), None);

        let settings = config.source_settings("generated");
        assert_eq!(settings.mode, SourceMode::Static);
        assert_eq!(settings.device_id, "truck-7");
        assert_eq!(settings.latitude, 19.4);
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        assert!(config(&[("POSITION_SOURCE", "gps")]).is_err());
    }
}
