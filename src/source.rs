//! Position sources feeding captured fixes into the delivery controller.

use crate::models::message::FixMessage;
use crate::models::NewPosition;
use anyhow::bail;
use chrono::Utc;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Stdin,
    Static,
}

impl FromStr for SourceMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdin" => Ok(Self::Stdin),
            "static" => Ok(Self::Static),
            other => bail!("Unknown position source: {}", other),
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => write!(f, "stdin"),
            Self::Static => write!(f, "static"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub mode: SourceMode,
    pub device_id: String,
    pub interval: Duration,
    pub latitude: f64,
    pub longitude: f64,
}

/// Accepts a fix only if `interval` has passed since the last accepted one.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn accept(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Starts the configured source; every accepted fix is handed to `sink`.
pub fn spawn<F>(settings: SourceSettings, sink: F) -> JoinHandle<()>
where
    F: Fn(NewPosition) + Send + 'static,
{
    info!(
        "Starting {} position source (interval {:?})",
        settings.mode, settings.interval
    );
    match settings.mode {
        SourceMode::Stdin => tokio::spawn(async move {
            let reader = BufReader::new(tokio::io::stdin());
            read_fixes(reader, &settings, sink).await;
            info!("Position input closed");
        }),
        SourceMode::Static => tokio::spawn(emit_static(settings, sink)),
    }
}

pub fn parse_line(line: &str, device_id: &str) -> anyhow::Result<NewPosition> {
    let message: FixMessage = serde_json::from_str(line)?;
    Ok(message.into_position(device_id))
}

async fn read_fixes<R, F>(reader: R, settings: &SourceSettings, sink: F)
where
    R: AsyncBufRead + Unpin,
    F: Fn(NewPosition),
{
    let mut throttle = Throttle::new(settings.interval);
    let mut lines = reader.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read position input: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let position = match parse_line(&line, &settings.device_id) {
            Ok(position) => position,
            Err(e) => {
                warn!("Skipping invalid fix: {}", e);
                continue;
            }
        };

        if throttle.accept(Instant::now()) {
            sink(position);
        } else {
            debug!("Fix within capture interval, dropped");
        }
    }
}

async fn emit_static<F>(settings: SourceSettings, sink: F)
where
    F: Fn(NewPosition),
{
    let mut ticker = tokio::time::interval(settings.interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        sink(NewPosition {
            device_id: settings.device_id.clone(),
            time: Utc::now(),
            latitude: settings.latitude,
            longitude: settings.longitude,
            altitude: 0.0,
            speed: 0.0,
            course: 0.0,
            battery: 0.0,
        });
    }
}
