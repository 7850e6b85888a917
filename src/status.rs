use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const DEFAULT_CAPACITY: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub time: DateTime<Local>,
    pub text: String,
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.time.format("%H:%M:%S"), self.text)
    }
}

/// Publishing side of the status channel. Sends never block and are dropped
/// when nobody is listening.
#[derive(Clone)]
pub struct StatusSender {
    tx: broadcast::Sender<StatusMessage>,
}

impl StatusSender {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    pub fn publish(&self, text: impl Into<String>) {
        let _ = self.tx.send(StatusMessage {
            time: Local::now(),
            text: text.into(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusMessage> {
        self.tx.subscribe()
    }
}

/// Append-only log that keeps the newest `capacity` messages.
#[derive(Debug)]
pub struct StatusLog {
    capacity: usize,
    entries: VecDeque<StatusMessage>,
}

impl StatusLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, message: StatusMessage) {
        self.entries.push_back(message);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatusMessage> {
        self.entries.iter()
    }
}

/// Echoes every status message to the log and keeps the newest `capacity`.
/// Resolves to the collected log once every sender is gone.
pub fn spawn_collector(
    mut rx: broadcast::Receiver<StatusMessage>,
    capacity: usize,
) -> JoinHandle<StatusLog> {
    tokio::spawn(async move {
        let mut log = StatusLog::new(capacity);
        loop {
            match rx.recv().await {
                Ok(message) => {
                    info!("Status: {}", message.text);
                    log.push(message);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Status collector lagged, {} messages skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
        log
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_capped() {
        let mut log = StatusLog::new(3);
        for i in 0..5 {
            log.push(StatusMessage {
                time: Local::now(),
                text: format!("message {}", i),
            });
        }

        assert_eq!(log.len(), 3);
        let texts: Vec<&str> = log.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["message 2", "message 3", "message 4"]);
    }

    #[test]
    fn test_display_has_timestamp_prefix() {
        let message = StatusMessage {
            time: Local::now(),
            text: "Location update".to_string(),
        };
        let rendered = message.to_string();
        assert!(rendered.ends_with(" - Location update"));
        assert_eq!(rendered.len(), "HH:MM:SS - Location update".len());
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let status = StatusSender::new(8);
        status.publish("dropped, nobody listening");

        let mut rx = status.subscribe();
        status.publish("Service started");

        assert_eq!(rx.recv().await.unwrap().text, "Service started");
    }

    #[tokio::test]
    async fn test_collector_returns_log_when_senders_drop() {
        let status = StatusSender::new(8);
        let collector = spawn_collector(status.subscribe(), 2);

        status.publish("Service started");
        status.publish("Location update");
        status.publish("Position sent");
        drop(status);

        let log = collector.await.unwrap();
        let texts: Vec<&str> = log.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["Location update", "Position sent"]);
    }
}
