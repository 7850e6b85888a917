//! Boundary to the remote collector.
//!
//! The controller hands a stored position to a [`Formatter`] and passes the
//! resulting [`Payload`] to a [`Transport`] without looking inside it.

use crate::error::{ConfigurationError, TransportError};
use crate::models::Position;
use async_trait::async_trait;
use std::fmt;

pub mod http;
pub mod osmand;

pub use http::HttpTransport;
pub use osmand::OsmAndFormatter;

/// Collector address and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    address: String,
    port: u16,
}

impl Destination {
    pub fn new(address: &str, port: u16) -> Result<Self, ConfigurationError> {
        let address = address.trim();
        let address = address
            .strip_prefix('[')
            .and_then(|a| a.strip_suffix(']'))
            .unwrap_or(address);
        if address.is_empty() {
            return Err(ConfigurationError::MissingAddress);
        }
        if address.contains(|c: char| c.is_whitespace() || c == '/' || c == '?' || c == '#') {
            return Err(ConfigurationError::InvalidAddress(address.to_string()));
        }
        if port == 0 {
            return Err(ConfigurationError::InvalidPort(port.to_string()));
        }
        Ok(Self {
            address: address.to_string(),
            port,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// Wire request produced by a formatter, opaque to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(String);

impl Payload {
    pub fn new(body: impl Into<String>) -> Self {
        Self(body.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub trait Formatter: Send + Sync {
    fn format(
        &self,
        destination: &Destination,
        position: &Position,
    ) -> Result<Payload, ConfigurationError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &Payload) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_validation() {
        assert_eq!(
            Destination::new("  ", 5055),
            Err(ConfigurationError::MissingAddress)
        );
        assert!(matches!(
            Destination::new("demo.traccar.org/path", 5055),
            Err(ConfigurationError::InvalidAddress(_))
        ));
        assert!(matches!(
            Destination::new("demo.traccar.org", 0),
            Err(ConfigurationError::InvalidPort(_))
        ));

        let destination = Destination::new(" 10.0.0.5 ", 5055).unwrap();
        assert_eq!(destination.address(), "10.0.0.5");
        assert_eq!(destination.to_string(), "10.0.0.5:5055");
    }

    #[test]
    fn test_ipv6_destination_drops_brackets() {
        let destination = Destination::new("[::1]", 5055).unwrap();
        assert_eq!(destination.address(), "::1");
        assert_eq!(destination.to_string(), "[::1]:5055");
    }
}
