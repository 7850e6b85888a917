use super::{Payload, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Posts each payload URL to the collector.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &Payload) -> Result<(), TransportError> {
        let response = self
            .client
            .post(payload.as_str())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Request(e)
                }
            })?;

        let status = response.status();
        debug!("Collector responded {}", status);
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(())
    }
}
