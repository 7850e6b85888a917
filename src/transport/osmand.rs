use super::{Destination, Formatter, Payload};
use crate::error::ConfigurationError;
use crate::models::Position;
use reqwest::Url;
use std::net::Ipv6Addr;

const KNOTS_PER_METER_PER_SECOND: f64 = 1.943844;

/// Query-string request understood by OsmAnd-compatible collectors.
#[derive(Debug, Default, Clone)]
pub struct OsmAndFormatter;

impl Formatter for OsmAndFormatter {
    fn format(
        &self,
        destination: &Destination,
        position: &Position,
    ) -> Result<Payload, ConfigurationError> {
        let base = match destination.address().parse::<Ipv6Addr>() {
            Ok(ip) => format!("http://[{}]:{}/", ip, destination.port()),
            Err(_) => format!("http://{}:{}/", destination.address(), destination.port()),
        };
        let mut url = Url::parse(&base)
            .map_err(|_| ConfigurationError::InvalidAddress(destination.address().to_string()))?;

        url.query_pairs_mut()
            .append_pair("id", &position.device_id)
            .append_pair("timestamp", &position.time.timestamp().to_string())
            .append_pair("lat", &position.latitude.to_string())
            .append_pair("lon", &position.longitude.to_string())
            .append_pair(
                "speed",
                &(position.speed * KNOTS_PER_METER_PER_SECOND).to_string(),
            )
            .append_pair("bearing", &position.course.to_string())
            .append_pair("altitude", &position.altitude.to_string())
            .append_pair("batt", &position.battery.to_string());

        Ok(Payload::new(url.to_string()))
    }
}
