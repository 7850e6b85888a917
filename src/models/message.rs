use crate::models::position::NewPosition;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

/// One fix as reported by an external position source.
#[derive(Debug, Deserialize)]
pub struct FixMessage {
    #[serde(alias = "deviceid")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "parse_timestamp_option")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(alias = "latitude", deserialize_with = "parse_f64")]
    pub lat: f64,
    #[serde(alias = "longitude", deserialize_with = "parse_f64")]
    pub lon: f64,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub altitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub speed: Option<f64>,
    #[serde(alias = "course", default, deserialize_with = "parse_f64_option")]
    pub bearing: Option<f64>,
    #[serde(alias = "battery", default, deserialize_with = "parse_f64_option")]
    pub batt: Option<f64>,
}

impl FixMessage {
    /// Fills missing fields; `device_id` is used when the fix carries none.
    pub fn into_position(self, device_id: &str) -> NewPosition {
        NewPosition {
            device_id: self
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| device_id.to_string()),
            time: self.timestamp.unwrap_or_else(Utc::now),
            latitude: self.lat,
            longitude: self.lon,
            altitude: self.altitude.unwrap_or(0.0),
            speed: self.speed.unwrap_or(0.0),
            course: self.bearing.unwrap_or(0.0),
            battery: self.batt.unwrap_or(0.0),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrFloat {
    String(String),
    Float(f64),
}

fn parse_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    parse_f64_option(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing coordinate"))
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    let value = match v {
        Some(StringOrFloat::Float(f)) => f,
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                return Ok(None);
            }
            s.trim().parse::<f64>().map_err(serde::de::Error::custom)?
        }
        None => return Ok(None),
    };
    if !value.is_finite() {
        return Err(serde::de::Error::custom(format!("not a finite number: {}", value)));
    }
    Ok(Some(value))
}

/// Accepts unix seconds (number or string) or RFC 3339.
fn parse_timestamp_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    let seconds = match v {
        Some(StringOrFloat::Float(f)) => f,
        Some(StringOrFloat::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            match s.parse::<f64>() {
                Ok(f) => f,
                Err(_) => {
                    return DateTime::parse_from_rfc3339(s)
                        .map(|t| Some(t.with_timezone(&Utc)))
                        .map_err(serde::de::Error::custom)
                }
            }
        }
        None => return Ok(None),
    };

    Utc.timestamp_millis_opt((seconds * 1000.0) as i64)
        .single()
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsing_string_coordinates() {
        let payload = r#"
        {
            "id": "0848086072",
            "timestamp": "1764396915",
            "lat": "+20.652494",
            "lon": "-100.391404",
            "speed": "0.00",
            "bearing": "12.5",
            "batt": ""
        }
        "#;

        let msg: FixMessage = serde_json::from_str(payload).unwrap();
        assert_eq!(msg.lat, 20.652494);
        assert_eq!(msg.lon, -100.391404);
        assert_eq!(msg.speed, Some(0.0));
        assert_eq!(msg.bearing, Some(12.5));
        assert_eq!(msg.batt, None);
        assert_eq!(msg.timestamp.unwrap().timestamp(), 1764396915);
    }

    #[test]
    fn test_parsing_rfc3339_and_aliases() {
        let payload = r#"{"latitude": 1.5, "longitude": 2.5, "timestamp": "2025-11-29T06:15:15Z", "battery": 87}"#;

        let msg: FixMessage = serde_json::from_str(payload).unwrap();
        let position = msg.into_position("fallback");

        assert_eq!(position.device_id, "fallback");
        assert_eq!(position.latitude, 1.5);
        assert_eq!(position.longitude, 2.5);
        assert_eq!(position.battery, 87.0);
        assert_eq!(position.time.timestamp(), 1764396915);
    }

    #[test]
    fn test_missing_latitude_is_rejected() {
        let payload = r#"{"lon": 2.5}"#;
        assert!(serde_json::from_str::<FixMessage>(payload).is_err());

        let payload = r#"{"lat": "", "lon": 2.5}"#;
        assert!(serde_json::from_str::<FixMessage>(payload).is_err());
    }

    #[test]
    fn test_non_finite_numbers_are_rejected() {
        for payload in [
            r#"{"lat": "NaN", "lon": 2.5}"#,
            r#"{"lat": 1.0, "lon": "inf"}"#,
            r#"{"lat": 1.0, "lon": 2.5, "speed": "-infinity"}"#,
        ] {
            assert!(serde_json::from_str::<FixMessage>(payload).is_err(), "{}", payload);
        }
    }
}
