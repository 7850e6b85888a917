use crate::error::StorageError;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::FromRow;

/// A captured fix that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPosition {
    pub device_id: String,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64, // m/s
    pub course: f64,
    pub battery: f64,
}

/// A fix stored in the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: i64,
    pub device_id: String,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub course: f64,
    pub battery: f64,
    pub delivered: bool,
}

impl Position {
    pub fn from_new(id: i64, position: NewPosition) -> Self {
        Self {
            id,
            device_id: position.device_id,
            time: position.time,
            latitude: position.latitude,
            longitude: position.longitude,
            altitude: position.altitude,
            speed: position.speed,
            course: position.course,
            battery: position.battery,
            delivered: false,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct PositionRow {
    pub id: i64,
    pub device_id: String,
    pub time: i64, // unix millis
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub course: f64,
    pub battery: f64,
    pub delivered: bool,
}

impl TryFrom<PositionRow> for Position {
    type Error = StorageError;

    fn try_from(row: PositionRow) -> Result<Self, Self::Error> {
        let time = Utc
            .timestamp_millis_opt(row.time)
            .single()
            .ok_or(StorageError::InvalidTime {
                id: row.id,
                time: row.time,
            })?;

        Ok(Self {
            id: row.id,
            device_id: row.device_id,
            time,
            latitude: row.latitude,
            longitude: row.longitude,
            altitude: row.altitude,
            speed: row.speed,
            course: row.course,
            battery: row.battery,
            delivered: row.delivered,
        })
    }
}
