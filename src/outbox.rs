//! Durable FIFO of captured positions.
//!
//! Records are appended undelivered, handed out oldest-first, and flagged
//! delivered once the collector confirms them. Delivered rows stay in the
//! table as history until a retention purge removes them.

use crate::db::{queries, DbPool};
use crate::error::StorageError;
use crate::models::position::PositionRow;
use crate::models::{NewPosition, Position};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait PositionQueue: Send + Sync {
    /// Appends an undelivered record and returns it with its insertion id.
    async fn enqueue(&self, position: NewPosition) -> Result<Position, StorageError>;

    /// Oldest record not yet delivered, if any.
    async fn dequeue_oldest_unsent(&self) -> Result<Option<Position>, StorageError>;

    /// Flags a record delivered. Repeating the call for the same id succeeds.
    async fn mark_delivered(&self, id: i64) -> Result<(), StorageError>;

    /// Removes delivered records captured before `before`. Returns the number removed.
    async fn purge_delivered(&self, before: DateTime<Utc>) -> Result<u64, StorageError>;

    async fn count_unsent(&self) -> Result<u64, StorageError>;
}

/// SQLite-backed outbox.
#[derive(Clone)]
pub struct Outbox {
    pool: DbPool,
}

impl Outbox {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PositionQueue for Outbox {
    async fn enqueue(&self, position: NewPosition) -> Result<Position, StorageError> {
        let result = sqlx::query(queries::INSERT_POSITION)
            .bind(&position.device_id)
            .bind(position.time.timestamp_millis())
            .bind(position.latitude)
            .bind(position.longitude)
            .bind(position.altitude)
            .bind(position.speed)
            .bind(position.course)
            .bind(position.battery)
            .execute(&self.pool)
            .await?;

        Ok(Position::from_new(result.last_insert_rowid(), position))
    }

    async fn dequeue_oldest_unsent(&self) -> Result<Option<Position>, StorageError> {
        let row: Option<PositionRow> = sqlx::query_as(queries::SELECT_OLDEST_UNSENT)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Position::try_from).transpose()
    }

    async fn mark_delivered(&self, id: i64) -> Result<(), StorageError> {
        let result = sqlx::query(queries::UPDATE_MARK_DELIVERED)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id));
        }
        Ok(())
    }

    async fn purge_delivered(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query(queries::DELETE_DELIVERED_BEFORE)
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_unsent(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(queries::COUNT_UNSENT)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
