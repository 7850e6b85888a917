use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

pub mod queries;

pub type DbPool = Pool<Sqlite>;

const DEVICE_ID_KEY: &str = "device_id";

pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    // Single writer; in-memory databases also need the one connection kept open.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(queries::CREATE_POSITION_TABLE)
        .execute(pool)
        .await?;
    sqlx::query(queries::CREATE_POSITION_UNSENT_INDEX)
        .execute(pool)
        .await?;
    sqlx::query(queries::CREATE_SETTINGS_TABLE)
        .execute(pool)
        .await?;
    Ok(())
}

/// Returns the persisted device identifier, generating one on first use.
pub async fn device_id(pool: &DbPool) -> Result<String, sqlx::Error> {
    let existing: Option<String> = sqlx::query_scalar(queries::SELECT_SETTING)
        .bind(DEVICE_ID_KEY)
        .fetch_optional(pool)
        .await?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let generated = Uuid::new_v4().simple().to_string()[..12].to_string();
    sqlx::query(queries::INSERT_SETTING)
        .bind(DEVICE_ID_KEY)
        .bind(&generated)
        .execute(pool)
        .await?;
    info!("Generated device id {}", generated);

    let stored: String = sqlx::query_scalar(queries::SELECT_SETTING)
        .bind(DEVICE_ID_KEY)
        .fetch_one(pool)
        .await?;
    Ok(stored)
}

#[cfg(test)]
pub async fn memory_pool() -> DbPool {
    init_pool("sqlite::memory:").await.unwrap()
}
