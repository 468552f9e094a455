use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::NotificationEndpoint,
    error::{AppError, Result},
    repository::NotificationEndpointRepository,
};

#[derive(FromRow)]
struct EndpointRow {
    id: String,
    url: String,
    enabled: i64,
    last_status_code: Option<i64>,
    last_error: Option<String>,
    last_attempt_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
}

pub struct SqliteNotificationEndpointRepository {
    pool: SqlitePool,
}

impl SqliteNotificationEndpointRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_endpoint(row: EndpointRow) -> Result<NotificationEndpoint> {
        Ok(NotificationEndpoint {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            url: row.url,
            enabled: row.enabled != 0,
            last_status_code: row.last_status_code,
            last_error: row.last_error,
            last_attempt_at: row
                .last_attempt_at
                .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        })
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<NotificationEndpoint>> {
        let row = sqlx::query_as::<_, EndpointRow>(
            r#"
            SELECT id, url, enabled, last_status_code, last_error, last_attempt_at, created_at
            FROM notification_endpoints
            WHERE url = ?
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_endpoint(r)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl NotificationEndpointRepository for SqliteNotificationEndpointRepository {
    async fn ensure_url(&self, url: &str) -> Result<NotificationEndpoint> {
        if let Some(existing) = self.find_by_url(url).await? {
            return Ok(existing);
        }

        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO notification_endpoints (id, url, enabled, created_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(url)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_url(url)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve notification endpoint".to_string()))
    }

    async fn list_enabled(&self) -> Result<Vec<NotificationEndpoint>> {
        let rows = sqlx::query_as::<_, EndpointRow>(
            r#"
            SELECT id, url, enabled, last_status_code, last_error, last_attempt_at, created_at
            FROM notification_endpoints
            WHERE enabled = 1
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_endpoint).collect()
    }

    async fn record_attempt(
        &self,
        id: Uuid,
        status_code: Option<u16>,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE notification_endpoints
            SET last_status_code = ?, last_error = ?, last_attempt_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status_code.map(|c| c as i64))
        .bind(error)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
