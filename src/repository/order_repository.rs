use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::{
    domain::{GatewayKind, Order, OrderStatus, PaymentLogEntry, PaymentMethod},
    error::{AppError, Result},
    repository::{OrderRepository, PaymentStateUpdate},
};

#[derive(FromRow)]
struct OrderRow {
    id: String,
    total_cents: i64,
    payment_method: String,
    gateway: Option<String>,
    gateway_transaction_id: Option<String>,
    gateway_status: Option<String>,
    status: String,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
    shipped_at: Option<NaiveDateTime>,
    delivered_at: Option<NaiveDateTime>,
}

#[derive(FromRow)]
struct PaymentLogRow {
    id: i64,
    order_id: String,
    created_at: NaiveDateTime,
    raw_response: String,
    parsed_response: String,
    success: i64,
}

pub struct SqliteOrderRepository {
    pool: SqlitePool,
}

impl SqliteOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: OrderRow) -> Result<Order> {
        Ok(Order {
            id: Uuid::parse_str(&row.id).map_err(|e| AppError::Database(e.to_string()))?,
            total_cents: row.total_cents,
            payment_method: row
                .payment_method
                .parse::<PaymentMethod>()
                .map_err(AppError::Database)?,
            gateway: row
                .gateway
                .map(|g| g.parse::<GatewayKind>())
                .transpose()
                .map_err(AppError::Database)?,
            gateway_transaction_id: row.gateway_transaction_id,
            gateway_status: row.gateway_status,
            status: row.status.parse::<OrderStatus>().map_err(AppError::Database)?,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            updated_at: DateTime::from_naive_utc_and_offset(row.updated_at, Utc),
            shipped_at: row
                .shipped_at
                .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
            delivered_at: row
                .delivered_at
                .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc)),
        })
    }

    fn row_to_log(row: PaymentLogRow) -> Result<PaymentLogEntry> {
        Ok(PaymentLogEntry {
            id: row.id,
            order_id: Uuid::parse_str(&row.order_id)
                .map_err(|e| AppError::Database(e.to_string()))?,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
            raw_response: serde_json::from_str(&row.raw_response)
                .map_err(|e| AppError::Database(e.to_string()))?,
            parsed_response: serde_json::from_str(&row.parsed_response)
                .map_err(|e| AppError::Database(e.to_string()))?,
            success: row.success != 0,
        })
    }

    fn escape_like(prefix: &str) -> String {
        prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_")
    }
}

const ORDER_COLUMNS: &str = r#"
    id, total_cents, payment_method, gateway, gateway_transaction_id,
    gateway_status, status, created_at, updated_at, shipped_at, delivered_at
"#;

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn create(&self, order: Order) -> Result<Order> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, total_cents, payment_method, gateway, gateway_transaction_id,
                gateway_status, status, created_at, updated_at, shipped_at, delivered_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(order.id.to_string())
        .bind(order.total_cents)
        .bind(order.payment_method.as_str())
        .bind(order.gateway.map(|g| g.as_str()))
        .bind(&order.gateway_transaction_id)
        .bind(&order.gateway_status)
        .bind(order.status.as_str())
        .bind(order.created_at.naive_utc())
        .bind(order.updated_at.naive_utc())
        .bind(order.shipped_at.map(|dt| dt.naive_utc()))
        .bind(order.delivered_at.map(|dt| dt.naive_utc()))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(order.id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve created order".to_string()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = ?",
            ORDER_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_order(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_id_prefix(&self, prefix: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r#"SELECT {} FROM orders WHERE id LIKE ? ESCAPE '\' LIMIT 5"#,
            ORDER_COLUMNS
        ))
        .bind(format!("{}%", Self::escape_like(prefix)))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn find_by_gateway_transaction_id(
        &self,
        gateway: GatewayKind,
        transaction_id: &str,
    ) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE gateway = ? AND gateway_transaction_id = ?",
            ORDER_COLUMNS
        ))
        .bind(gateway.as_str())
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_order(r)?)),
            None => Ok(None),
        }
    }

    async fn list_pending_since(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            SELECT {}
            FROM orders
            WHERE status = 'pending' AND created_at >= ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
            ORDER_COLUMNS
        ))
        .bind(cutoff.naive_utc())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn apply_payment_update(&self, update: PaymentStateUpdate) -> Result<Order> {
        let now = Utc::now().naive_utc();

        // Compare-and-set on the current status. The CASE keeps a
        // gateway-issued transaction id from being overwritten by a shorter
        // placeholder reference.
        sqlx::query(
            r#"
            UPDATE orders
            SET status = ?,
                gateway_status = COALESCE(?, gateway_status),
                gateway_transaction_id = CASE
                    WHEN ? IS NULL THEN gateway_transaction_id
                    WHEN length(COALESCE(gateway_transaction_id, '')) > 15
                         AND length(?) <= 15 THEN gateway_transaction_id
                    ELSE ?
                END,
                updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(update.new_status.as_str())
        .bind(&update.gateway_status)
        .bind(&update.transaction_id)
        .bind(&update.transaction_id)
        .bind(&update.transaction_id)
        .bind(now)
        .bind(update.order_id.to_string())
        .bind(update.expected_status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        self.find_by_id(update.order_id)
            .await?
            .ok_or_else(|| AppError::Database("Failed to retrieve updated order".to_string()))
    }

    async fn record_transaction_id(
        &self,
        order_id: Uuid,
        gateway: GatewayKind,
        transaction_id: &str,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE orders
            SET gateway = ?,
                gateway_transaction_id = CASE
                    WHEN length(COALESCE(gateway_transaction_id, '')) > 15
                         AND length(?) <= 15 THEN gateway_transaction_id
                    ELSE ?
                END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(gateway.as_str())
        .bind(transaction_id)
        .bind(transaction_id)
        .bind(now)
        .bind(order_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn append_payment_log(
        &self,
        order_id: Uuid,
        raw_response: &Value,
        parsed_response: &Value,
        success: bool,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO payment_logs (order_id, created_at, raw_response, parsed_response, success)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(order_id.to_string())
        .bind(now)
        .bind(raw_response.to_string())
        .bind(parsed_response.to_string())
        .bind(success as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn payment_logs(&self, order_id: Uuid) -> Result<Vec<PaymentLogEntry>> {
        let rows = sqlx::query_as::<_, PaymentLogRow>(
            r#"
            SELECT id, order_id, created_at, raw_response, parsed_response, success
            FROM payment_logs
            WHERE order_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(order_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(Self::row_to_log).collect()
    }
}
