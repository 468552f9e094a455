use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::*;
use crate::error::Result;

pub mod notification_repository;
pub mod order_repository;

pub use notification_repository::SqliteNotificationEndpointRepository;
pub use order_repository::SqliteOrderRepository;

/// Conditional payment-state write. `expected_status` makes the update a
/// compare-and-set: two racing deliveries computing the same target collapse
/// into one effective write, with no cross-process lock needed.
#[derive(Debug, Clone)]
pub struct PaymentStateUpdate {
    pub order_id: Uuid,
    pub expected_status: OrderStatus,
    pub new_status: OrderStatus,
    pub gateway_status: Option<String>,
    /// Subject to the length guard: a gateway-issued id is never replaced
    /// by a shorter placeholder.
    pub transaction_id: Option<String>,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create(&self, order: Order) -> Result<Order>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>>;
    /// All orders whose id starts with `prefix`. Callers decide what more
    /// than one match means; this layer never guesses.
    async fn find_by_id_prefix(&self, prefix: &str) -> Result<Vec<Order>>;
    async fn find_by_gateway_transaction_id(
        &self,
        gateway: GatewayKind,
        transaction_id: &str,
    ) -> Result<Option<Order>>;
    /// Pending orders created after `cutoff`, newest first.
    async fn list_pending_since(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Order>>;
    /// Applies the conditional update and returns the order as it stands
    /// afterwards, whether or not this call won the write.
    async fn apply_payment_update(&self, update: PaymentStateUpdate) -> Result<Order>;
    /// Records gateway + transaction id after a charge was initiated.
    async fn record_transaction_id(
        &self,
        order_id: Uuid,
        gateway: GatewayKind,
        transaction_id: &str,
    ) -> Result<()>;
    async fn append_payment_log(
        &self,
        order_id: Uuid,
        raw_response: &Value,
        parsed_response: &Value,
        success: bool,
    ) -> Result<()>;
    /// The audit trail in append order.
    async fn payment_logs(&self, order_id: Uuid) -> Result<Vec<PaymentLogEntry>>;
}

#[async_trait]
pub trait NotificationEndpointRepository: Send + Sync {
    async fn ensure_url(&self, url: &str) -> Result<NotificationEndpoint>;
    async fn list_enabled(&self) -> Result<Vec<NotificationEndpoint>>;
    async fn record_attempt(
        &self,
        id: Uuid,
        status_code: Option<u16>,
        error: Option<&str>,
    ) -> Result<()>;
}
