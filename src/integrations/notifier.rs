//! Forwards order status changes to external automation endpoints.
//!
//! Delivery is strictly after the order state is durably updated, so a dead
//! endpoint can never fail the triggering request: exhausted retries are
//! logged and recorded on the endpoint row, nothing more. Attempts back off
//! linearly (attempt number times a fixed delay) and each one is bounded by
//! a timeout and the process shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::{
    config::NotificationConfig,
    domain::{NotificationEndpoint, Order},
    error::{AppError, Result},
    repository::NotificationEndpointRepository,
};

pub struct DownstreamNotifier {
    http: reqwest::Client,
    endpoints: Arc<dyn NotificationEndpointRepository>,
    config: NotificationConfig,
    shutdown: CancellationToken,
}

/// The JSON body POSTed downstream after a transition.
pub fn status_change_payload(order: &Order, webhook_source: &str, raw_data: &Value) -> Value {
    json!({
        "event": "order.status_changed",
        "timestamp": Utc::now().to_rfc3339(),
        "order": order,
        "webhook_source": webhook_source,
        "raw_data": raw_data,
    })
}

impl DownstreamNotifier {
    pub fn new(
        http: reqwest::Client,
        endpoints: Arc<dyn NotificationEndpointRepository>,
        config: NotificationConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            http,
            endpoints,
            config,
            shutdown,
        }
    }

    /// Fans the payload out to every enabled endpoint. Failures are
    /// per-endpoint and never propagate.
    pub async fn order_status_changed(&self, order: &Order, source: &str, raw_data: &Value) {
        let endpoints = match self.endpoints.list_enabled().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                tracing::error!("Failed to load notification endpoints: {}", e);
                return;
            }
        };
        if endpoints.is_empty() {
            return;
        }

        let payload = status_change_payload(order, source, raw_data);
        for endpoint in endpoints {
            if let Err(e) = self.deliver(&endpoint, &payload).await {
                tracing::error!(
                    endpoint = %endpoint.url,
                    order_id = %order.id,
                    "Notification delivery failed: {}",
                    e
                );
            }
        }
    }

    async fn deliver(&self, endpoint: &NotificationEndpoint, payload: &Value) -> Result<()> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let delay = Duration::from_secs(self.config.retry_delay_secs);
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_attempts.max(1) {
            let request = self
                .http
                .post(&endpoint.url)
                .timeout(timeout)
                .json(payload)
                .send();

            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(AppError::NotificationDelivery(
                        "shutting down before delivery completed".to_string(),
                    ));
                }
                result = request => result,
            };

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    let error = (!status.is_success()).then(|| format!("HTTP {}", status));
                    self.record(endpoint, Some(status.as_u16()), error.as_deref())
                        .await;
                    if status.is_success() {
                        return Ok(());
                    }
                    last_error = format!("HTTP {}", status);
                }
                Err(e) => {
                    let status = e.status().map(|s| s.as_u16());
                    last_error = e.to_string();
                    self.record(endpoint, status, Some(&last_error)).await;
                }
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(delay * attempt).await;
            }
        }

        Err(AppError::NotificationDelivery(format!(
            "{} after {} attempts: {}",
            endpoint.url, self.config.max_attempts, last_error
        )))
    }

    async fn record(
        &self,
        endpoint: &NotificationEndpoint,
        status_code: Option<u16>,
        error: Option<&str>,
    ) {
        if let Err(e) = self
            .endpoints
            .record_attempt(endpoint.id, status_code, error)
            .await
        {
            tracing::error!("Failed to record notification attempt: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderStatus, PaymentMethod};
    use uuid::Uuid;

    #[test]
    fn payload_carries_event_order_and_source() {
        let order = Order {
            id: Uuid::new_v4(),
            total_cents: 5000,
            payment_method: PaymentMethod::Pix,
            gateway: None,
            gateway_transaction_id: None,
            gateway_status: None,
            status: OrderStatus::Paid,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            shipped_at: None,
            delivered_at: None,
        };

        let payload = status_change_payload(&order, "mercadopago", &json!({"data": {"id": 1}}));
        assert_eq!(payload["event"], "order.status_changed");
        assert_eq!(payload["webhook_source"], "mercadopago");
        assert_eq!(payload["order"]["status"], "paid");
        assert_eq!(payload["raw_data"]["data"]["id"], 1);
        assert!(payload["timestamp"].is_string());
    }
}
