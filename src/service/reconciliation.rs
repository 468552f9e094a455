//! The reconciliation engine: every path that moves an order through its
//! payment lifecycle funnels into [`ReconciliationEngine::apply_transition`],
//! so webhooks, status polls and synchronous charges all obey the same
//! monotonic rules and leave the same audit trail.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    config::{GatewayCredentials, Settings},
    domain::{is_gateway_issued, GatewayKind, Order, OrderStatus, Transition},
    error::{AppError, Result},
    gateways::{
        status::normalize, truncated_reference, CardChargeRequest, CardData, ChargeOutcome,
        ChargeStatus, Customer, GatewayRegistry, PixCharge, PixChargeRequest, StatusProbe,
        WebhookEvent,
    },
    integrations::DownstreamNotifier,
    repository::{OrderRepository, PaymentStateUpdate},
    service::resolver::OrderResolver,
};

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub order_id: Uuid,
    pub status: OrderStatus,
    /// Whether this call actually moved the order.
    pub applied: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub scanned: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

pub struct ReconciliationEngine {
    orders: Arc<dyn OrderRepository>,
    resolver: OrderResolver,
    registry: Arc<GatewayRegistry>,
    notifier: Arc<DownstreamNotifier>,
    settings: Arc<Settings>,
}

impl ReconciliationEngine {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        registry: Arc<GatewayRegistry>,
        notifier: Arc<DownstreamNotifier>,
        settings: Arc<Settings>,
    ) -> Self {
        let resolver = OrderResolver::new(orders.clone());
        Self {
            orders,
            resolver,
            registry,
            notifier,
            settings,
        }
    }

    pub fn credentials(&self, gateway: GatewayKind) -> Result<GatewayCredentials> {
        self.settings
            .gateways
            .for_kind(gateway)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("gateway {} is not configured", gateway)))
    }

    /// Webhook-driven entry point: resolve, normalize, apply, notify.
    pub async fn apply_webhook_event(
        &self,
        event: WebhookEvent,
        query_reference: Option<&str>,
    ) -> Result<ReconcileOutcome> {
        let order = self.resolver.resolve(&event, query_reference).await?;
        let gateway = order.gateway.or(event.gateway);

        let mut status_code = event.status_code;
        let mut status_message = event.status_message.clone();
        let mut raw = event.raw.clone();

        // Thin notifications (Mercado Pago style) name a transaction but no
        // status; recover it by asking the gateway.
        if status_code.is_none() && status_message.is_none() {
            if let (Some(gateway), Some(transaction_id)) =
                (gateway, event.transaction_id.as_deref())
            {
                if let Some(probe) = self.try_poll(gateway, transaction_id).await {
                    status_code = probe.status_code;
                    status_message = probe.gateway_status.clone();
                    raw = json!({ "webhook": event.raw, "poll": probe.raw_response });
                }
            }
        }

        let target = normalize(gateway, status_code, status_message.as_deref());
        let gateway_status = status_message.or_else(|| status_code.map(|c| c.to_string()));

        self.apply_transition(
            order,
            target,
            gateway_status,
            event.transaction_id.clone(),
            &event.source,
            raw,
            true,
        )
        .await
    }

    /// Polls the gateway, degrading every failure to "no update": a network
    /// blip must never decide an order's fate.
    async fn try_poll(&self, gateway: GatewayKind, transaction_id: &str) -> Option<StatusProbe> {
        let adapter = match self.registry.resolve(gateway) {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::warn!("Cannot poll {}: {}", gateway, e);
                return None;
            }
        };
        let credentials = match self.credentials(gateway) {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::warn!("Cannot poll {}: {}", gateway, e);
                return None;
            }
        };

        let call_timeout = Duration::from_secs(self.settings.sync.call_timeout_secs);
        match tokio::time::timeout(
            call_timeout,
            adapter.verify_payment_status(transaction_id, &credentials),
        )
        .await
        {
            Ok(Ok(probe)) => Some(probe),
            Ok(Err(e)) => {
                tracing::warn!(transaction_id, "Status poll against {} failed: {}", gateway, e);
                None
            }
            Err(_) => {
                tracing::warn!(transaction_id, "Status poll against {} timed out", gateway);
                None
            }
        }
    }

    /// The single write path. `record_noop` keeps webhook redeliveries in
    /// the audit trail while sparing it one row per idle poll.
    #[allow(clippy::too_many_arguments)]
    async fn apply_transition(
        &self,
        order: Order,
        target: OrderStatus,
        gateway_status: Option<String>,
        transaction_id: Option<String>,
        source: &str,
        raw: Value,
        record_noop: bool,
    ) -> Result<ReconcileOutcome> {
        let parsed = json!({
            "order_id": order.id,
            "previous_status": order.status,
            "target_status": target,
            "gateway_status": &gateway_status,
            "transaction_id": &transaction_id,
            "source": source,
        });

        match order.status.plan_transition(target) {
            Transition::Rejected => {
                tracing::warn!(
                    order_id = %order.id,
                    from = order.status.as_str(),
                    to = target.as_str(),
                    source,
                    "Rejected backward status transition"
                );
                self.orders
                    .append_payment_log(order.id, &raw, &parsed, false)
                    .await?;
                Ok(ReconcileOutcome {
                    order_id: order.id,
                    status: order.status,
                    applied: false,
                })
            }
            Transition::Noop => {
                // Same state again; still absorb a fresher transaction id
                // and verbatim status for the audit columns.
                let updated = self
                    .orders
                    .apply_payment_update(PaymentStateUpdate {
                        order_id: order.id,
                        expected_status: order.status,
                        new_status: order.status,
                        gateway_status,
                        transaction_id,
                    })
                    .await?;
                if record_noop {
                    self.orders
                        .append_payment_log(order.id, &raw, &parsed, true)
                        .await?;
                }
                Ok(ReconcileOutcome {
                    order_id: order.id,
                    status: updated.status,
                    applied: false,
                })
            }
            Transition::Apply => {
                let updated = self
                    .orders
                    .apply_payment_update(PaymentStateUpdate {
                        order_id: order.id,
                        expected_status: order.status,
                        new_status: target,
                        gateway_status,
                        transaction_id,
                    })
                    .await?;

                if updated.status != target {
                    // A concurrent delivery moved the order somewhere else
                    // between our read and the conditional write.
                    tracing::warn!(
                        order_id = %order.id,
                        expected = target.as_str(),
                        found = updated.status.as_str(),
                        "Concurrent update won; leaving order as found"
                    );
                    self.orders
                        .append_payment_log(order.id, &raw, &parsed, false)
                        .await?;
                    return Ok(ReconcileOutcome {
                        order_id: order.id,
                        status: updated.status,
                        applied: false,
                    });
                }

                self.orders
                    .append_payment_log(order.id, &raw, &parsed, true)
                    .await?;
                tracing::info!(
                    order_id = %order.id,
                    from = order.status.as_str(),
                    to = target.as_str(),
                    source,
                    "Order status updated"
                );
                // State is durable; delivery failures from here on are the
                // notifier's problem, not this request's.
                self.notifier
                    .order_status_changed(&updated, source, &raw)
                    .await;

                Ok(ReconcileOutcome {
                    order_id: order.id,
                    status: target,
                    applied: true,
                })
            }
        }
    }

    /// Poll-driven entry point for a batch of recent pending orders.
    pub async fn sync_pending_orders(
        &self,
        max_age_hours: Option<i64>,
        limit: Option<i64>,
    ) -> Result<SyncReport> {
        let max_age_hours = max_age_hours.unwrap_or(self.settings.sync.max_age_hours);
        let limit = limit.unwrap_or(self.settings.sync.limit);
        let cutoff = Utc::now() - ChronoDuration::hours(max_age_hours);
        let throttle = Duration::from_millis(self.settings.sync.throttle_ms);

        let pending = self.orders.list_pending_since(cutoff, limit).await?;
        let mut report = SyncReport {
            scanned: pending.len(),
            ..Default::default()
        };

        for (i, order) in pending.into_iter().enumerate() {
            if i > 0 && !throttle.is_zero() {
                tokio::time::sleep(throttle).await;
            }
            match self.sync_single(order).await {
                Ok(outcome) if outcome.applied => report.updated += 1,
                Ok(_) => report.unchanged += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!("Sync failed for one order: {}", e);
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            updated = report.updated,
            unchanged = report.unchanged,
            failed = report.failed,
            "Pending order sync finished"
        );
        Ok(report)
    }

    /// Operator-invoked resync of one specific order.
    pub async fn sync_order(&self, order_id: Uuid) -> Result<ReconcileOutcome> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| AppError::OrderNotFound(format!("order {} not found", order_id)))?;
        self.sync_single(order).await
    }

    async fn sync_single(&self, order: Order) -> Result<ReconcileOutcome> {
        let gateway = order.gateway.ok_or_else(|| {
            AppError::Validation(format!("order {} has no gateway assigned", order.id))
        })?;
        let reference = self.pollable_reference(&order).await?;

        let Some(probe) = self.try_poll(gateway, &reference).await else {
            // Degraded poll: the order stays pending rather than taking a
            // network failure as its new state.
            return Ok(ReconcileOutcome {
                order_id: order.id,
                status: order.status,
                applied: false,
            });
        };

        let target = normalize(Some(gateway), probe.status_code, probe.gateway_status.as_deref());
        let gateway_status = probe
            .gateway_status
            .clone()
            .or_else(|| probe.status_code.map(|c| c.to_string()));
        // Promote a scraped gateway-issued id onto the order while we are
        // at it. The truncated fallback reference is 16 characters and would
        // pass the length test, so it is excluded explicitly.
        let transaction_id = (is_gateway_issued(&reference)
            && reference != truncated_reference(&order.id))
        .then(|| reference.clone());

        self.apply_transition(
            order,
            target,
            gateway_status,
            transaction_id,
            &format!("poll:{}", gateway),
            probe.raw_response,
            false,
        )
        .await
    }

    /// What to query the gateway with: a real transaction id from the order
    /// or its audit trail beats the locally-truncated order reference,
    /// which is collision-prone.
    async fn pollable_reference(&self, order: &Order) -> Result<String> {
        if let Some(transaction_id) = &order.gateway_transaction_id {
            if is_gateway_issued(transaction_id) {
                return Ok(transaction_id.clone());
            }
        }

        let logs = self.orders.payment_logs(order.id).await?;
        for entry in logs.iter().rev() {
            if let Some(transaction_id) = entry
                .parsed_response
                .get("transaction_id")
                .and_then(Value::as_str)
            {
                if is_gateway_issued(transaction_id) {
                    return Ok(transaction_id.to_string());
                }
            }
        }

        // A short tid still beats the truncated order reference.
        if let Some(transaction_id) = &order.gateway_transaction_id {
            if !transaction_id.is_empty() {
                return Ok(transaction_id.clone());
            }
        }

        Ok(truncated_reference(&order.id))
    }

    /// Synchronous card charge through the order's gateway.
    pub async fn charge_card(
        &self,
        order_id: Uuid,
        card: CardData,
        customer: Customer,
        installments: u32,
    ) -> Result<ChargeOutcome> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| AppError::OrderNotFound(format!("order {} not found", order_id)))?;
        let gateway = order.gateway.ok_or_else(|| {
            AppError::Validation(format!("order {} has no gateway assigned", order.id))
        })?;
        let adapter = self.registry.resolve(gateway)?;
        let credentials = self.credentials(gateway)?;

        let request = CardChargeRequest {
            order_id,
            amount_cents: order.total_cents,
            card,
            customer,
            installments,
        };

        let source = format!("charge:{}", gateway);
        let outcome = match adapter.process_card_payment(&request, &credentials).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let parsed = json!({
                    "order_id": order.id,
                    "source": source,
                    "error": e.to_string(),
                });
                self.orders
                    .append_payment_log(order.id, &Value::Null, &parsed, false)
                    .await?;
                return Err(e);
            }
        };

        if let Some(transaction_id) = &outcome.transaction_id {
            self.orders
                .record_transaction_id(order.id, gateway, transaction_id)
                .await?;
        }

        let charge_status = match outcome.status {
            ChargeStatus::Approved => "approved",
            ChargeStatus::Pending => "pending",
            ChargeStatus::Rejected => "rejected",
        };
        let parsed = json!({
            "order_id": order.id,
            "source": &source,
            "charge_status": charge_status,
            "transaction_id": &outcome.transaction_id,
            "message": &outcome.message,
        });

        match outcome.status {
            ChargeStatus::Approved => {
                // Re-read so the transition starts from the row we just
                // stamped with the transaction id.
                let order = self
                    .orders
                    .find_by_id(order_id)
                    .await?
                    .ok_or_else(|| AppError::Database("order disappeared".to_string()))?;
                self.apply_transition(
                    order,
                    OrderStatus::Paid,
                    outcome.message.clone(),
                    outcome.transaction_id.clone(),
                    &source,
                    outcome.raw_response.clone(),
                    true,
                )
                .await?;
            }
            ChargeStatus::Pending => {
                self.orders
                    .append_payment_log(order.id, &outcome.raw_response, &parsed, true)
                    .await?;
            }
            ChargeStatus::Rejected => {
                self.orders
                    .append_payment_log(order.id, &outcome.raw_response, &parsed, false)
                    .await?;
            }
        }

        Ok(outcome)
    }

    /// PIX charge through the order's gateway.
    pub async fn create_pix(&self, order_id: Uuid, customer: Customer) -> Result<PixCharge> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| AppError::OrderNotFound(format!("order {} not found", order_id)))?;
        let gateway = order.gateway.ok_or_else(|| {
            AppError::Validation(format!("order {} has no gateway assigned", order.id))
        })?;
        let adapter = self.registry.resolve(gateway)?;
        let credentials = self.credentials(gateway)?;

        let request = PixChargeRequest {
            order_id,
            amount_cents: order.total_cents,
            customer,
        };

        let source = format!("pix:{}", gateway);
        let pix = match adapter.generate_pix(&request, &credentials).await {
            Ok(pix) => pix,
            // An unsupported method never reached the network; there is no
            // attempt to log.
            Err(e @ AppError::UnsupportedOperation(_)) => return Err(e),
            Err(e) => {
                let parsed = json!({
                    "order_id": order.id,
                    "source": source,
                    "error": e.to_string(),
                });
                self.orders
                    .append_payment_log(order.id, &Value::Null, &parsed, false)
                    .await?;
                return Err(e);
            }
        };

        if let Some(transaction_id) = &pix.transaction_id {
            self.orders
                .record_transaction_id(order.id, gateway, transaction_id)
                .await?;
        }

        let parsed = json!({
            "order_id": order.id,
            "source": source,
            "transaction_id": &pix.transaction_id,
        });
        self.orders
            .append_payment_log(order.id, &pix.raw_response, &parsed, true)
            .await?;

        Ok(pix)
    }
}
