use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Gateway-issued transaction ids are longer than 15 characters. Anything
/// shorter is a locally-truncated order reference used as a placeholder
/// until the gateway reports the real id, and must never clobber a real one.
pub fn is_gateway_issued(transaction_id: &str) -> bool {
    transaction_id.len() > 15
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Cobrepag,
    Mercadopago,
    Stripe,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Cobrepag => "cobrepag",
            GatewayKind::Mercadopago => "mercadopago",
            GatewayKind::Stripe => "stripe",
        }
    }
}

impl std::str::FromStr for GatewayKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cobrepag" => Ok(GatewayKind::Cobrepag),
            "mercadopago" => Ok(GatewayKind::Mercadopago),
            "stripe" => Ok(GatewayKind::Stripe),
            other => Err(format!("unknown gateway: {}", other)),
        }
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    Pix,
    Boleto,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::Pix => "pix",
            PaymentMethod::Boleto => "boleto",
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit_card" => Ok(PaymentMethod::CreditCard),
            "pix" => Ok(PaymentMethod::Pix),
            "boleto" => Ok(PaymentMethod::Boleto),
            other => Err(format!("unknown payment method: {}", other)),
        }
    }
}

/// Canonical order lifecycle state. Gateways report status in their own
/// vocabularies; everything is folded onto this enum before persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Canceled,
    Refunded,
}

/// What applying a target status to the current one should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Legal forward move, write it.
    Apply,
    /// Already at the target. Re-applying is a no-op, not an error.
    Noop,
    /// Would move the lifecycle backwards (or out of a terminal state).
    /// Out-of-order and replayed webhook deliveries land here.
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn plan_transition(self, target: OrderStatus) -> Transition {
        if self == target {
            return Transition::Noop;
        }
        match (self, target) {
            (OrderStatus::Pending, OrderStatus::Paid)
            | (OrderStatus::Pending, OrderStatus::Canceled)
            | (OrderStatus::Paid, OrderStatus::Refunded) => Transition::Apply,
            _ => Transition::Rejected,
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "canceled" => Ok(OrderStatus::Canceled),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    /// Integer minor units (centavos). Adapters convert at the wire.
    pub total_cents: i64,
    pub payment_method: PaymentMethod,
    pub gateway: Option<GatewayKind>,
    pub gateway_transaction_id: Option<String>,
    /// Verbatim (lightly normalized) status string from the gateway, kept
    /// for audit next to the canonical `status`.
    pub gateway_status: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// One entry of the append-only payment audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentLogEntry {
    pub id: i64,
    pub order_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub raw_response: serde_json::Value,
    pub parsed_response: serde_json::Value,
    pub success: bool,
}

/// A downstream automation endpoint that gets a POST after every real status
/// transition. The last delivery attempt's outcome is recorded on the row.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEndpoint {
    pub id: Uuid,
    pub url: String,
    pub enabled: bool,
    pub last_status_code: Option<i64>,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_moves_to_paid_and_canceled() {
        assert_eq!(
            OrderStatus::Pending.plan_transition(OrderStatus::Paid),
            Transition::Apply
        );
        assert_eq!(
            OrderStatus::Pending.plan_transition(OrderStatus::Canceled),
            Transition::Apply
        );
    }

    #[test]
    fn paid_moves_only_to_refunded() {
        assert_eq!(
            OrderStatus::Paid.plan_transition(OrderStatus::Refunded),
            Transition::Apply
        );
        assert_eq!(
            OrderStatus::Paid.plan_transition(OrderStatus::Pending),
            Transition::Rejected
        );
        assert_eq!(
            OrderStatus::Paid.plan_transition(OrderStatus::Canceled),
            Transition::Rejected
        );
    }

    #[test]
    fn terminal_states_reject_everything() {
        for target in [OrderStatus::Pending, OrderStatus::Paid, OrderStatus::Refunded] {
            assert_eq!(
                OrderStatus::Canceled.plan_transition(target),
                Transition::Rejected
            );
        }
        for target in [OrderStatus::Pending, OrderStatus::Paid, OrderStatus::Canceled] {
            assert_eq!(
                OrderStatus::Refunded.plan_transition(target),
                Transition::Rejected
            );
        }
    }

    #[test]
    fn reapplying_current_status_is_a_noop() {
        assert_eq!(
            OrderStatus::Paid.plan_transition(OrderStatus::Paid),
            Transition::Noop
        );
        assert_eq!(
            OrderStatus::Canceled.plan_transition(OrderStatus::Canceled),
            Transition::Noop
        );
    }

    #[test]
    fn transaction_id_length_classification() {
        assert!(is_gateway_issued("9999999999999999"));
        assert!(is_gateway_issued("pi_3OqXaD2eZvKYlo2C1cJx8Zc9"));
        assert!(!is_gateway_issued("999999999"));
        assert!(!is_gateway_issued(""));
    }
}
