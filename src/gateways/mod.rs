use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    config::GatewayCredentials,
    domain::{GatewayKind, PaymentMethod},
    error::Result,
};

pub mod cobrepag;
pub mod legacy;
pub mod mercadopago;
pub mod status;
pub mod stripe;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use self::cobrepag::CobrePagGateway;
pub use self::mercadopago::MercadoPagoGateway;
pub use self::stripe::StripeGateway;

/// Card data as submitted by the checkout. Tokenizing gateways (Stripe,
/// Mercado Pago) only ever see `token`; the domestic acquirer takes the
/// raw fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardData {
    pub token: Option<String>,
    pub number: Option<String>,
    pub holder: Option<String>,
    /// "MM/YYYY"
    pub expiry: Option<String>,
    pub cvv: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    /// CPF/CNPJ, where the gateway wants one.
    pub document: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CardChargeRequest {
    pub order_id: Uuid,
    pub amount_cents: i64,
    pub card: CardData,
    pub customer: Customer,
    pub installments: u32,
}

#[derive(Debug, Clone)]
pub struct PixChargeRequest {
    pub order_id: Uuid,
    pub amount_cents: i64,
    pub customer: Customer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Approved,
    Pending,
    Rejected,
}

/// Outcome of a charge attempt. An explicit upstream decline comes back as
/// `Rejected`, not as an error; errors mean the call itself failed.
#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub status: ChargeStatus,
    pub transaction_id: Option<String>,
    pub message: Option<String>,
    pub raw_response: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct PixCharge {
    pub qr_code_image: Option<String>,
    pub qr_code_text: String,
    pub transaction_id: Option<String>,
    pub raw_response: serde_json::Value,
}

/// Raw result of a status poll. Adapters report the gateway's own code and
/// message verbatim; folding them onto the internal lifecycle is the
/// normalizer's job, not theirs. A transaction the gateway does not know yet
/// comes back with both fields empty (normalizes to pending), never as an
/// error.
#[derive(Debug, Clone, Default)]
pub struct StatusProbe {
    pub gateway_status: Option<String>,
    pub status_code: Option<i64>,
    pub raw_response: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ConnectionCheck {
    pub ok: bool,
    pub message: String,
}

/// Parsed inbound webhook. Constructed per request, consumed by the
/// reconciliation engine, discarded.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    /// None for sources that do not identify a gateway (the legacy
    /// storefront); the engine then falls back to the order's record.
    pub gateway: Option<GatewayKind>,
    /// Where the event came from, for audit and the downstream payload.
    pub source: String,
    pub transaction_id: Option<String>,
    pub order_reference: Option<String>,
    pub status_code: Option<i64>,
    pub status_message: Option<String>,
    pub raw: serde_json::Value,
}

/// The capability contract every gateway implements. Wire formats differ
/// completely between gateways; nothing above this trait sees a
/// gateway-specific field name.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn kind(&self) -> GatewayKind;

    fn supported_methods(&self) -> &'static [PaymentMethod];

    /// Credential fields this gateway needs configured, for the registry
    /// listing and the admin surface.
    fn required_credentials(&self) -> &'static [&'static str];

    async fn process_card_payment(
        &self,
        request: &CardChargeRequest,
        credentials: &GatewayCredentials,
    ) -> Result<ChargeOutcome>;

    /// Fails with `UnsupportedOperation` for gateways without PIX support,
    /// before any network traffic.
    async fn generate_pix(
        &self,
        request: &PixChargeRequest,
        credentials: &GatewayCredentials,
    ) -> Result<PixCharge>;

    async fn verify_payment_status(
        &self,
        transaction_id: &str,
        credentials: &GatewayCredentials,
    ) -> Result<StatusProbe>;

    /// Returns `Ok(None)` when the payload matches no recognized shape for
    /// this gateway; the caller treats that as a no-op. A present but
    /// invalid signature is a `Validation` error, not `None`.
    fn parse_webhook(
        &self,
        body: &[u8],
        decoded: &serde_json::Value,
        headers: &HeaderMap,
        credentials: &GatewayCredentials,
    ) -> Result<Option<WebhookEvent>>;

    /// Lightweight reachability/credential check. A 401 is the only failure
    /// signal from a reachable endpoint; any other HTTP response proves the
    /// endpoint exists and accepts the credential format.
    async fn test_connection(&self, credentials: &GatewayCredentials) -> Result<ConnectionCheck>;
}

/// Outbound order references are capped at 16 characters by the gateways'
/// reference fields, so a full order id gets truncated on the way out and
/// resolved back by prefix on the way in.
pub fn truncated_reference(order_id: &Uuid) -> String {
    order_id.to_string()[..16].to_string()
}

/// Maps a gateway identifier onto its adapter. Built once at startup and
/// read-only afterwards.
pub struct GatewayRegistry {
    adapters: HashMap<GatewayKind, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn with_defaults(http: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CobrePagGateway::new(http.clone())));
        registry.register(Arc::new(MercadoPagoGateway::new(http)));
        registry.register(Arc::new(StripeGateway::new()));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn GatewayAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: GatewayKind) -> Option<Arc<dyn GatewayAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn resolve(&self, kind: GatewayKind) -> Result<Arc<dyn GatewayAdapter>> {
        self.get(kind).ok_or_else(|| {
            crate::error::AppError::Config(format!("gateway {} is not registered", kind))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn GatewayAdapter>> {
        self.adapters.values()
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper shared by adapters: gateways are inconsistent about whether a
/// numeric field arrives as a number or a string.
pub(crate) fn value_as_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Helper shared by adapters: ids arrive as numbers or strings too.
pub(crate) fn value_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
