//! Test double for the gateway contract. Probes and charge outcomes are
//! scripted per transaction id; call counters let tests assert how often the
//! upstream was actually hit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::{json, Value};

use crate::{
    config::GatewayCredentials,
    domain::{GatewayKind, PaymentMethod},
    error::Result,
    gateways::{
        value_as_i64, value_as_string, CardChargeRequest, ChargeOutcome, ChargeStatus,
        ConnectionCheck, GatewayAdapter, PixCharge, PixChargeRequest, StatusProbe, WebhookEvent,
    },
};

pub struct FakeGateway {
    kind: GatewayKind,
    charge_status: ChargeStatus,
    probes: Mutex<HashMap<String, StatusProbe>>,
    pub verify_calls: AtomicUsize,
    pub charge_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new(kind: GatewayKind) -> Self {
        Self {
            kind,
            charge_status: ChargeStatus::Approved,
            probes: Mutex::new(HashMap::new()),
            verify_calls: AtomicUsize::new(0),
            charge_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_charge_status(mut self, status: ChargeStatus) -> Self {
        self.charge_status = status;
        self
    }

    /// Script what a status poll for `transaction_id` reports.
    pub fn set_probe(&self, transaction_id: &str, code: Option<i64>, message: Option<&str>) {
        self.probes.lock().unwrap().insert(
            transaction_id.to_string(),
            StatusProbe {
                gateway_status: message.map(String::from),
                status_code: code,
                raw_response: json!({
                    "transaction_id": transaction_id,
                    "code": code,
                    "message": message,
                }),
            },
        );
    }
}

#[async_trait]
impl GatewayAdapter for FakeGateway {
    fn kind(&self) -> GatewayKind {
        self.kind
    }

    fn supported_methods(&self) -> &'static [PaymentMethod] {
        &[PaymentMethod::CreditCard, PaymentMethod::Pix]
    }

    fn required_credentials(&self) -> &'static [&'static str] {
        &[]
    }

    async fn process_card_payment(
        &self,
        request: &CardChargeRequest,
        _credentials: &GatewayCredentials,
    ) -> Result<ChargeOutcome> {
        self.charge_calls.fetch_add(1, Ordering::SeqCst);
        let transaction_id = format!("fake-tx-{}", request.order_id.simple());
        Ok(ChargeOutcome {
            status: self.charge_status,
            transaction_id: Some(transaction_id.clone()),
            message: Some("scripted outcome".to_string()),
            raw_response: json!({"transaction_id": transaction_id}),
        })
    }

    async fn generate_pix(
        &self,
        request: &PixChargeRequest,
        _credentials: &GatewayCredentials,
    ) -> Result<PixCharge> {
        let transaction_id = format!("fake-pix-{}", request.order_id.simple());
        Ok(PixCharge {
            qr_code_image: None,
            qr_code_text: "00020126fakepixpayload".to_string(),
            transaction_id: Some(transaction_id.clone()),
            raw_response: json!({"transaction_id": transaction_id}),
        })
    }

    async fn verify_payment_status(
        &self,
        transaction_id: &str,
        _credentials: &GatewayCredentials,
    ) -> Result<StatusProbe> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .probes
            .lock()
            .unwrap()
            .get(transaction_id)
            .cloned()
            .unwrap_or_default())
    }

    fn parse_webhook(
        &self,
        _body: &[u8],
        decoded: &Value,
        _headers: &HeaderMap,
        _credentials: &GatewayCredentials,
    ) -> Result<Option<WebhookEvent>> {
        if !decoded.is_object() {
            return Ok(None);
        }
        Ok(Some(WebhookEvent {
            gateway: Some(self.kind),
            source: self.kind.as_str().to_string(),
            transaction_id: decoded.get("tid").and_then(value_as_string),
            order_reference: decoded.get("order_id").and_then(value_as_string),
            status_code: decoded.get("code").and_then(value_as_i64),
            status_message: decoded
                .get("message")
                .and_then(Value::as_str)
                .map(String::from),
            raw: decoded.clone(),
        }))
    }

    async fn test_connection(&self, _credentials: &GatewayCredentials) -> Result<ConnectionCheck> {
        Ok(ConnectionCheck {
            ok: true,
            message: "fake gateway".to_string(),
        })
    }
}
