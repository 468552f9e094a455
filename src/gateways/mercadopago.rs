//! Mercado Pago, the wallet/PIX processor. Plain JSON REST under a Bearer
//! token. Its webhooks are thin: most carry only a payment id and expect the
//! receiver to fetch the payment for the actual status, which the
//! reconciliation engine does through `verify_payment_status`.

use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

use crate::{
    config::GatewayCredentials,
    domain::{GatewayKind, PaymentMethod},
    error::{AppError, Result},
    gateways::{
        value_as_string, CardChargeRequest, ChargeOutcome, ChargeStatus, ConnectionCheck,
        GatewayAdapter, PixCharge, PixChargeRequest, StatusProbe, WebhookEvent,
    },
};

type HmacSha256 = Hmac<Sha256>;

pub struct MercadoPagoGateway {
    http: reqwest::Client,
}

impl MercadoPagoGateway {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn token(credentials: &GatewayCredentials) -> Result<&str> {
        credentials
            .access_token
            .as_deref()
            .ok_or_else(|| AppError::Config("mercadopago: access_token not configured".into()))
    }

    fn base_url(credentials: &GatewayCredentials) -> &str {
        if credentials.base_url.is_empty() {
            "https://api.mercadopago.com"
        } else {
            credentials.base_url.trim_end_matches('/')
        }
    }

    /// Mercado Pago takes decimal reais, not cents.
    fn amount_reais(amount_cents: i64) -> f64 {
        amount_cents as f64 / 100.0
    }

    async fn create_payment(
        &self,
        credentials: &GatewayCredentials,
        idempotency_key: &str,
        payload: &Value,
    ) -> Result<Value> {
        let token = Self::token(credentials)?;
        let url = format!("{}/v1/payments", Self::base_url(credentials));
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header("X-Idempotency-Key", idempotency_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("mercadopago: {}", e)))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("mercadopago: invalid response body: {}", e)))?;

        if !status.is_success() {
            let detail = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request rejected");
            return Err(AppError::Gateway(format!(
                "mercadopago: HTTP {}: {}",
                status, detail
            )));
        }
        Ok(body)
    }

    fn charge_status(body: &Value) -> (ChargeStatus, Option<String>) {
        let status = body.get("status").and_then(Value::as_str).unwrap_or("");
        let detail = body
            .get("status_detail")
            .and_then(Value::as_str)
            .map(String::from);
        let mapped = match status {
            "approved" => ChargeStatus::Approved,
            "rejected" | "cancelled" => ChargeStatus::Rejected,
            _ => ChargeStatus::Pending,
        };
        (mapped, detail.or_else(|| Some(status.to_string())))
    }

    /// `x-signature: ts=...,v1=...` is an HMAC-SHA256 over a manifest built
    /// from the resource id, the `x-request-id` header and the timestamp.
    /// Only enforced when a signing secret is configured.
    fn verify_signature(
        headers: &HeaderMap,
        data_id: &str,
        secret: &str,
    ) -> Result<()> {
        let signature = headers
            .get("x-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Validation("mercadopago: missing x-signature".into()))?;

        let mut ts = None;
        let mut v1 = None;
        for part in signature.split(',') {
            match part.trim().split_once('=') {
                Some(("ts", value)) => ts = Some(value.trim()),
                Some(("v1", value)) => v1 = Some(value.trim()),
                _ => {}
            }
        }
        let (ts, v1) = match (ts, v1) {
            (Some(ts), Some(v1)) => (ts, v1),
            _ => return Err(AppError::Validation("mercadopago: malformed x-signature".into())),
        };

        let request_id = headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let manifest = format!("id:{};request-id:{};ts:{};", data_id, request_id, ts);

        let expected = hex::decode(v1)
            .map_err(|_| AppError::Validation("mercadopago: malformed x-signature".into()))?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AppError::Config(format!("mercadopago: bad webhook secret: {}", e)))?;
        mac.update(manifest.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| AppError::Validation("mercadopago: invalid webhook signature".into()))
    }
}

#[async_trait]
impl GatewayAdapter for MercadoPagoGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Mercadopago
    }

    fn supported_methods(&self) -> &'static [PaymentMethod] {
        &[PaymentMethod::CreditCard, PaymentMethod::Pix]
    }

    fn required_credentials(&self) -> &'static [&'static str] {
        &["access_token"]
    }

    async fn process_card_payment(
        &self,
        request: &CardChargeRequest,
        credentials: &GatewayCredentials,
    ) -> Result<ChargeOutcome> {
        let token = request.card.token.as_deref().ok_or_else(|| {
            AppError::Validation("mercadopago: a card token is required".into())
        })?;

        let payload = json!({
            "transaction_amount": Self::amount_reais(request.amount_cents),
            "token": token,
            "installments": request.installments.max(1),
            "description": format!("Pedido {}", request.order_id),
            "external_reference": request.order_id.to_string(),
            "payer": {
                "email": request.customer.email,
            },
        });

        let body = self
            .create_payment(credentials, &request.order_id.to_string(), &payload)
            .await?;
        let (status, message) = Self::charge_status(&body);
        let transaction_id = body.get("id").and_then(value_as_string);

        Ok(ChargeOutcome {
            status,
            transaction_id,
            message,
            raw_response: body,
        })
    }

    async fn generate_pix(
        &self,
        request: &PixChargeRequest,
        credentials: &GatewayCredentials,
    ) -> Result<PixCharge> {
        let payload = json!({
            "transaction_amount": Self::amount_reais(request.amount_cents),
            "payment_method_id": "pix",
            "description": format!("Pedido {}", request.order_id),
            "external_reference": request.order_id.to_string(),
            "payer": {
                "email": request.customer.email,
                "first_name": request.customer.name,
            },
        });

        let body = self
            .create_payment(credentials, &request.order_id.to_string(), &payload)
            .await?;

        let qr_text = body
            .pointer("/point_of_interaction/transaction_data/qr_code")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Gateway("mercadopago: pix response missing qr_code".into()))?
            .to_string();
        let qr_image = body
            .pointer("/point_of_interaction/transaction_data/qr_code_base64")
            .and_then(Value::as_str)
            .map(|b64| format!("data:image/png;base64,{}", b64));
        let transaction_id = body.get("id").and_then(value_as_string);

        Ok(PixCharge {
            qr_code_image: qr_image,
            qr_code_text: qr_text,
            transaction_id,
            raw_response: body,
        })
    }

    async fn verify_payment_status(
        &self,
        transaction_id: &str,
        credentials: &GatewayCredentials,
    ) -> Result<StatusProbe> {
        let token = Self::token(credentials)?;
        let url = format!(
            "{}/v1/payments/{}",
            Self::base_url(credentials),
            transaction_id
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("mercadopago: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(StatusProbe::default());
        }
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Gateway(format!("mercadopago: HTTP {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("mercadopago: invalid response body: {}", e)))?;
        let gateway_status = body
            .get("status")
            .and_then(Value::as_str)
            .map(String::from);

        Ok(StatusProbe {
            gateway_status,
            status_code: None,
            raw_response: body,
        })
    }

    fn parse_webhook(
        &self,
        _body: &[u8],
        decoded: &Value,
        headers: &HeaderMap,
        credentials: &GatewayCredentials,
    ) -> Result<Option<WebhookEvent>> {
        if !decoded.is_object() {
            return Ok(None);
        }

        // Both notification flavors: the JSON push ({"type": "payment",
        // "data": {"id": ...}}) and the older query/form style
        // ({"topic": "payment", "id": ...}).
        let kind = decoded
            .get("type")
            .or_else(|| decoded.get("topic"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if kind != "payment" {
            return Ok(None);
        }

        let transaction_id = decoded
            .pointer("/data/id")
            .and_then(value_as_string)
            .or_else(|| decoded.get("id").and_then(value_as_string));
        let Some(transaction_id) = transaction_id else {
            return Ok(None);
        };

        if let Some(secret) = credentials.webhook_secret.as_deref() {
            Self::verify_signature(headers, &transaction_id, secret)?;
        }

        // Some notification modes inline the payment; most do not. Whatever
        // is missing here the engine recovers by polling.
        let order_reference = decoded
            .get("external_reference")
            .and_then(value_as_string)
            .or_else(|| decoded.pointer("/data/external_reference").and_then(value_as_string));
        let status_message = decoded
            .pointer("/data/status")
            .and_then(Value::as_str)
            .map(String::from);

        Ok(Some(WebhookEvent {
            gateway: Some(GatewayKind::Mercadopago),
            source: "mercadopago".to_string(),
            transaction_id: Some(transaction_id),
            order_reference,
            status_code: None,
            status_message,
            raw: decoded.clone(),
        }))
    }

    async fn test_connection(&self, credentials: &GatewayCredentials) -> Result<ConnectionCheck> {
        let token = Self::token(credentials)?;
        let url = format!("{}/users/me", Self::base_url(credentials));
        match self.http.get(&url).bearer_auth(token).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::UNAUTHORIZED => {
                Ok(ConnectionCheck {
                    ok: false,
                    message: "credentials rejected".to_string(),
                })
            }
            Ok(response) => Ok(ConnectionCheck {
                ok: true,
                message: format!("reachable (HTTP {})", response.status()),
            }),
            Err(e) => Ok(ConnectionCheck {
                ok: false,
                message: format!("unreachable: {}", e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gateway() -> MercadoPagoGateway {
        MercadoPagoGateway::new(reqwest::Client::new())
    }

    fn creds_with_secret(secret: Option<&str>) -> GatewayCredentials {
        GatewayCredentials {
            webhook_secret: secret.map(String::from),
            ..Default::default()
        }
    }

    fn sign(data_id: &str, request_id: &str, ts: &str, secret: &str) -> String {
        let manifest = format!("id:{};request-id:{};ts:{};", data_id, request_id, ts);
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(manifest.as_bytes());
        format!("ts={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn parses_payment_notification() {
        let event = gateway()
            .parse_webhook(
                b"",
                &json!({"type": "payment", "data": {"id": 123456789}}),
                &HeaderMap::new(),
                &creds_with_secret(None),
            )
            .unwrap()
            .unwrap();

        assert_eq!(event.transaction_id.as_deref(), Some("123456789"));
        assert!(event.status_message.is_none());
        assert!(event.order_reference.is_none());
    }

    #[test]
    fn parses_topic_style_notification() {
        let event = gateway()
            .parse_webhook(
                b"",
                &json!({"topic": "payment", "id": "987"}),
                &HeaderMap::new(),
                &creds_with_secret(None),
            )
            .unwrap()
            .unwrap();
        assert_eq!(event.transaction_id.as_deref(), Some("987"));
    }

    #[test]
    fn non_payment_notifications_are_ignored() {
        let out = gateway()
            .parse_webhook(
                b"",
                &json!({"type": "plan", "data": {"id": 1}}),
                &HeaderMap::new(),
                &creds_with_secret(None),
            )
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn accepts_valid_signature() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "req-1".parse().unwrap());
        headers.insert(
            "x-signature",
            sign("555", "req-1", "1700000000", "topsecret").parse().unwrap(),
        );

        let event = gateway()
            .parse_webhook(
                b"",
                &json!({"type": "payment", "data": {"id": "555"}}),
                &headers,
                &creds_with_secret(Some("topsecret")),
            )
            .unwrap();
        assert!(event.is_some());
    }

    #[test]
    fn rejects_bad_signature() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "req-1".parse().unwrap());
        headers.insert(
            "x-signature",
            sign("555", "req-1", "1700000000", "wrong-secret").parse().unwrap(),
        );

        let err = gateway()
            .parse_webhook(
                b"",
                &json!({"type": "payment", "data": {"id": "555"}}),
                &headers,
                &creds_with_secret(Some("topsecret")),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn rejects_missing_signature_when_secret_configured() {
        let err = gateway()
            .parse_webhook(
                b"",
                &json!({"type": "payment", "data": {"id": "555"}}),
                &HeaderMap::new(),
                &creds_with_secret(Some("topsecret")),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn converts_cents_to_reais() {
        assert!((MercadoPagoGateway::amount_reais(123_45) - 123.45).abs() < 1e-9);
    }
}
