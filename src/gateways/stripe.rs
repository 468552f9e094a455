//! Stripe, the international card processor. The only adapter that goes
//! through a typed client rather than raw REST: payment intents for charges,
//! `Webhook::construct_event` for signature-checked webhook parsing. No PIX
//! support; `generate_pix` refuses before any network traffic.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::Value;
use stripe::{
    Client, CreatePaymentIntent, Currency, Customer, EventObject, EventType, ListCustomers,
    PaymentIntent, PaymentIntentId, Webhook, WebhookError,
};

use crate::{
    config::GatewayCredentials,
    domain::{GatewayKind, PaymentMethod},
    error::{AppError, Result},
    gateways::{
        CardChargeRequest, ChargeOutcome, ChargeStatus, ConnectionCheck, GatewayAdapter,
        PixCharge, PixChargeRequest, StatusProbe, WebhookEvent,
    },
};

pub struct StripeGateway;

impl StripeGateway {
    pub fn new() -> Self {
        Self
    }

    fn client(credentials: &GatewayCredentials) -> Result<Client> {
        let key = credentials
            .secret_key
            .as_deref()
            .ok_or_else(|| AppError::Config("stripe: secret_key not configured".into()))?;
        Ok(Client::new(key.to_string()))
    }

    fn intent_fields(raw: &Value) -> (Option<String>, Option<String>) {
        let status = raw.get("status").and_then(Value::as_str).map(String::from);
        let message = raw
            .pointer("/last_payment_error/message")
            .and_then(Value::as_str)
            .map(String::from);
        (status, message)
    }
}

impl Default for StripeGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayAdapter for StripeGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Stripe
    }

    fn supported_methods(&self) -> &'static [PaymentMethod] {
        &[PaymentMethod::CreditCard]
    }

    fn required_credentials(&self) -> &'static [&'static str] {
        &["secret_key", "webhook_secret"]
    }

    async fn process_card_payment(
        &self,
        request: &CardChargeRequest,
        credentials: &GatewayCredentials,
    ) -> Result<ChargeOutcome> {
        let client = Self::client(credentials)?;
        let pm = request.card.token.as_deref().ok_or_else(|| {
            AppError::Validation("stripe: a tokenized payment method is required".into())
        })?;

        // Installments are an acquirer concern; Stripe charges the full
        // amount in one capture.
        let mut params = CreatePaymentIntent::new(request.amount_cents, Currency::BRL);
        let description = format!("Pedido {}", request.order_id);
        params.description = Some(&description);
        params.confirm = Some(true);
        params.payment_method = Some(
            pm.parse()
                .map_err(|_| AppError::Validation("stripe: invalid payment method id".into()))?,
        );
        params.payment_method_types = Some(vec!["card".to_string()]);

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("order_id".to_string(), request.order_id.to_string());
        metadata.insert("customer_email".to_string(), request.customer.email.clone());
        params.metadata = Some(metadata);

        let intent = match PaymentIntent::create(&client, params).await {
            Ok(intent) => intent,
            // An explicit decline is a result, not an error.
            Err(stripe::StripeError::Stripe(e)) if e.http_status == 402 => {
                let message = e
                    .message
                    .clone()
                    .unwrap_or_else(|| "card declined".to_string());
                return Ok(ChargeOutcome {
                    status: ChargeStatus::Rejected,
                    transaction_id: e.charge.clone(),
                    raw_response: serde_json::json!({"error": &message}),
                    message: Some(message),
                });
            }
            Err(e) => return Err(AppError::Gateway(format!("stripe: {}", e))),
        };

        let raw = serde_json::to_value(&intent)
            .map_err(|e| AppError::Gateway(format!("stripe: {}", e)))?;
        let (status, error_message) = Self::intent_fields(&raw);
        let mapped = match status.as_deref() {
            Some("succeeded") => ChargeStatus::Approved,
            Some("canceled") | Some("requires_payment_method") => ChargeStatus::Rejected,
            _ => ChargeStatus::Pending,
        };

        Ok(ChargeOutcome {
            status: mapped,
            transaction_id: Some(intent.id.to_string()),
            message: error_message.or(status),
            raw_response: raw,
        })
    }

    async fn generate_pix(
        &self,
        _request: &PixChargeRequest,
        _credentials: &GatewayCredentials,
    ) -> Result<PixCharge> {
        Err(AppError::UnsupportedOperation(
            "stripe does not support pix charges".into(),
        ))
    }

    async fn verify_payment_status(
        &self,
        transaction_id: &str,
        credentials: &GatewayCredentials,
    ) -> Result<StatusProbe> {
        let client = Self::client(credentials)?;

        // A truncated local reference is not a payment intent id; Stripe
        // cannot know it, so the order is simply still pending from here.
        let Ok(intent_id) = transaction_id.parse::<PaymentIntentId>() else {
            tracing::debug!(
                transaction_id,
                "stripe: reference is not a payment intent id, skipping poll"
            );
            return Ok(StatusProbe::default());
        };

        let intent = match PaymentIntent::retrieve(&client, &intent_id, &[]).await {
            Ok(intent) => intent,
            Err(stripe::StripeError::Stripe(e)) if e.http_status == 404 => {
                return Ok(StatusProbe::default());
            }
            Err(e) => return Err(AppError::Gateway(format!("stripe: {}", e))),
        };

        let raw = serde_json::to_value(&intent)
            .map_err(|e| AppError::Gateway(format!("stripe: {}", e)))?;
        let (status, _) = Self::intent_fields(&raw);

        Ok(StatusProbe {
            gateway_status: status,
            status_code: None,
            raw_response: raw,
        })
    }

    fn parse_webhook(
        &self,
        body: &[u8],
        _decoded: &Value,
        headers: &HeaderMap,
        credentials: &GatewayCredentials,
    ) -> Result<Option<WebhookEvent>> {
        let secret = credentials
            .webhook_secret
            .as_deref()
            .ok_or_else(|| AppError::Config("stripe: webhook_secret not configured".into()))?;
        let signature = headers
            .get("Stripe-Signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Validation("stripe: missing Stripe-Signature".into()))?;
        let payload = std::str::from_utf8(body)
            .map_err(|_| AppError::Validation("stripe: body is not valid utf-8".into()))?;

        let event = Webhook::construct_event(payload, signature, secret).map_err(|e| match e {
            WebhookError::BadSignature => {
                AppError::Validation("stripe: invalid webhook signature".into())
            }
            other => AppError::Validation(format!("stripe: webhook rejected: {}", other)),
        })?;

        match event.type_ {
            EventType::PaymentIntentSucceeded
            | EventType::PaymentIntentCanceled
            | EventType::PaymentIntentPaymentFailed => {
                if let EventObject::PaymentIntent(intent) = event.data.object {
                    let raw = serde_json::to_value(&intent)
                        .map_err(|e| AppError::Gateway(format!("stripe: {}", e)))?;
                    let (status, _) = Self::intent_fields(&raw);
                    let order_reference = raw
                        .pointer("/metadata/order_id")
                        .and_then(Value::as_str)
                        .map(String::from);

                    Ok(Some(WebhookEvent {
                        gateway: Some(GatewayKind::Stripe),
                        source: "stripe".to_string(),
                        transaction_id: Some(intent.id.to_string()),
                        order_reference,
                        status_code: None,
                        status_message: status,
                        raw,
                    }))
                } else {
                    Ok(None)
                }
            }
            EventType::ChargeRefunded => {
                if let EventObject::Charge(charge) = event.data.object {
                    let raw = serde_json::to_value(&charge)
                        .map_err(|e| AppError::Gateway(format!("stripe: {}", e)))?;
                    // The charge still reads "succeeded" after a refund; the
                    // event type is the actual signal.
                    let transaction_id = raw
                        .get("payment_intent")
                        .and_then(Value::as_str)
                        .map(String::from)
                        .unwrap_or_else(|| charge.id.to_string());
                    let order_reference = raw
                        .pointer("/metadata/order_id")
                        .and_then(Value::as_str)
                        .map(String::from);

                    Ok(Some(WebhookEvent {
                        gateway: Some(GatewayKind::Stripe),
                        source: "stripe".to_string(),
                        transaction_id: Some(transaction_id),
                        order_reference,
                        status_code: None,
                        status_message: Some("refunded".to_string()),
                        raw,
                    }))
                } else {
                    Ok(None)
                }
            }
            other => {
                tracing::debug!("stripe: unhandled webhook event type: {:?}", other);
                Ok(None)
            }
        }
    }

    async fn test_connection(&self, credentials: &GatewayCredentials) -> Result<ConnectionCheck> {
        let client = Self::client(credentials)?;
        let mut params = ListCustomers::new();
        params.limit = Some(1);
        match Customer::list(&client, &params).await {
            Ok(_) => Ok(ConnectionCheck {
                ok: true,
                message: "reachable".to_string(),
            }),
            Err(stripe::StripeError::Stripe(e)) if e.http_status == 401 => Ok(ConnectionCheck {
                ok: false,
                message: "credentials rejected".to_string(),
            }),
            Err(stripe::StripeError::Stripe(e)) => Ok(ConnectionCheck {
                ok: true,
                message: format!("reachable (HTTP {})", e.http_status),
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
    use crate::gateways::Customer as GatewayCustomer;
    use uuid::Uuid;

    fn creds() -> GatewayCredentials {
        GatewayCredentials {
            secret_key: Some("sk_test_123".to_string()),
            webhook_secret: Some("whsec_123".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn generate_pix_is_unsupported_and_offline() {
        let request = PixChargeRequest {
            order_id: Uuid::new_v4(),
            amount_cents: 1000,
            customer: GatewayCustomer {
                name: "Ana".to_string(),
                email: "ana@example.com".to_string(),
                document: None,
            },
        };
        // No base_url, no network: the refusal happens before any call.
        let err = StripeGateway::new()
            .generate_pix(&request, &creds())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedOperation(_)));
    }

    #[test]
    fn parse_webhook_requires_signature_header() {
        let err = StripeGateway::new()
            .parse_webhook(b"{}", &Value::Null, &HeaderMap::new(), &creds())
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn parse_webhook_requires_configured_secret() {
        let no_secret = GatewayCredentials {
            secret_key: Some("sk_test_123".to_string()),
            ..Default::default()
        };
        let err = StripeGateway::new()
            .parse_webhook(b"{}", &Value::Null, &HeaderMap::new(), &no_secret)
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
