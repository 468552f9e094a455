//! Webhooks from the legacy storefront. Not a payment gateway of its own:
//! the old shop forwards order-status changes it hears about first, signed
//! with an HMAC-SHA256 over the raw body (base64 in `X-Webhook-Signature`).
//! The event names no gateway; the engine falls back to whatever gateway the
//! order record points at.

use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::{
    error::{AppError, Result},
    gateways::{value_as_string, WebhookEvent},
};

type HmacSha256 = Hmac<Sha256>;

pub const SOURCE: &str = "legacy";

pub fn parse(
    body: &[u8],
    decoded: &Value,
    headers: &HeaderMap,
    signing_secret: Option<&str>,
) -> Result<Option<WebhookEvent>> {
    if let Some(secret) = signing_secret {
        verify_signature(body, headers, secret)?;
    } else {
        tracing::warn!("legacy webhook accepted without signature verification (no secret configured)");
    }

    if !decoded.is_object() {
        return Ok(None);
    }

    let order_reference = decoded
        .get("order_id")
        .and_then(value_as_string)
        .or_else(|| decoded.get("pedido").and_then(value_as_string));
    let status_message = decoded
        .get("status")
        .and_then(Value::as_str)
        .map(String::from);

    if order_reference.is_none() && status_message.is_none() {
        return Ok(None);
    }

    Ok(Some(WebhookEvent {
        gateway: None,
        source: SOURCE.to_string(),
        transaction_id: decoded.get("transaction_id").and_then(value_as_string),
        order_reference,
        status_code: None,
        status_message,
        raw: decoded.clone(),
    }))
}

fn verify_signature(body: &[u8], headers: &HeaderMap, secret: &str) -> Result<()> {
    let signature = headers
        .get("X-Webhook-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("legacy: missing X-Webhook-Signature".into()))?;
    let expected = BASE64
        .decode(signature)
        .map_err(|_| AppError::Validation("legacy: malformed X-Webhook-Signature".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Config(format!("legacy: bad webhook secret: {}", e)))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| AppError::Validation("legacy: invalid webhook signature".into()))
}
