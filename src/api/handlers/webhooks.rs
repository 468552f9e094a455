use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::{GatewayKind, OrderStatus},
    error::{AppError, Result},
    gateways::legacy,
};

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub order_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
}

impl WebhookResponse {
    fn ignored() -> Self {
        Self {
            success: true,
            order_id: None,
            status: None,
        }
    }
}

pub async fn gateway_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    let kind: GatewayKind = gateway.parse().map_err(AppError::Validation)?;
    let adapter = state.registry.resolve(kind)?;
    let credentials = state
        .settings
        .gateways
        .for_kind(kind)
        .cloned()
        .ok_or_else(|| AppError::Config(format!("gateway {} is not configured", kind)))?;

    let decoded = decode_body(&headers, &body);
    let Some(event) = adapter.parse_webhook(&body, &decoded, &headers, &credentials)? else {
        // Not a shape we know. Acknowledge so the gateway stops
        // redelivering something we will never act on.
        tracing::debug!(gateway = %kind, "Unrecognized webhook payload, ignoring");
        return Ok(Json(WebhookResponse::ignored()));
    };

    let outcome = state
        .services
        .engine
        .apply_webhook_event(event, params.get("id").map(String::as_str))
        .await?;

    Ok(Json(WebhookResponse {
        success: true,
        order_id: Some(outcome.order_id),
        status: Some(outcome.status),
    }))
}

pub async fn legacy_webhook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    let decoded = decode_body(&headers, &body);
    let secret = state.settings.gateways.legacy_webhook_secret.as_deref();

    let Some(event) = legacy::parse(&body, &decoded, &headers, secret)? else {
        tracing::debug!("Unrecognized legacy webhook payload, ignoring");
        return Ok(Json(WebhookResponse::ignored()));
    };

    let outcome = state
        .services
        .engine
        .apply_webhook_event(event, params.get("id").map(String::as_str))
        .await?;

    Ok(Json(WebhookResponse {
        success: true,
        order_id: Some(outcome.order_id),
        status: Some(outcome.status),
    }))
}

/// Bodies arrive as JSON, form-encoded, or raw `key=value` text with no
/// content type at all. Everything is folded into one JSON value so the
/// adapters only ever deal with that.
fn decode_body(headers: &HeaderMap, body: &[u8]) -> Value {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.contains("application/json") {
        if let Ok(value) = serde_json::from_slice(body) {
            return value;
        }
    }
    if content_type.contains("x-www-form-urlencoded") {
        if let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
            return pairs_to_object(pairs);
        }
    }

    // Unspecified content type: try JSON first, then loose key=value text.
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        if value.is_object() || value.is_array() {
            return value;
        }
    }
    if let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
        if !pairs.is_empty() {
            return pairs_to_object(pairs);
        }
    }
    if let Ok(text) = std::str::from_utf8(body) {
        let pairs: Vec<(String, String)> = text
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        if !pairs.is_empty() {
            return pairs_to_object(pairs);
        }
    }

    Value::Null
}

fn pairs_to_object(pairs: Vec<(String, String)>) -> Value {
    let mut object = Map::new();
    for (key, value) in pairs {
        object.insert(key, Value::String(value));
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_json_body() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        let value = decode_body(&headers, br#"{"pedido": "123", "status": "pago"}"#);
        assert_eq!(value["pedido"], "123");
    }

    #[test]
    fn decodes_form_body() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        let value = decode_body(&headers, b"pedido=123&status_mensagem=Aprovada");
        assert_eq!(value["pedido"], "123");
        assert_eq!(value["status_mensagem"], "Aprovada");
    }

    #[test]
    fn decodes_untyped_raw_pairs() {
        let value = decode_body(&HeaderMap::new(), b"tid=9876&pedido=abc-123");
        assert_eq!(value["tid"], "9876");
        assert_eq!(value["pedido"], "abc-123");
    }

    #[test]
    fn untyped_json_still_wins() {
        let value = decode_body(&HeaderMap::new(), br#"{"order_id": "x"}"#);
        assert_eq!(value["order_id"], "x");
    }

    #[test]
    fn empty_body_decodes_to_null() {
        assert_eq!(decode_body(&HeaderMap::new(), b""), Value::Null);
    }
}
