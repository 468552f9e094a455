use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::{
    api::state::AppState,
    domain::GatewayKind,
    error::{AppError, Result},
};

#[derive(Debug, Serialize)]
pub struct GatewayInfo {
    id: &'static str,
    payment_methods: Vec<&'static str>,
    required_credentials: &'static [&'static str],
    configured: bool,
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<GatewayInfo>> {
    let mut gateways: Vec<GatewayInfo> = state
        .registry
        .iter()
        .map(|adapter| GatewayInfo {
            id: adapter.kind().as_str(),
            payment_methods: adapter
                .supported_methods()
                .iter()
                .map(|m| m.as_str())
                .collect(),
            required_credentials: adapter.required_credentials(),
            configured: state.settings.gateways.for_kind(adapter.kind()).is_some(),
        })
        .collect();
    gateways.sort_by_key(|g| g.id);

    Json(gateways)
}

#[derive(Debug, Serialize)]
pub struct TestConnectionResponse {
    ok: bool,
    message: String,
}

pub async fn test_connection(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
) -> Result<Json<TestConnectionResponse>> {
    let kind: GatewayKind = gateway.parse().map_err(AppError::Validation)?;
    let adapter = state.registry.resolve(kind)?;
    let credentials = state
        .settings
        .gateways
        .for_kind(kind)
        .cloned()
        .ok_or_else(|| AppError::Config(format!("gateway {} is not configured", kind)))?;

    let check = adapter.test_connection(&credentials).await?;
    Ok(Json(TestConnectionResponse {
        ok: check.ok,
        message: check.message,
    }))
}
