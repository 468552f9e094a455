use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    api::state::AppState,
    error::Result,
    service::{ReconcileOutcome, SyncReport},
};

#[derive(Debug, Default, Deserialize)]
pub struct SyncParams {
    max_age_hours: Option<i64>,
    limit: Option<i64>,
}

/// Batch resync of recent pending orders, bounded by age and count.
pub async fn sync_pending(
    State(state): State<AppState>,
    params: Option<Json<SyncParams>>,
) -> Result<Json<SyncReport>> {
    let params = params.map(|Json(p)| p).unwrap_or_default();
    let report = state
        .services
        .engine
        .sync_pending_orders(params.max_age_hours, params.limit)
        .await?;
    Ok(Json(report))
}

/// Resync one specific order against its gateway.
pub async fn sync_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReconcileOutcome>> {
    let outcome = state.services.engine.sync_order(id).await?;
    Ok(Json(outcome))
}
