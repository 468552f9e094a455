use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::state::AppState,
    error::Result,
    gateways::{CardData, ChargeStatus, Customer},
};

#[derive(Debug, Deserialize)]
pub struct ChargeCardDto {
    #[serde(default)]
    card: CardData,
    customer: Customer,
    installments: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    status: &'static str,
    transaction_id: Option<String>,
    message: Option<String>,
}

pub async fn charge_card(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(dto): Json<ChargeCardDto>,
) -> Result<Json<ChargeResponse>> {
    let outcome = state
        .services
        .engine
        .charge_card(id, dto.card, dto.customer, dto.installments.unwrap_or(1))
        .await?;

    Ok(Json(ChargeResponse {
        status: match outcome.status {
            ChargeStatus::Approved => "approved",
            ChargeStatus::Pending => "pending",
            ChargeStatus::Rejected => "rejected",
        },
        transaction_id: outcome.transaction_id,
        message: outcome.message,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PixDto {
    customer: Customer,
}

#[derive(Debug, Serialize)]
pub struct PixResponse {
    qr_code_text: String,
    qr_code_image: Option<String>,
    transaction_id: Option<String>,
}

pub async fn create_pix(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(dto): Json<PixDto>,
) -> Result<Json<PixResponse>> {
    let pix = state.services.engine.create_pix(id, dto.customer).await?;

    Ok(Json(PixResponse {
        qr_code_text: pix.qr_code_text,
        qr_code_image: pix.qr_code_image,
        transaction_id: pix.transaction_id,
    }))
}
