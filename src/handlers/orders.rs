use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Order, RegisteredDomain};
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub telegram_id: i64,
    pub domain_name: String,
    /// Crypto ticker; omit to pay from the wallet.
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub domain: Option<RegisteredDomain>,
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let order = state
        .checkout
        .create_order(
            payload.telegram_id,
            &payload.domain_name,
            payload.currency.as_deref(),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let order = state.orders.get_order(id).await?;
    let domain = state.domains.find_domain_by_order(id).await?;

    Ok(Json(OrderView { order, domain }))
}

pub async fn pay_from_wallet(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let payment = state.reconciler.pay_from_wallet(id).await?;
    Ok(Json(payment))
}
