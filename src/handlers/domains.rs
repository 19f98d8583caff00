use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateNameserversRequest {
    /// Must own the domain.
    pub telegram_id: i64,
    pub nameservers: Vec<String>,
}

pub async fn update_nameservers(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateNameserversRequest>,
) -> Result<impl IntoResponse, AppError> {
    let domain = state
        .nameservers
        .update_nameservers(order_id, payload.telegram_id, &payload.nameservers)
        .await?;

    Ok(Json(domain))
}
