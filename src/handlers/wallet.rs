use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::Serialize;

use crate::domain::Transaction;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct WalletView {
    pub telegram_id: i64,
    pub balance: BigDecimal,
    pub transactions: Vec<Transaction>,
}

pub async fn get_wallet(
    State(state): State<AppState>,
    Path(telegram_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let balance = state.ledger.balance(telegram_id).await?;
    let transactions = state.ledger.transactions_for(telegram_id).await?;

    Ok(Json(WalletView {
        telegram_id,
        balance,
        transactions,
    }))
}
