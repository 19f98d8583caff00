use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::domain::Order;
use crate::error::AppError;
use crate::handlers::auth::VerifiedWebhook;
use crate::payments::{usd_value, PaymentReceipt};
use crate::AppState;

/// Confirmation callback from the payment gateway. Accepts both our field names and the
/// gateway's (`address_in`, `txid_in`, `coin`).
#[derive(Debug, Deserialize)]
pub struct PaymentNotification {
    pub order_id: Option<Uuid>,
    #[serde(alias = "address_in")]
    pub address: Option<String>,
    #[serde(alias = "txid_in")]
    pub tx_hash: String,
    #[serde(default)]
    pub confirmations: u32,
    pub value_coin: BigDecimal,
    pub value_forwarded_coin: Option<BigDecimal>,
    #[serde(alias = "coin")]
    pub currency: Option<String>,
    /// USD per coin at the time of the payment.
    pub price: Option<BigDecimal>,
}

fn parse(webhook: &VerifiedWebhook) -> Result<PaymentNotification, AppError> {
    serde_json::from_slice(&webhook.body)
        .map_err(|e| AppError::Validation(format!("invalid payment notification: {}", e)))
}

fn pending(confirmations: u32, required: u32) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "pending",
            "confirmations": confirmations,
            "required": required,
        })),
    )
        .into_response()
}

pub async fn payment_for_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    webhook: VerifiedWebhook,
) -> Result<Response, AppError> {
    let notification = parse(&webhook)?;
    let order = state.orders.get_order(order_id).await?;
    settle_payment(&state, order, notification).await
}

/// Same as [`payment_for_order`], with the order named in the payload or found by its
/// payment address.
pub async fn payment(
    State(state): State<AppState>,
    webhook: VerifiedWebhook,
) -> Result<Response, AppError> {
    let notification = parse(&webhook)?;

    let order = match (notification.order_id, notification.address.as_deref()) {
        (Some(order_id), _) => state.orders.get_order(order_id).await?,
        (None, Some(address)) => state
            .orders
            .find_order_by_address(address)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no order for address {}", address)))?,
        (None, None) => {
            return Err(AppError::Validation(
                "notification names neither order_id nor address".to_string(),
            ))
        }
    };

    settle_payment(&state, order, notification).await
}

async fn settle_payment(
    state: &AppState,
    order: Order,
    notification: PaymentNotification,
) -> Result<Response, AppError> {
    let currency = notification
        .currency
        .clone()
        .or_else(|| order.crypto_currency.clone())
        .ok_or_else(|| AppError::Validation("notification has no currency".to_string()))?;

    let required = state.min_confirmations.required(&currency);
    if notification.confirmations < required {
        tracing::info!(
            order_id = %order.order_id,
            tx_hash = %notification.tx_hash,
            confirmations = notification.confirmations,
            required,
            "payment seen, waiting for confirmations"
        );
        return Ok(pending(notification.confirmations, required));
    }

    let amount_usd = usd_value(
        &state.gateway,
        state.payments.as_ref(),
        &currency,
        &notification.value_coin,
        notification.price.as_ref(),
    )
    .await?;

    tracing::info!(
        order_id = %order.order_id,
        tx_hash = %notification.tx_hash,
        currency = %currency,
        value_coin = %notification.value_coin,
        amount_usd = %amount_usd,
        "payment confirmed by gateway"
    );

    let result = state
        .reconciler
        .reconcile(PaymentReceipt {
            order_id: order.order_id,
            tx_hash: notification.tx_hash,
            amount_usd,
            crypto_amount: Some(notification.value_coin),
        })
        .await?;

    Ok((StatusCode::OK, Json(result)).into_response())
}

pub async fn topup(
    State(state): State<AppState>,
    Path(telegram_id): Path<i64>,
    webhook: VerifiedWebhook,
) -> Result<Response, AppError> {
    let notification = parse(&webhook)?;
    let currency = notification
        .currency
        .clone()
        .ok_or_else(|| AppError::Validation("notification has no currency".to_string()))?;

    let required = state.min_confirmations.required(&currency);
    if notification.confirmations < required {
        return Ok(pending(notification.confirmations, required));
    }

    let amount_usd = usd_value(
        &state.gateway,
        state.payments.as_ref(),
        &currency,
        &notification.value_coin,
        notification.price.as_ref(),
    )
    .await?;

    let result = state
        .reconciler
        .reconcile_deposit(
            telegram_id,
            &notification.tx_hash,
            &amount_usd,
            Some(notification.value_coin),
        )
        .await?;

    Ok((StatusCode::OK, Json(result)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_accepts_gateway_field_names() {
        let raw = r#"{
            "address_in": "bc1qexample",
            "txid_in": "abc123",
            "confirmations": 2,
            "value_coin": "0.0012",
            "coin": "btc"
        }"#;
        let notification: PaymentNotification = serde_json::from_str(raw).unwrap();

        assert_eq!(notification.address.as_deref(), Some("bc1qexample"));
        assert_eq!(notification.tx_hash, "abc123");
        assert_eq!(notification.currency.as_deref(), Some("btc"));
        assert_eq!(notification.confirmations, 2);
        assert!(notification.order_id.is_none());
    }

    #[test]
    fn test_missing_confirmations_default_to_zero() {
        let raw = r#"{"tx_hash": "abc", "value_coin": "1"}"#;
        let notification: PaymentNotification = serde_json::from_str(raw).unwrap();
        assert_eq!(notification.confirmations, 0);
    }
}
