pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod payments;
pub mod ports;
pub mod providers;
pub mod saga;
pub mod services;
pub mod startup;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::MinConfirmations;
use crate::gateway::ResilientGateway;
use crate::payments::PaymentReconciler;
use crate::ports::{DomainRepository, LedgerRepository, OrderRepository};
use crate::providers::PaymentGateway;
use crate::services::{CheckoutService, NameserverService};

#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<CheckoutService>,
    pub nameservers: Arc<NameserverService>,
    pub reconciler: Arc<PaymentReconciler>,
    pub orders: Arc<dyn OrderRepository>,
    pub domains: Arc<dyn DomainRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
    pub gateway: Arc<ResilientGateway>,
    pub payments: Arc<dyn PaymentGateway>,
    pub webhook_secret: String,
    pub min_confirmations: MinConfirmations,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/:id/pay-from-wallet",
            post(handlers::orders::pay_from_wallet),
        )
        .route(
            "/domains/:order_id/nameservers",
            put(handlers::domains::update_nameservers),
        )
        .route("/wallets/:telegram_id", get(handlers::wallet::get_wallet))
        .route("/webhooks/payment", post(handlers::webhook::payment))
        .route(
            "/webhooks/payment/:order_id",
            post(handlers::webhook::payment_for_order),
        )
        .route(
            "/webhooks/topup/:telegram_id",
            post(handlers::webhook::topup),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
