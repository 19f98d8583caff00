use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::domain::{Order, PaymentMethod};
use crate::gateway::{services, GatewayError, ResilientGateway};
use crate::ports::{OrderRepository, RepositoryError};
use crate::providers::{split_domain, PaymentGateway, Registrar};
use crate::saga::PricingPolicy;

#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("invalid domain name: {0}")]
    InvalidDomain(String),

    #[error("{0} is not available for registration")]
    Unavailable(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Opens orders: availability, price, and a payment address for crypto orders.
pub struct CheckoutService {
    gateway: Arc<ResilientGateway>,
    registrar: Arc<dyn Registrar>,
    payments: Arc<dyn PaymentGateway>,
    orders: Arc<dyn OrderRepository>,
    pricing: Arc<PricingPolicy>,
    public_base_url: String,
}

impl CheckoutService {
    pub fn new(
        gateway: Arc<ResilientGateway>,
        registrar: Arc<dyn Registrar>,
        payments: Arc<dyn PaymentGateway>,
        orders: Arc<dyn OrderRepository>,
        pricing: Arc<PricingPolicy>,
        public_base_url: String,
    ) -> Self {
        Self {
            gateway,
            registrar,
            payments,
            orders,
            pricing,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Creates an order awaiting payment. Without a currency the order is paid from the wallet.
    pub async fn create_order(
        &self,
        telegram_id: i64,
        domain_name: &str,
        currency: Option<&str>,
    ) -> Result<Order, CheckoutError> {
        let domain = normalize_domain(domain_name)?;
        let (_, tld) = split_domain(&domain);
        let tld = tld.to_string();

        let registrar = &self.registrar;
        let availability = self
            .gateway
            .execute(services::REGISTRAR, || registrar.check_availability(&domain))
            .await?;
        if !availability.available {
            return Err(CheckoutError::Unavailable(domain));
        }

        let price = self.pricing.price_for(&tld, availability.price.as_ref());
        let currency = currency
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty());
        let method = if currency.is_some() {
            PaymentMethod::Crypto
        } else {
            PaymentMethod::Wallet
        };

        let mut order = Order::new(telegram_id, domain, tld, price, method, currency.clone());

        if let Some(currency) = currency {
            let payments = &self.payments;
            let price = order.expected_amount_usd.clone();
            let crypto_amount = self
                .gateway
                .execute(services::PAYMENTS, || payments.convert_rate(&currency, &price))
                .await?;

            let callback = payment_callback_url(&self.public_base_url, order.order_id);
            let address = self
                .gateway
                .execute(services::PAYMENTS, || payments.create_address(&currency, &callback))
                .await?;

            order.crypto_amount = Some(crypto_amount);
            order.payment_address = Some(address);
        }

        self.orders.insert_order(&order).await?;
        info!(
            order_id = %order.order_id,
            telegram_id,
            domain = %order.domain_name,
            price = %order.expected_amount_usd,
            method = order.payment_method.as_str(),
            "order created"
        );
        Ok(order)
    }
}

/// Where the payment processor reports payments for an order. Also the key its logs are
/// looked up by.
pub fn payment_callback_url(public_base_url: &str, order_id: Uuid) -> String {
    format!(
        "{}/webhooks/payment/{}",
        public_base_url.trim_end_matches('/'),
        order_id
    )
}

/// Lowercases and checks the name against hostname label rules.
pub fn normalize_domain(raw: &str) -> Result<String, CheckoutError> {
    normalize_hostname(raw).map_err(CheckoutError::InvalidDomain)
}

/// Hostname label rules shared by domain names and nameservers.
pub(crate) fn normalize_hostname(raw: &str) -> Result<String, String> {
    let host = raw.trim().trim_end_matches('.').to_lowercase();
    if host.len() > 253 {
        return Err(format!("{} is too long", host));
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return Err(format!("{} has no extension", host));
    }

    for label in &labels {
        let valid = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(format!("bad label {:?} in {}", label, host));
        }
    }

    Ok(host)
}
