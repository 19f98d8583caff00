//! Capability interfaces for the external systems the saga coordinates, and their HTTP
//! adapters. The saga and the reconciler depend only on the traits.

pub mod blockbee;
pub mod cloudflare;
pub mod openprovider;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use blockbee::BlockBeeClient;
pub use cloudflare::CloudflareClient;
pub use openprovider::OpenProviderClient;

/// Failure of a single call to an external capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Worth retrying: timeouts, connection failures, 5xx, throttling.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The provider answered and refused; retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

impl ProviderError {
    /// Classifies an unsuccessful HTTP status.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 200));
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            ProviderError::Transient(detail)
        } else {
            ProviderError::Rejected(detail)
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ProviderError::from_status(status, &err.to_string()),
            None => ProviderError::Transient(err.to_string()),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// A freshly created DNS zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsZone {
    pub zone_id: String,
    pub nameservers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    /// Registrar cost in USD, when the registrar quotes one.
    pub price: Option<BigDecimal>,
}

#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn create_zone(&self, domain: &str) -> ProviderResult<DnsZone>;

    async fn add_record(
        &self,
        zone_id: &str,
        record_type: &str,
        name: &str,
        content: &str,
    ) -> ProviderResult<String>;

    async fn enable_tls(&self, zone_id: &str) -> ProviderResult<bool>;
}

#[async_trait]
pub trait Registrar: Send + Sync {
    async fn get_or_create_customer(&self, telegram_id: i64) -> ProviderResult<String>;

    /// `None` nameservers registers with the registrar's defaults.
    async fn register_domain(
        &self,
        domain: &str,
        customer_id: &str,
        nameservers: Option<&[String]>,
    ) -> ProviderResult<String>;

    async fn update_nameservers(&self, domain_id: &str, nameservers: &[String])
        -> ProviderResult<bool>;

    async fn check_availability(&self, domain: &str) -> ProviderResult<Availability>;
}

/// A payment the processor has seen arrive at an address.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingPayment {
    pub tx_hash: String,
    pub value_coin: BigDecimal,
    pub confirmations: u32,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_address(&self, currency: &str, callback_url: &str) -> ProviderResult<String>;

    /// Amount of `currency` worth `amount_usd`.
    async fn convert_rate(&self, currency: &str, amount_usd: &BigDecimal)
        -> ProviderResult<BigDecimal>;

    /// Payments received for the address created with `callback_url`.
    async fn payments_received(&self, currency: &str, callback_url: &str)
        -> ProviderResult<Vec<IncomingPayment>>;
}

/// Splits `example.co.uk` into (`example`, `co.uk`).
pub(crate) fn split_domain(domain: &str) -> (&str, &str) {
    match domain.split_once('.') {
        Some((name, extension)) => (name, extension),
        None => (domain, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_transient() {
        let err = ProviderError::from_status(StatusCode::BAD_GATEWAY, "upstream");
        assert!(matches!(err, ProviderError::Transient(_)));
        let err = ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, ProviderError::Transient(_)));
    }

    #[test]
    fn test_client_errors_are_rejections() {
        let err = ProviderError::from_status(StatusCode::UNPROCESSABLE_ENTITY, "taken");
        assert!(matches!(err, ProviderError::Rejected(_)));
    }

    #[test]
    fn test_split_domain() {
        assert_eq!(split_domain("example.com"), ("example", "com"));
        assert_eq!(split_domain("shop.co.uk"), ("shop", "co.uk"));
        assert_eq!(split_domain("localhost"), ("localhost", ""));
    }
}
