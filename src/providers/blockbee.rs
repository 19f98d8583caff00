use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use super::{IncomingPayment, PaymentGateway, ProviderError, ProviderResult};

pub const DEFAULT_BASE_URL: &str = "https://api.blockbee.io";

#[derive(Debug, Deserialize)]
struct BlockBeeResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    address_in: Option<String>,
    #[serde(default)]
    value_coin: Option<Value>,
    #[serde(default)]
    callbacks: Vec<BlockBeeCallback>,
}

/// One entry of the `logs` endpoint.
#[derive(Debug, Deserialize)]
struct BlockBeeCallback {
    txid_in: String,
    #[serde(default)]
    value_coin: Value,
    #[serde(default)]
    confirmations: u32,
}

/// Payment processor backed by BlockBee.
#[derive(Clone)]
pub struct BlockBeeClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl BlockBeeClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> ProviderResult<BlockBeeResponse> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(&[("apikey", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }

        let parsed: BlockBeeResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Transient(format!("invalid BlockBee response: {}", e)))?;
        if parsed.status != "success" {
            return Err(ProviderError::Rejected(
                parsed.error.unwrap_or_else(|| "unknown BlockBee error".to_string()),
            ));
        }
        Ok(parsed)
    }
}

fn ticker(currency: &str) -> String {
    currency.to_lowercase()
}

/// BlockBee sends amounts either as strings or as JSON numbers.
fn decimal(value: &Value, field: &str) -> ProviderResult<BigDecimal> {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(ProviderError::Rejected(format!("missing {}", field))),
    };
    BigDecimal::from_str(&raw)
        .map_err(|e| ProviderError::Rejected(format!("invalid {} {}: {}", field, raw, e)))
}

#[async_trait]
impl PaymentGateway for BlockBeeClient {
    async fn create_address(&self, currency: &str, callback_url: &str) -> ProviderResult<String> {
        let response = self
            .get(
                &format!("/{}/create/", ticker(currency)),
                &[("callback", callback_url), ("pending", "0"), ("post", "1"), ("json", "1")],
            )
            .await?;
        response
            .address_in
            .ok_or_else(|| ProviderError::Rejected("create response without address_in".to_string()))
    }

    async fn convert_rate(
        &self,
        currency: &str,
        amount_usd: &BigDecimal,
    ) -> ProviderResult<BigDecimal> {
        let value = amount_usd.to_string();
        let response = self
            .get(
                &format!("/{}/convert/", ticker(currency)),
                &[("value", value.as_str()), ("from", "usd")],
            )
            .await?;

        decimal(&response.value_coin.unwrap_or(Value::Null), "value_coin")
    }

    async fn payments_received(
        &self,
        currency: &str,
        callback_url: &str,
    ) -> ProviderResult<Vec<IncomingPayment>> {
        let response = self
            .get(
                &format!("/{}/logs/", ticker(currency)),
                &[("callback", callback_url)],
            )
            .await?;

        response
            .callbacks
            .into_iter()
            .map(|callback| {
                Ok(IncomingPayment {
                    value_coin: decimal(&callback.value_coin, "value_coin")?,
                    tx_hash: callback.txid_in,
                    confirmations: callback.confirmations,
                })
            })
            .collect()
    }
}
