use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{DnsProvider, DnsZone, ProviderError, ProviderResult};

pub const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Response envelope shared by every Cloudflare endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ZoneResult {
    id: String,
    #[serde(default)]
    name_servers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RecordResult {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SettingResult {
    value: String,
}

/// DNS provider backed by the Cloudflare v4 API.
#[derive(Clone)]
pub struct CloudflareClient {
    client: Client,
    base_url: String,
    api_token: String,
    account_id: Option<String>,
}

impl CloudflareClient {
    pub fn new(base_url: String, api_token: String, account_id: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            account_id,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn find_zone(&self, domain: &str) -> ProviderResult<Option<ZoneResult>> {
        let response = self
            .client
            .get(self.url("/zones"))
            .bearer_auth(&self.api_token)
            .query(&[("name", domain)])
            .send()
            .await?;
        let zones: Vec<ZoneResult> = read_result(response).await?;
        Ok(zones.into_iter().next())
    }
}

async fn read_result<T: DeserializeOwned>(response: Response) -> ProviderResult<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::from_status(status, &body));
    }

    let envelope: Envelope<T> = serde_json::from_str(&body)
        .map_err(|e| ProviderError::Transient(format!("invalid Cloudflare response: {}", e)))?;

    if !envelope.success {
        let reason = envelope
            .errors
            .iter()
            .map(|e| format!("{} ({})", e.message, e.code))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ProviderError::Rejected(reason));
    }

    envelope
        .result
        .ok_or_else(|| ProviderError::Transient("Cloudflare response without result".to_string()))
}

#[async_trait]
impl DnsProvider for CloudflareClient {
    /// Reuses an existing zone for the domain so a retried call does not fail on "already exists".
    async fn create_zone(&self, domain: &str) -> ProviderResult<DnsZone> {
        if let Some(zone) = self.find_zone(domain).await? {
            tracing::info!(domain = %domain, zone_id = %zone.id, "reusing existing Cloudflare zone");
            return Ok(DnsZone {
                zone_id: zone.id,
                nameservers: zone.name_servers,
            });
        }

        let mut body = json!({ "name": domain, "jump_start": false });
        if let Some(account_id) = &self.account_id {
            body["account"] = json!({ "id": account_id });
        }

        let response = self
            .client
            .post(self.url("/zones"))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?;
        let zone: ZoneResult = read_result(response).await?;

        Ok(DnsZone {
            zone_id: zone.id,
            nameservers: zone.name_servers,
        })
    }

    async fn add_record(
        &self,
        zone_id: &str,
        record_type: &str,
        name: &str,
        content: &str,
    ) -> ProviderResult<String> {
        let response = self
            .client
            .post(self.url(&format!("/zones/{}/dns_records", zone_id)))
            .bearer_auth(&self.api_token)
            .json(&json!({
                "type": record_type,
                "name": name,
                "content": content,
                "ttl": 300,
                "proxied": false,
            }))
            .send()
            .await?;
        let record: RecordResult = read_result(response).await?;
        Ok(record.id)
    }

    async fn enable_tls(&self, zone_id: &str) -> ProviderResult<bool> {
        let response = self
            .client
            .patch(self.url(&format!("/zones/{}/settings/always_use_https", zone_id)))
            .bearer_auth(&self.api_token)
            .json(&json!({ "value": "on" }))
            .send()
            .await?;
        let setting: SettingResult = read_result(response).await?;
        Ok(setting.value == "on")
    }
}
