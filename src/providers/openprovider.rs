use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{split_domain, Availability, ProviderError, ProviderResult, Registrar};

pub const DEFAULT_BASE_URL: &str = "https://api.openprovider.eu/v1beta";

/// Nameserver group OpenProvider applies when a registration names no nameservers.
const DEFAULT_NS_GROUP: &str = "dns-openprovider";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    data: Value,
}

/// Registrar backed by the OpenProvider REST API. Authenticates with a bearer token that
/// is fetched lazily and dropped when the API answers 401.
pub struct OpenProviderClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    token: Mutex<Option<String>>,
}

impl OpenProviderClient {
    pub fn new(base_url: String, username: String, password: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            token: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn token(&self) -> ProviderResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({ "username": self.username, "password": self.password }))
            .send()
            .await?;
        let data = read_data(response).await?;
        let token = data
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Rejected("login response without token".to_string()))?
            .to_string();

        *cached = Some(token.clone());
        Ok(token)
    }

    async fn request(&self, method: Method, path: &str) -> ProviderResult<RequestBuilder> {
        let token = self.token().await?;
        Ok(self
            .client
            .request(method, self.url(path))
            .bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> ProviderResult<Value> {
        let response = request.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            // Expired token: drop it so the gateway's next attempt logs in again.
            *self.token.lock().await = None;
            return Err(ProviderError::Transient(
                "OpenProvider session expired".to_string(),
            ));
        }
        read_data(response).await
    }

    async fn find_customer_handle(&self, email: &str) -> ProviderResult<Option<String>> {
        let request = self
            .request(Method::GET, "/customers")
            .await?
            .query(&[("email_pattern", email), ("limit", "1")]);
        let data = self.send(request).await?;
        Ok(data
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .and_then(|customer| customer.get("handle"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

async fn read_data(response: reqwest::Response) -> ProviderResult<Value> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::from_status(status, &body));
    }

    let envelope: Envelope = serde_json::from_str(&body)
        .map_err(|e| ProviderError::Transient(format!("invalid OpenProvider response: {}", e)))?;
    if envelope.code != 0 {
        return Err(ProviderError::Rejected(format!(
            "{} (code {})",
            envelope.desc, envelope.code
        )));
    }
    Ok(envelope.data)
}

fn customer_email(telegram_id: i64) -> String {
    format!("tg{}@privacy.invalid", telegram_id)
}

/// Privacy contact used as owner, admin, tech and billing handle.
fn anonymous_contact(telegram_id: i64) -> Value {
    json!({
        "name": { "first_name": "Private", "last_name": format!("Customer {}", telegram_id), "initials": "P.C." },
        "email": customer_email(telegram_id),
        "phone": { "country_code": "+31", "area_code": "20", "subscriber_number": "1234567" },
        "address": {
            "street": "Privacy Street",
            "number": "1",
            "zipcode": "1000AA",
            "city": "Amsterdam",
            "country": "NL"
        },
        "is_private": true
    })
}

fn parse_price(result: &Value) -> Option<BigDecimal> {
    let price = result.get("price")?;
    let value = price
        .pointer("/reseller/price")
        .or_else(|| price.pointer("/product/price"))?;
    match value {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => BigDecimal::from_str(s).ok(),
        _ => None,
    }
}

#[async_trait]
impl Registrar for OpenProviderClient {
    async fn get_or_create_customer(&self, telegram_id: i64) -> ProviderResult<String> {
        let email = customer_email(telegram_id);
        if let Some(handle) = self.find_customer_handle(&email).await? {
            return Ok(handle);
        }

        let request = self
            .request(Method::POST, "/customers")
            .await?
            .json(&anonymous_contact(telegram_id));
        let data = self.send(request).await?;
        let handle = data
            .get("handle")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Rejected("customer response without handle".to_string()))?;

        tracing::info!(telegram_id, handle = %handle, "created OpenProvider customer");
        Ok(handle.to_string())
    }

    async fn register_domain(
        &self,
        domain: &str,
        customer_id: &str,
        nameservers: Option<&[String]>,
    ) -> ProviderResult<String> {
        let (name, extension) = split_domain(domain);
        let mut body = json!({
            "domain": { "name": name, "extension": extension },
            "period": 1,
            "owner_handle": customer_id,
            "admin_handle": customer_id,
            "tech_handle": customer_id,
            "billing_handle": customer_id,
            "autorenew": "default",
        });
        match nameservers {
            Some(list) => {
                body["name_servers"] = list.iter().map(|ns| json!({ "name": ns })).collect();
            }
            None => body["ns_group"] = json!(DEFAULT_NS_GROUP),
        }

        let request = self.request(Method::POST, "/domains").await?.json(&body);
        let data = self.send(request).await?;
        match data.get("id") {
            Some(Value::Number(id)) => Ok(id.to_string()),
            Some(Value::String(id)) => Ok(id.clone()),
            _ => Err(ProviderError::Rejected(
                "registration response without domain id".to_string(),
            )),
        }
    }

    async fn update_nameservers(
        &self,
        domain_id: &str,
        nameservers: &[String],
    ) -> ProviderResult<bool> {
        let body = json!({
            "name_servers": nameservers.iter().map(|ns| json!({ "name": ns })).collect::<Vec<_>>(),
        });
        let request = self
            .request(Method::PUT, &format!("/domains/{}", domain_id))
            .await?
            .json(&body);
        let data = self.send(request).await?;
        Ok(data.get("success").and_then(Value::as_bool).unwrap_or(true))
    }

    async fn check_availability(&self, domain: &str) -> ProviderResult<Availability> {
        let (name, extension) = split_domain(domain);
        let body = json!({
            "domains": [{ "name": name, "extension": extension }],
            "with_price": true,
        });
        let request = self
            .request(Method::POST, "/domains/check")
            .await?
            .json(&body);
        let data = self.send(request).await?;
        let result = data
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first())
            .ok_or_else(|| ProviderError::Rejected(format!("no check result for {}", domain)))?;

        Ok(Availability {
            available: result.get("status").and_then(Value::as_str) == Some("free"),
            price: parse_price(result),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    async fn login(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(r#"{"code":0,"desc":"","data":{"token":"tok-1","reseller_id":1}}"#)
            .create_async()
            .await
    }

    fn client(server: &mockito::ServerGuard) -> OpenProviderClient {
        OpenProviderClient::new(server.url(), "user".to_string(), "secret".to_string())
    }

    #[tokio::test]
    async fn test_register_with_default_nameservers() {
        let mut server = mockito::Server::new_async().await;
        let _login = login(&mut server).await;
        let _register = server
            .mock("POST", "/domains")
            .match_header("authorization", "Bearer tok-1")
            .match_body(Matcher::PartialJson(json!({
                "domain": { "name": "example", "extension": "com" },
                "owner_handle": "JD000001-NL",
                "ns_group": "dns-openprovider",
            })))
            .with_status(200)
            .with_body(r#"{"code":0,"desc":"","data":{"id":27912,"status":"ACT"}}"#)
            .create_async()
            .await;

        let id = client(&server)
            .register_domain("example.com", "JD000001-NL", None)
            .await
            .unwrap();
        assert_eq!(id, "27912");
    }

    #[tokio::test]
    async fn test_login_happens_once() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(r#"{"code":0,"desc":"","data":{"token":"tok-1"}}"#)
            .expect(1)
            .create_async()
            .await;
        let _update = server
            .mock("PUT", "/domains/27912")
            .with_status(200)
            .with_body(r#"{"code":0,"desc":"","data":{"status":"ACT"}}"#)
            .expect(2)
            .create_async()
            .await;

        let registrar = client(&server);
        let ns = vec!["ada.ns.cloudflare.com".to_string()];
        assert!(registrar.update_nameservers("27912", &ns).await.unwrap());
        assert!(registrar.update_nameservers("27912", &ns).await.unwrap());
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_code_is_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _login = login(&mut server).await;
        let _register = server
            .mock("POST", "/domains")
            .with_status(200)
            .with_body(r#"{"code":346,"desc":"Domain already exists","data":null}"#)
            .create_async()
            .await;

        let err = client(&server)
            .register_domain("taken.com", "JD000001-NL", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(msg) if msg.contains("346")));
    }

    #[tokio::test]
    async fn test_expired_session_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _login = login(&mut server).await;
        let _update = server
            .mock("PUT", "/domains/1")
            .with_status(401)
            .with_body(r#"{"code":196,"desc":"Authentication/Authorization Failed"}"#)
            .create_async()
            .await;

        let err = client(&server)
            .update_nameservers("1", &["ns1.example".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transient(_)));
    }

    #[tokio::test]
    async fn test_reuses_existing_customer() {
        let mut server = mockito::Server::new_async().await;
        let _login = login(&mut server).await;
        let _search = server
            .mock("GET", "/customers")
            .match_query(Matcher::UrlEncoded(
                "email_pattern".into(),
                "tg42@privacy.invalid".into(),
            ))
            .with_status(200)
            .with_body(r#"{"code":0,"desc":"","data":{"results":[{"handle":"PC000042-NL"}],"total":1}}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/customers")
            .expect(0)
            .create_async()
            .await;

        let handle = client(&server).get_or_create_customer(42).await.unwrap();
        assert_eq!(handle, "PC000042-NL");
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_check_availability_with_price() {
        let mut server = mockito::Server::new_async().await;
        let _login = login(&mut server).await;
        let _check = server
            .mock("POST", "/domains/check")
            .with_status(200)
            .with_body(
                r#"{"code":0,"desc":"","data":{"results":[{"domain":"example.com","status":"free","price":{"product":{"currency":"USD","price":9.5},"reseller":{"currency":"USD","price":8.75}}}]}}"#,
            )
            .create_async()
            .await;

        let availability = client(&server).check_availability("example.com").await.unwrap();
        assert!(availability.available);
        assert_eq!(availability.price, Some(BigDecimal::from_str("8.75").unwrap()));
    }
}
