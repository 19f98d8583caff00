use anyhow::{anyhow, bail, Context, Result};
use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::gateway::{services, RetryPolicy};
use crate::providers::{blockbee, cloudflare, openprovider};
use crate::saga::DEFAULT_FALLBACK_NAMESERVERS;

/// Confirmations a payment needs before it is reconciled, per currency ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinConfirmations {
    per_currency: HashMap<String, u32>,
    default: u32,
}

impl Default for MinConfirmations {
    fn default() -> Self {
        let per_currency = [("BTC", 1), ("ETH", 12), ("LTC", 6), ("DOGE", 20)]
            .into_iter()
            .map(|(c, n)| (c.to_string(), n))
            .collect();
        Self {
            per_currency,
            default: 1,
        }
    }
}

impl MinConfirmations {
    pub fn required(&self, currency: &str) -> u32 {
        self.per_currency
            .get(&currency.to_uppercase())
            .copied()
            .unwrap_or(self.default)
    }

    /// Parses `BTC=1,ETH=12` on top of the defaults.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut confirmations = Self::default();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (currency, count) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("MIN_CONFIRMATIONS entry {:?} is not CURRENCY=N", entry))?;
            let count: u32 = count
                .trim()
                .parse()
                .with_context(|| format!("MIN_CONFIRMATIONS count for {}", currency))?;
            confirmations
                .per_currency
                .insert(currency.trim().to_uppercase(), count);
        }
        Ok(confirmations)
    }
}

#[derive(Debug, Clone)]
pub struct CloudflareSettings {
    pub base_url: String,
    pub api_token: String,
    pub account_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenProviderSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct BlockBeeSettings {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: Option<String>,
    pub public_base_url: String,
    pub webhook_secret: String,
    pub server_public_ip: Option<String>,
    pub cloudflare: CloudflareSettings,
    pub openprovider: OpenProviderSettings,
    pub blockbee: BlockBeeSettings,
    pub fallback_nameservers: Vec<String>,
    pub price_multiplier: BigDecimal,
    pub min_confirmations: MinConfirmations,
    /// How often pending crypto orders are polled; `None` leaves payments to the webhook.
    pub payment_poll_interval: Option<Duration>,
    /// Policy per service name; `default_policy` covers the rest.
    pub policies: HashMap<String, RetryPolicy>,
    pub default_policy: RetryPolicy,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| anyhow!("{} must be set", key));

        let public_base_url = require("PUBLIC_BASE_URL")?;
        Url::parse(&public_base_url)
            .with_context(|| format!("PUBLIC_BASE_URL {:?} is not a URL", public_base_url))?;

        let fallback_nameservers = match get("REGISTRAR_FALLBACK_NAMESERVERS") {
            Some(raw) => parse_list(&raw),
            None => DEFAULT_FALLBACK_NAMESERVERS.iter().map(|s| s.to_string()).collect(),
        };
        if fallback_nameservers.is_empty() {
            bail!("REGISTRAR_FALLBACK_NAMESERVERS must name at least one nameserver");
        }

        let price_multiplier = match get("PRICE_MULTIPLIER") {
            Some(raw) => BigDecimal::from_str(raw.trim())
                .with_context(|| format!("PRICE_MULTIPLIER {:?}", raw))?,
            None => BigDecimal::from_str("3.3")?,
        };

        let min_confirmations = match get("MIN_CONFIRMATIONS") {
            Some(raw) => MinConfirmations::parse(&raw)?,
            None => MinConfirmations::default(),
        };

        let poll_secs: u64 = get("PAYMENT_POLL_SECS")
            .unwrap_or_else(|| "30".to_string())
            .trim()
            .parse()
            .context("PAYMENT_POLL_SECS")?;
        let payment_poll_interval = (poll_secs > 0).then(|| Duration::from_secs(poll_secs));

        let mut policies = HashMap::new();
        for (service, stock) in [
            (services::REGISTRAR, RetryPolicy::registrar()),
            (services::DNS, RetryPolicy::dns()),
            (services::PAYMENTS, RetryPolicy::payments()),
        ] {
            policies.insert(service.to_string(), policy_overrides(&get, service, stock)?);
        }
        let default_policy = policy_overrides(&get, "default", RetryPolicy::default())?;

        Ok(Config {
            server_port: get("SERVER_PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .context("SERVER_PORT")?,
            database_url: get("DATABASE_URL"),
            public_base_url,
            webhook_secret: require("PAYMENT_WEBHOOK_SECRET")?,
            server_public_ip: get("SERVER_PUBLIC_IP"),
            cloudflare: CloudflareSettings {
                base_url: get("CLOUDFLARE_BASE_URL")
                    .unwrap_or_else(|| cloudflare::DEFAULT_BASE_URL.to_string()),
                api_token: get("CLOUDFLARE_API_TOKEN").unwrap_or_default(),
                account_id: get("CLOUDFLARE_ACCOUNT_ID"),
            },
            openprovider: OpenProviderSettings {
                base_url: get("OPENPROVIDER_BASE_URL")
                    .unwrap_or_else(|| openprovider::DEFAULT_BASE_URL.to_string()),
                username: get("OPENPROVIDER_USERNAME").unwrap_or_default(),
                password: get("OPENPROVIDER_PASSWORD").unwrap_or_default(),
            },
            blockbee: BlockBeeSettings {
                base_url: get("BLOCKBEE_BASE_URL")
                    .unwrap_or_else(|| blockbee::DEFAULT_BASE_URL.to_string()),
                api_key: get("BLOCKBEE_API_KEY").unwrap_or_default(),
            },
            fallback_nameservers,
            price_multiplier,
            min_confirmations,
            payment_poll_interval,
            policies,
            default_policy,
            log_json: get("LOG_FORMAT").map(|f| f.eq_ignore_ascii_case("json")).unwrap_or(false),
        })
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow!("DATABASE_URL must be set (or run with --in-memory)"))
    }

    /// Credentials that are missing; the service runs but the matching calls will be rejected.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.cloudflare.api_token.is_empty() {
            missing.push("CLOUDFLARE_API_TOKEN");
        }
        if self.openprovider.username.is_empty() || self.openprovider.password.is_empty() {
            missing.push("OPENPROVIDER_USERNAME/OPENPROVIDER_PASSWORD");
        }
        if self.blockbee.api_key.is_empty() {
            missing.push("BLOCKBEE_API_KEY");
        }
        missing
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Applies `GATEWAY_<SERVICE>_*` overrides to a stock policy.
fn policy_overrides<G>(get: &G, service: &str, mut policy: RetryPolicy) -> Result<RetryPolicy>
where
    G: Fn(&str) -> Option<String>,
{
    let prefix = format!("GATEWAY_{}", service.to_uppercase());
    let read = |suffix: &str| -> Result<Option<u64>> {
        let key = format!("{}_{}", prefix, suffix);
        get(&key)
            .map(|v| v.trim().parse::<u64>().with_context(|| key.clone()))
            .transpose()
    };

    if let Some(n) = read("MAX_RETRIES")? {
        policy.max_retries = n as u32;
    }
    if let Some(n) = read("THRESHOLD")? {
        policy.circuit_breaker_threshold = n.max(1) as u32;
    }
    if let Some(n) = read("RESET_SECS")? {
        policy.circuit_reset = Duration::from_secs(n);
    }
    if let Some(n) = read("TIMEOUT_SECS")? {
        policy.timeout = Duration::from_secs(n.max(1));
    }
    Ok(policy)
}
