//! Retail pricing for domains.
//! Every caller that needs a price goes through one injected [`PricingPolicy`].

use bigdecimal::{BigDecimal, Zero};
use std::collections::HashMap;
use std::str::FromStr;

use crate::domain::money::round_cents;

const FALLBACK_PRICES: &[(&str, &str)] = &[
    ("com", "42.87"),
    ("net", "49.47"),
    ("org", "46.17"),
    ("info", "32.97"),
    ("biz", "39.57"),
    ("me", "65.97"),
    ("co", "98.97"),
    ("io", "164.97"),
    ("sbs", "9.87"),
    ("xyz", "6.57"),
    ("top", "8.22"),
    ("site", "13.17"),
    ("online", "16.47"),
    ("store", "19.77"),
    ("tech", "23.07"),
    ("space", "11.52"),
    ("website", "13.17"),
];

/// Local-presence (trustee) surcharges for TLDs that require one.
const TRUSTEE_COSTS: &[(&str, &str)] = &[
    ("fr", "30"),
    ("eu", "30"),
    ("ca", "40"),
    ("au", "50"),
    ("de", "20"),
    ("dk", "24"),
    ("br", "36"),
];

const DEFAULT_PRICE: &str = "42.87";

fn table(entries: &[(&str, &str)]) -> HashMap<String, BigDecimal> {
    entries
        .iter()
        .filter_map(|(tld, price)| BigDecimal::from_str(price).ok().map(|p| (tld.to_string(), p)))
        .collect()
}

#[derive(Debug, Clone)]
pub struct PricingPolicy {
    multiplier: BigDecimal,
    fallback: HashMap<String, BigDecimal>,
    trustee: HashMap<String, BigDecimal>,
    default_price: BigDecimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self::new(BigDecimal::from_str("3.3").unwrap_or_else(|_| BigDecimal::from(3)))
    }
}

impl PricingPolicy {
    pub fn new(multiplier: BigDecimal) -> Self {
        Self {
            multiplier,
            fallback: table(FALLBACK_PRICES),
            trustee: table(TRUSTEE_COSTS),
            default_price: BigDecimal::from_str(DEFAULT_PRICE).unwrap_or_else(|_| BigDecimal::zero()),
        }
    }

    pub fn multiplier(&self) -> &BigDecimal {
        &self.multiplier
    }

    /// Retail price in USD for `tld` (without the leading dot). Uses the registrar's cost
    /// times the multiplier when a cost is known, the fallback table otherwise.
    pub fn price_for(&self, tld: &str, registrar_cost: Option<&BigDecimal>) -> BigDecimal {
        let tld = tld.trim_start_matches('.').to_lowercase();
        let base = match registrar_cost {
            Some(cost) => cost * &self.multiplier,
            None => self
                .fallback
                .get(&tld)
                .cloned()
                .unwrap_or_else(|| self.default_price.clone()),
        };
        let surcharge = self.trustee.get(&tld).cloned().unwrap_or_else(BigDecimal::zero);
        round_cents(&(base + surcharge))
    }
}
