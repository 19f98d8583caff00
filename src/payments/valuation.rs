use bigdecimal::{BigDecimal, Zero};

use crate::domain::money::round_cents;
use crate::gateway::{services, GatewayError, ResilientGateway};
use crate::providers::{PaymentGateway, ProviderError};

/// USD value of `value_coin`. Uses the notification's `price` (USD per coin) when it has one,
/// otherwise asks the payment gateway how much coin one USD buys.
pub async fn usd_value(
    gateway: &ResilientGateway,
    payments: &dyn PaymentGateway,
    currency: &str,
    value_coin: &BigDecimal,
    price: Option<&BigDecimal>,
) -> Result<BigDecimal, GatewayError> {
    if let Some(price) = price.filter(|p| *p > &BigDecimal::zero()) {
        return Ok(round_cents(&(value_coin * price)));
    }

    let one_usd = &BigDecimal::from(1);
    let coin_per_usd = gateway
        .execute(services::PAYMENTS, move || async move {
            let rate = payments.convert_rate(currency, one_usd).await?;
            if rate <= BigDecimal::zero() {
                return Err(ProviderError::Rejected(format!(
                    "non-positive {} rate {}",
                    currency, rate
                )));
            }
            Ok(rate)
        })
        .await?;

    Ok(round_cents(&(value_coin / coin_per_usd)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ServiceHealthTracker;
    use crate::providers::{IncomingPayment, ProviderResult};
    use async_trait::async_trait;
    use std::str::FromStr;
    use std::sync::Arc;

    struct FixedRate(&'static str);

    #[async_trait]
    impl PaymentGateway for FixedRate {
        async fn create_address(&self, _: &str, _: &str) -> ProviderResult<String> {
            Ok("addr".to_string())
        }

        async fn convert_rate(&self, _: &str, amount_usd: &BigDecimal) -> ProviderResult<BigDecimal> {
            Ok(BigDecimal::from_str(self.0).unwrap() * amount_usd)
        }

        async fn payments_received(&self, _: &str, _: &str) -> ProviderResult<Vec<IncomingPayment>> {
            Ok(Vec::new())
        }
    }

    fn gateway() -> ResilientGateway {
        ResilientGateway::with_default_policies(Arc::new(ServiceHealthTracker::new()))
    }

    #[tokio::test]
    async fn test_uses_notification_price() {
        let value = usd_value(
            &gateway(),
            &FixedRate("0"),
            "BTC",
            &BigDecimal::from_str("0.001").unwrap(),
            Some(&BigDecimal::from_str("55000").unwrap()),
        )
        .await
        .unwrap();
        assert_eq!(value, BigDecimal::from_str("55.00").unwrap());
    }

    #[tokio::test]
    async fn test_falls_back_to_conversion_rate() {
        // 0.0004 ETH per USD
        let value = usd_value(
            &gateway(),
            &FixedRate("0.0004"),
            "ETH",
            &BigDecimal::from_str("0.0198").unwrap(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(value, BigDecimal::from_str("49.50").unwrap());
    }

    #[tokio::test]
    async fn test_zero_rate_is_rejected() {
        let err = usd_value(
            &gateway(),
            &FixedRate("0"),
            "ETH",
            &BigDecimal::from(1),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { .. }));
    }
}
