use bigdecimal::{BigDecimal, Zero};

/// Rounds a USD amount to whole cents.
pub fn round_cents(amount: &BigDecimal) -> BigDecimal {
    amount.round(2)
}

pub fn is_positive(amount: &BigDecimal) -> bool {
    amount > &BigDecimal::zero()
}
