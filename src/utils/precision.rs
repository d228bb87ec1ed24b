// src/utils/precision.rs
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept for every monetary aggregate (balances, P&L, equity).
pub const MONEY_DP: u32 = 8;

/// Rounds a monetary amount to [`MONEY_DP`] places, banker's rounding.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointNearestEven)
}

/// Rounds quantity DOWN to the nearest multiple of step_size.
/// Example: amount=10.999, step=1.0 -> 10.0
pub fn normalize_quantity(amount: Decimal, step_size: Decimal) -> Decimal {
    if step_size.is_zero() {
        return amount;
    }
    (amount / step_size).floor() * step_size
}

/// Converts a float into a money-precision decimal. Non-finite input yields `None`.
pub fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(round_money)
}

pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantity_is_floored_to_step() {
        assert_eq!(normalize_quantity(dec!(10.999), dec!(1)), dec!(10));
        assert_eq!(normalize_quantity(dec!(0.123456), dec!(0.0001)), dec!(0.1234));
        assert_eq!(normalize_quantity(dec!(3.3), Decimal::ZERO), dec!(3.3));
    }

    #[test]
    fn money_rounding_keeps_eight_places() {
        assert_eq!(round_money(dec!(1.123456789)), dec!(1.12345679));
        assert_eq!(to_decimal(f64::NAN), None);
        assert_eq!(to_decimal(2.5), Some(dec!(2.5)));
    }
}
