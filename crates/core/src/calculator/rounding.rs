use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub code: String,
    /// Digits after the decimal point in the currency's minor unit.
    pub minor_units: u32,
}

impl Currency {
    pub fn new(code: impl Into<String>, minor_units: u32) -> Self {
        Self { code: code.into().trim().to_ascii_uppercase(), minor_units }
    }

    pub fn usd() -> Self {
        Self::new("USD", 2)
    }

    pub fn round(&self, amount: Decimal) -> Decimal {
        round_half_up(amount, self.minor_units)
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::usd()
    }
}

/// Half-up rounding (midpoint away from zero) at exactly `minor_units` decimal places.
///
/// The result is rescaled so `100` renders as `100.00` for a two-digit currency.
pub fn round_half_up(amount: Decimal, minor_units: u32) -> Decimal {
    let mut rounded =
        amount.round_dp_with_strategy(minor_units, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(minor_units);
    rounded
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{round_half_up, Currency};

    #[test]
    fn half_cent_rounds_up() {
        let amount: Decimal = "33.335".parse().expect("decimal literal");
        for _ in 0..3 {
            assert_eq!(round_half_up(amount, 2).to_string(), "33.34");
        }
        let below: Decimal = "33.334".parse().expect("decimal literal");
        assert_eq!(round_half_up(below, 2).to_string(), "33.33");
    }

    #[test]
    fn pads_to_minor_unit_scale() {
        assert_eq!(Currency::usd().round(Decimal::new(100, 0)).to_string(), "100.00");
        let yen: Decimal = "1234.5".parse().expect("decimal literal");
        assert_eq!(Currency::new("jpy", 0).round(yen).to_string(), "1235");
    }
}
