//! Currency conversion at a quoted rate.

use arvault_common::CurrencyPair;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A base amount priced in the counter currency.
///
/// The counter amount is deliberately left unrounded; fractional units flow into
/// the fund operations as computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    /// Pair converted along.
    pub pair: CurrencyPair,
    /// Rate applied.
    pub rate: Decimal,
    /// Amount of base currency.
    pub base_amount: Decimal,
    /// Amount of counter currency.
    pub counter_amount: Decimal,
}

impl Conversion {
    /// Price `base_amount` at `rate`, or `None` if the product does not fit a `Decimal`.
    pub fn quote(pair: CurrencyPair, base_amount: Decimal, rate: Decimal) -> Option<Self> {
        let counter_amount = base_amount.checked_mul(rate)?;
        Some(Self {
            pair,
            rate,
            base_amount,
            counter_amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arvault_common::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quote_is_unrounded() {
        let pair = CurrencyPair::new(Currency::ars(), Currency::usd());
        let conversion = Conversion::quote(pair, dec!(1.23), dec!(0.00068)).unwrap();
        assert_eq!(conversion.counter_amount, dec!(0.0008364));
        assert_eq!(conversion.rate, dec!(0.00068));
    }

    #[test]
    fn test_usd_to_ars_scenario() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::ars());
        let conversion = Conversion::quote(pair, dec!(100), dec!(1469)).unwrap();
        assert_eq!(conversion.counter_amount, dec!(146900));
    }

    #[test]
    fn test_overflowing_quote_is_refused() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::ars());
        assert_eq!(
            Conversion::quote(pair, dec!(70000000000000000000000000000), dec!(1469)),
            None
        );
    }
}
