//! Rate table contract and the reciprocal rule.

use std::collections::BTreeMap;

use arvault_common::constants::RECIPROCAL_RATE_DP;
use arvault_common::{Currency, CurrencyPair};
use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{FxError, FxResult};

/// All stored rates, nested as `base -> counter -> rate`.
pub type RateSheet = BTreeMap<Currency, BTreeMap<Currency, Decimal>>;

/// Storage for directed exchange rates.
///
/// Implementations must write a pair and its reciprocal as one unit: a reader may
/// see the old pair or the new pair, never one side of each.
#[async_trait]
pub trait RateTable: Send + Sync {
    /// Rate converting one unit of `pair.base` into `pair.counter`, if set.
    async fn get_rate(&self, pair: &CurrencyPair) -> FxResult<Option<Decimal>>;

    /// Set `pair` to `rate` and its inverse to [`reciprocal`]`(rate)`.
    async fn set_rate(&self, pair: &CurrencyPair, rate: Decimal) -> FxResult<()>;

    /// Every stored rate.
    async fn list_rates(&self) -> FxResult<RateSheet>;
}

/// `1 / rate` rounded half away from zero to five decimal places.
pub fn reciprocal(rate: Decimal) -> Decimal {
    (Decimal::ONE / rate)
        .round_dp_with_strategy(RECIPROCAL_RATE_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Check a rate update before it is written, returning the reciprocal to store.
pub fn prepare_update(pair: &CurrencyPair, rate: Decimal) -> FxResult<Decimal> {
    if pair.base == pair.counter {
        return Err(FxError::SameCurrency(pair.clone()));
    }
    if rate <= Decimal::ZERO {
        return Err(FxError::InvalidRate {
            pair: pair.clone(),
            rate,
        });
    }
    Ok(reciprocal(rate))
}
