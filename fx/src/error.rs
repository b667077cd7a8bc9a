//! FX error types.

use arvault_common::CurrencyPair;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur in the rate table.
#[derive(Debug, Error)]
pub enum FxError {
    /// Rate must be strictly positive to have a reciprocal.
    #[error("Invalid rate {rate} for {pair}")]
    InvalidRate { pair: CurrencyPair, rate: Decimal },

    /// A pair must name two different currencies.
    #[error("Pair {0} names the same currency twice")]
    SameCurrency(CurrencyPair),

    /// The backing store failed.
    #[error("Rate storage error: {0}")]
    Storage(String),
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
