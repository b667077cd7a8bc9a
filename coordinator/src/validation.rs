//! Request validation, kept free of I/O.

use arvault_common::{Currency, ExchangeError, ExchangeRequest};
use arvault_fx::Conversion;
use arvault_ledger::Account;
use rust_decimal::Decimal;

/// Store lookups made for a request whose currencies are supported.
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    pub base_account: Option<Account>,
    pub counter_account: Option<Account>,
    pub rate: Option<Decimal>,
}

/// A request that passed validation, with everything the saga needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangePlan {
    /// House account receiving the client's base currency.
    pub base_account: Account,
    /// House account paying out the counter currency.
    pub counter_account: Account,
    /// Amounts and rate.
    pub conversion: Conversion,
}

impl ExchangePlan {
    pub fn base_amount(&self) -> Decimal {
        self.conversion.base_amount
    }

    pub fn counter_amount(&self) -> Decimal {
        self.conversion.counter_amount
    }
}

/// Both currencies must be in the supported set.
pub fn validate_currencies(
    request: &ExchangeRequest,
    supported: &[Currency],
) -> Result<(), ExchangeError> {
    if !supported.contains(&request.base_currency) || !supported.contains(&request.counter_currency)
    {
        return Err(ExchangeError::InvalidCurrency);
    }
    Ok(())
}

/// Check, in order, that both accounts exist, the amount is positive and a rate
/// is quoted for the pair. An amount whose counter value overflows is refused as
/// an invalid amount.
pub fn validate(request: &ExchangeRequest, resolved: Resolved) -> Result<ExchangePlan, ExchangeError> {
    let (base_account, counter_account) = match (resolved.base_account, resolved.counter_account) {
        (Some(base), Some(counter)) => (base, counter),
        _ => return Err(ExchangeError::AccountNotFound),
    };

    if request.base_amount <= Decimal::ZERO {
        return Err(ExchangeError::InvalidAmount);
    }

    let rate = resolved
        .rate
        .ok_or_else(|| ExchangeError::RateUnavailable(request.pair()))?;

    let conversion = Conversion::quote(request.pair(), request.base_amount, rate)
        .ok_or(ExchangeError::InvalidAmount)?;

    Ok(ExchangePlan {
        base_account,
        counter_account,
        conversion,
    })
}
