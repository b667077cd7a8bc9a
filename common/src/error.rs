//! Error taxonomy for exchange attempts.

use crate::CurrencyPair;
use thiserror::Error;

/// Why an exchange attempt did not succeed.
///
/// The `Display` text is the observation recorded on the exchange result, and
/// [`ExchangeError::status`] is the externally visible code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Either currency is outside the supported set.
    #[error("Invalid currency")]
    InvalidCurrency,

    /// No internal account exists for a supported currency.
    #[error("Internal account not found")]
    AccountNotFound,

    /// The base amount is zero or negative.
    #[error("BaseAmount must be a positive number")]
    InvalidAmount,

    /// No rate entry for the requested pair.
    #[error("Exchange rate not available for {0}")]
    RateUnavailable(CurrencyPair),

    /// Reservation on the counter account failed.
    #[error("Not enough liquidity in internal counter account")]
    InsufficientLiquidity,

    /// One or both transfer legs failed.
    #[error("Transfer failed")]
    TransferFailure,

    /// The counter hold could not be committed after both legs succeeded.
    #[error("Commit failed on counter account")]
    CommitFailure,

    /// The base account could not be credited after the commit.
    #[error("Credit failed on base account")]
    CreditFailure,

    /// The backing store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The coordinator is not serving requests.
    #[error("Coordinator not accepting requests")]
    Unavailable,
}

impl ExchangeError {
    /// Status code surfaced to callers.
    pub fn status(&self) -> u16 {
        match self {
            ExchangeError::InvalidCurrency
            | ExchangeError::InvalidAmount
            | ExchangeError::RateUnavailable(_) => 400,
            ExchangeError::AccountNotFound => 404,
            ExchangeError::Unavailable => 503,
            ExchangeError::InsufficientLiquidity
            | ExchangeError::TransferFailure
            | ExchangeError::CommitFailure
            | ExchangeError::CreditFailure
            | ExchangeError::Storage(_) => 500,
        }
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ExchangeError::InvalidCurrency => "INVALID_CURRENCY",
            ExchangeError::AccountNotFound => "ACCOUNT_NOT_FOUND",
            ExchangeError::InvalidAmount => "INVALID_AMOUNT",
            ExchangeError::RateUnavailable(_) => "RATE_UNAVAILABLE",
            ExchangeError::InsufficientLiquidity => "INSUFFICIENT_LIQUIDITY",
            ExchangeError::TransferFailure => "TRANSFER_FAILURE",
            ExchangeError::CommitFailure => "COMMIT_FAILURE",
            ExchangeError::CreditFailure => "CREDIT_FAILURE",
            ExchangeError::Storage(_) => "STORAGE_ERROR",
            ExchangeError::Unavailable => "UNAVAILABLE",
        }
    }

    /// Whether the failure was detected before any fund movement or ledger write.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ExchangeError::InvalidCurrency
                | ExchangeError::AccountNotFound
                | ExchangeError::InvalidAmount
                | ExchangeError::RateUnavailable(_)
                | ExchangeError::Unavailable
        )
    }

    /// Failures that indicate a broken internal invariant rather than a business outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExchangeError::CommitFailure | ExchangeError::CreditFailure)
    }
}

/// Result type alias for exchange operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Currency;

    #[test]
    fn test_status_codes() {
        assert_eq!(ExchangeError::InvalidCurrency.status(), 400);
        assert_eq!(ExchangeError::AccountNotFound.status(), 404);
        assert_eq!(ExchangeError::InvalidAmount.status(), 400);
        assert_eq!(ExchangeError::InsufficientLiquidity.status(), 500);
        assert_eq!(ExchangeError::TransferFailure.status(), 500);
        assert_eq!(ExchangeError::CommitFailure.status(), 500);
    }

    #[test]
    fn test_observation_text() {
        let pair = CurrencyPair::new(Currency::usd(), Currency::brl());
        assert_eq!(
            ExchangeError::RateUnavailable(pair).to_string(),
            "Exchange rate not available for USD/BRL"
        );
        assert_eq!(
            ExchangeError::InsufficientLiquidity.to_string(),
            "Not enough liquidity in internal counter account"
        );
    }

    #[test]
    fn test_classification() {
        assert!(ExchangeError::InvalidAmount.is_rejection());
        assert!(!ExchangeError::TransferFailure.is_rejection());
        assert!(ExchangeError::CommitFailure.is_fatal());
        assert!(!ExchangeError::InsufficientLiquidity.is_fatal());
    }
}
