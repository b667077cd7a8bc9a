//! Ledger error types.

use arvault_common::{AccountId, Currency, TransactionId};
use arvault_fx::FxError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by the account store and transaction ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No account with this id.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// An account with this id or currency already exists.
    #[error("Account {id} ({currency}) already exists")]
    DuplicateAccount { id: AccountId, currency: Currency },

    /// Reservation exceeds available funds.
    #[error("Insufficient funds on account {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        account: AccountId,
        requested: Decimal,
        available: Decimal,
    },

    /// Commit or release exceeds the current hold.
    #[error("Insufficient hold on account {account}: requested {requested}, hold {hold}")]
    InsufficientHold {
        account: AccountId,
        requested: Decimal,
        hold: Decimal,
    },

    /// Amounts moved through the primitives must not be negative.
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// A balance override would leave the account below its hold.
    #[error("Invalid balance {balance} for account {account} holding {hold}")]
    InvalidBalance {
        account: AccountId,
        balance: Decimal,
        hold: Decimal,
    },

    /// No transaction record with this id.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Rate table failure while seeding.
    #[error(transparent)]
    Rates(#[from] FxError),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Stored data could not be decoded.
    #[error("Corrupt ledger data: {0}")]
    Corrupt(String),
}

impl LedgerError {
    /// Business refusals, as opposed to infrastructure faults.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientFunds { .. } | LedgerError::InsufficientHold { .. }
        )
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Corrupt(err.to_string())
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
