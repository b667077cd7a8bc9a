//! Account store contract.

use arvault_common::{AccountId, Currency};
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::account::Account;
use crate::error::LedgerResult;

/// Sole owner of account balance and hold mutation.
///
/// Each mutating method is one indivisible check-and-mutate on a single account:
/// two concurrent calls against the same account serialize, calls against
/// different accounts do not block each other.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// `hold += amount` if `balance - hold >= amount`, else `InsufficientFunds`.
    async fn reserve_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()>;

    /// `balance -= amount; hold -= amount` if `hold >= amount`, else `InsufficientHold`.
    async fn commit_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()>;

    /// `hold -= amount` if `hold >= amount`, else `InsufficientHold`.
    async fn rollback_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()>;

    /// `balance += amount`.
    async fn credit_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()>;

    /// Point read by id.
    async fn get_account(&self, id: AccountId) -> LedgerResult<Option<Account>>;

    /// Point read of the house account for `currency`.
    async fn get_account_by_currency(&self, currency: &Currency) -> LedgerResult<Option<Account>>;

    /// Every account, ordered by id.
    async fn list_accounts(&self) -> LedgerResult<Vec<Account>>;

    /// Insert a new account; ids and currencies are unique.
    async fn create_account(&self, account: Account) -> LedgerResult<()>;

    /// Administrative balance override, refused below the current hold.
    async fn set_balance(&self, id: AccountId, balance: Decimal) -> LedgerResult<Account>;
}
