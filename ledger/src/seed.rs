//! Default house accounts and rates for a fresh deployment.

use arvault_common::{AccountId, Currency, CurrencyPair};
use arvault_fx::RateTable;
use rust_decimal::Decimal;
use tracing::info;

use crate::account::Account;
use crate::error::LedgerResult;
use crate::store::AccountStore;

/// What [`seed_defaults`] wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Accounts created.
    pub accounts: usize,
    /// Rates set, counting each pair once.
    pub rates: usize,
}

impl SeedReport {
    /// Nothing was written.
    pub fn is_empty(&self) -> bool {
        self.accounts == 0 && self.rates == 0
    }
}

/// The four house accounts.
pub fn default_accounts() -> Vec<Account> {
    vec![
        Account::new(AccountId::new(1), Currency::ars(), Decimal::from(120_000_000)),
        Account::new(AccountId::new(2), Currency::usd(), Decimal::from(60_000)),
        Account::new(AccountId::new(3), Currency::eur(), Decimal::from(40_000)),
        Account::new(AccountId::new(4), Currency::brl(), Decimal::from(60_000)),
    ]
}

/// Quoted rates against ARS; reciprocals are derived when they are set.
///
/// `ARS -> BRL` therefore stores `0.00361` (1 / 277.3 at five places), not a
/// hand-entered `0.0036`.
pub fn default_rates() -> Vec<(CurrencyPair, Decimal)> {
    vec![
        (CurrencyPair::new(Currency::usd(), Currency::ars()), Decimal::from(1469)),
        (CurrencyPair::new(Currency::eur(), Currency::ars()), Decimal::from(1741)),
        (CurrencyPair::new(Currency::brl(), Currency::ars()), Decimal::new(2773, 1)),
    ]
}

/// Populate an empty store with the default accounts and rates.
///
/// Each half is skipped when it already holds data, so restarting never resets
/// balances or overwrites rates set by an operator.
pub async fn seed_defaults(
    accounts: &dyn AccountStore,
    rates: &dyn RateTable,
) -> LedgerResult<SeedReport> {
    let mut report = SeedReport::default();

    if accounts.list_accounts().await?.is_empty() {
        for account in default_accounts() {
            accounts.create_account(account).await?;
            report.accounts += 1;
        }
    }

    if rates.list_rates().await?.is_empty() {
        for (pair, rate) in default_rates() {
            rates.set_rate(&pair, rate).await?;
            report.rates += 1;
        }
    }

    if !report.is_empty() {
        info!(accounts = report.accounts, rates = report.rates, "Seeded default data");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use arvault_fx::InMemoryRateTable;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_seed_populates_and_is_idempotent() {
        let store = MemoryStore::new();
        let rates = InMemoryRateTable::new();

        let report = seed_defaults(&store, &rates).await.unwrap();
        assert_eq!(report, SeedReport { accounts: 4, rates: 3 });
        assert_eq!(rates.len(), 6);

        let ars = store.get_account(AccountId::new(1)).await.unwrap().unwrap();
        assert_eq!(ars.currency, Currency::ars());
        assert_eq!(ars.balance, dec!(120000000));

        let brl_ars = CurrencyPair::new(Currency::brl(), Currency::ars());
        assert_eq!(rates.get_rate(&brl_ars).await.unwrap(), Some(dec!(277.3)));
        assert_eq!(rates.get_rate(&brl_ars.inverse()).await.unwrap(), Some(dec!(0.00361)));

        store.set_balance(AccountId::new(1), dec!(5)).await.unwrap();
        assert!(seed_defaults(&store, &rates).await.unwrap().is_empty());
        let ars = store.get_account(AccountId::new(1)).await.unwrap().unwrap();
        assert_eq!(ars.balance, dec!(5));
    }

    #[tokio::test]
    async fn test_seed_into_sqlite() {
        let store = crate::SqliteStore::in_memory().await.unwrap();
        let report = seed_defaults(&store, &store).await.unwrap();
        assert_eq!(report.accounts, 4);
        let usd_ars = CurrencyPair::new(Currency::usd(), Currency::ars());
        assert_eq!(store.get_rate(&usd_ars.inverse()).await.unwrap(), Some(dec!(0.00068)));
    }
}
