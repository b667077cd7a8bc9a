//! Simulated client bank acting as the transfer gateway.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};

use arvault_common::{ClientAccountId, Currency};
use arvault_coordinator::{Endpoint, TransferError, TransferGateway};

/// A client account held at the simulated bank.
#[derive(Debug, Clone)]
struct ClientAccount {
    currency: Currency,
    balance: Decimal,
}

/// Client-side bank: debits and credits client accounts as transfers arrive.
///
/// A transfer that exactly reverses one this bank already completed is treated
/// as a refund and is exempt from injected failures, so a rolled back exchange
/// leaves every client where it started.
pub struct SimulatedBank {
    accounts: RwLock<HashMap<ClientAccountId, ClientAccount>>,
    /// Completed transfers not yet refunded, by `(from, to)`.
    completed: RwLock<HashMap<(Endpoint, Endpoint), Vec<Decimal>>>,
    failure_rate: f64,
    latency: (Duration, Duration),
    rng: Mutex<StdRng>,
    transfers: AtomicU64,
    injected_failures: AtomicU64,
    refunds: AtomicU64,
}

impl SimulatedBank {
    /// Create a new simulated bank.
    pub fn new(failure_rate: f64, latency: (Duration, Duration), seed: u64) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            completed: RwLock::new(HashMap::new()),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            transfers: AtomicU64::new(0),
            injected_failures: AtomicU64::new(0),
            refunds: AtomicU64::new(0),
        }
    }

    /// Open a client account.
    pub async fn open_account(&self, id: ClientAccountId, currency: Currency, balance: Decimal) {
        self.accounts
            .write()
            .await
            .insert(id, ClientAccount { currency, balance });
    }

    /// Get balance of a client account.
    pub async fn get_balance(&self, id: &ClientAccountId) -> Option<Decimal> {
        self.accounts.read().await.get(id).map(|a| a.balance)
    }

    /// Sum of client balances per currency.
    pub async fn totals_by_currency(&self) -> BTreeMap<Currency, Decimal> {
        let mut totals = BTreeMap::new();
        for account in self.accounts.read().await.values() {
            *totals.entry(account.currency.clone()).or_insert(Decimal::ZERO) += account.balance;
        }
        totals
    }

    /// `(transfers, injected failures, refunds)` seen so far.
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.transfers.load(Ordering::Relaxed),
            self.injected_failures.load(Ordering::Relaxed),
            self.refunds.load(Ordering::Relaxed),
        )
    }

    async fn is_refund(&self, from: &Endpoint, to: &Endpoint, amount: Decimal) -> bool {
        self.completed
            .read()
            .await
            .get(&(to.clone(), from.clone()))
            .map(|amounts| amounts.contains(&amount))
            .unwrap_or(false)
    }

    async fn settle_refund(&self, from: &Endpoint, to: &Endpoint, amount: Decimal) {
        let mut completed = self.completed.write().await;
        if let Some(amounts) = completed.get_mut(&(to.clone(), from.clone())) {
            if let Some(pos) = amounts.iter().position(|a| *a == amount) {
                amounts.swap_remove(pos);
            }
        }
    }

    async fn draw(&self) -> (Duration, bool) {
        let (min, max) = self.latency;
        let mut rng = self.rng.lock().await;
        let delay = if max > min {
            Duration::from_millis(rng.gen_range(min.as_millis() as u64..=max.as_millis() as u64))
        } else {
            min
        };
        (delay, rng.gen_bool(self.failure_rate))
    }
}

#[async_trait]
impl TransferGateway for SimulatedBank {
    async fn transfer(
        &self,
        from: &Endpoint,
        to: &Endpoint,
        amount: Decimal,
    ) -> Result<(), TransferError> {
        self.transfers.fetch_add(1, Ordering::Relaxed);
        let refund = self.is_refund(from, to, amount).await;
        let (delay, fails) = self.draw().await;

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fails && !refund {
            self.injected_failures.fetch_add(1, Ordering::Relaxed);
            return Err(TransferError::Unreachable(format!("{from} -> {to}")));
        }

        {
            let mut accounts = self.accounts.write().await;
            if let Endpoint::Client(id) = to {
                if !accounts.contains_key(id) {
                    return Err(TransferError::Declined(format!("unknown client {id}")));
                }
            }
            if let Endpoint::Client(id) = from {
                let account = accounts
                    .get_mut(id)
                    .ok_or_else(|| TransferError::Declined(format!("unknown client {id}")))?;
                if account.balance < amount {
                    return Err(TransferError::Declined(format!("insufficient funds on {id}")));
                }
                account.balance -= amount;
            }
            if let Endpoint::Client(id) = to {
                if let Some(account) = accounts.get_mut(id) {
                    account.balance += amount;
                }
            }
        }

        if refund {
            self.refunds.fetch_add(1, Ordering::Relaxed);
            self.settle_refund(from, to, amount).await;
        } else {
            self.completed
                .write()
                .await
                .entry((from.clone(), to.clone()))
                .or_default()
                .push(amount);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arvault_common::AccountId;
    use rust_decimal_macros::dec;

    fn instant(failure_rate: f64) -> SimulatedBank {
        SimulatedBank::new(failure_rate, (Duration::ZERO, Duration::ZERO), 1)
    }

    #[tokio::test]
    async fn test_client_debit_and_credit() {
        let bank = instant(0.0);
        let alice = ClientAccountId::new("USD-0");
        bank.open_account(alice.clone(), Currency::usd(), dec!(50)).await;

        let client = Endpoint::Client(alice.clone());
        let house = Endpoint::Internal(AccountId::new(2));
        bank.transfer(&client, &house, dec!(20)).await.unwrap();
        assert_eq!(bank.get_balance(&alice).await, Some(dec!(30)));

        assert!(matches!(
            bank.transfer(&client, &house, dec!(31)).await,
            Err(TransferError::Declined(_))
        ));
        assert_eq!(bank.totals_by_currency().await[&Currency::usd()], dec!(30));
    }

    #[tokio::test]
    async fn test_refunds_bypass_injected_failures() {
        let bank = instant(1.0);
        let alice = ClientAccountId::new("USD-0");
        bank.open_account(alice.clone(), Currency::usd(), dec!(50)).await;
        let client = Endpoint::Client(alice.clone());
        let house = Endpoint::Internal(AccountId::new(2));

        // Every fresh transfer fails.
        assert!(bank.transfer(&client, &house, dec!(5)).await.is_err());

        // Seed a completed transfer, then its reversal goes through.
        bank.completed
            .write()
            .await
            .insert((client.clone(), house.clone()), vec![dec!(5)]);
        bank.accounts.write().await.get_mut(&alice).unwrap().balance = dec!(45);
        bank.transfer(&house, &client, dec!(5)).await.unwrap();

        assert_eq!(bank.get_balance(&alice).await, Some(dec!(50)));
        assert_eq!(bank.stats().2, 1);
        // A second reversal is not a refund any more.
        assert!(bank.transfer(&house, &client, dec!(5)).await.is_err());
    }
}
