//! Test doubles and fixtures shared by the coordinator tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arvault_common::{AccountId, ClientAccountId, Currency, ExchangeRequest};
use arvault_fx::InMemoryRateTable;
use arvault_ledger::seed::default_accounts;
use arvault_ledger::{seed_defaults, Account, AccountStore, LedgerError, LedgerResult, MemoryStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::config::CoordinatorConfig;
use crate::coordinator::ExchangeCoordinator;
use crate::gateway::{Endpoint, TransferError, TransferGateway};
use crate::metrics::TelemetrySink;

/// A transfer seen by [`ScriptedGateway`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransferCall {
    pub from: Endpoint,
    pub to: Endpoint,
    pub amount: Decimal,
    pub succeeded: bool,
}

/// Instant gateway failing transfers from or to chosen endpoints.
#[derive(Default)]
pub struct ScriptedGateway {
    fail_from: Mutex<HashSet<Endpoint>>,
    fail_to: Mutex<HashSet<Endpoint>>,
    calls: Mutex<Vec<TransferCall>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every transfer leaving `endpoint`.
    pub fn fail_from(&self, endpoint: Endpoint) {
        self.fail_from.lock().insert(endpoint);
    }

    /// Fail every transfer arriving at `endpoint`.
    pub fn fail_to(&self, endpoint: Endpoint) {
        self.fail_to.lock().insert(endpoint);
    }

    /// Transfers attempted so far, in call order.
    pub fn calls(&self) -> Vec<TransferCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TransferGateway for ScriptedGateway {
    async fn transfer(
        &self,
        from: &Endpoint,
        to: &Endpoint,
        amount: Decimal,
    ) -> Result<(), TransferError> {
        let fails = self.fail_from.lock().contains(from) || self.fail_to.lock().contains(to);
        self.calls.lock().push(TransferCall {
            from: from.clone(),
            to: to.clone(),
            amount,
            succeeded: !fails,
        });
        if fails {
            return Err(TransferError::Declined(format!("{from} -> {to}")));
        }
        Ok(())
    }
}

/// Account store whose commit or credit can be made to fail.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    fail_commit: AtomicBool,
    fail_credit: AtomicBool,
}

impl FaultyStore {
    /// Store holding the default accounts.
    pub async fn seeded() -> Self {
        let inner = Arc::new(MemoryStore::new());
        for account in default_accounts() {
            inner.create_account(account).await.unwrap();
        }
        Self {
            inner,
            fail_commit: AtomicBool::new(false),
            fail_credit: AtomicBool::new(false),
        }
    }

    pub fn fail_commit(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_credit(&self) {
        self.fail_credit.store(true, Ordering::SeqCst);
    }

    pub fn inner(&self) -> Arc<MemoryStore> {
        self.inner.clone()
    }
}

#[async_trait]
impl AccountStore for FaultyStore {
    async fn reserve_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()> {
        self.inner.reserve_funds(id, amount).await
    }

    async fn commit_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(LedgerError::Database("injected commit failure".to_string()));
        }
        self.inner.commit_funds(id, amount).await
    }

    async fn rollback_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()> {
        self.inner.rollback_funds(id, amount).await
    }

    async fn credit_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()> {
        if self.fail_credit.load(Ordering::SeqCst) {
            return Err(LedgerError::Database("injected credit failure".to_string()));
        }
        self.inner.credit_funds(id, amount).await
    }

    async fn get_account(&self, id: AccountId) -> LedgerResult<Option<Account>> {
        self.inner.get_account(id).await
    }

    async fn get_account_by_currency(&self, currency: &Currency) -> LedgerResult<Option<Account>> {
        self.inner.get_account_by_currency(currency).await
    }

    async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        self.inner.list_accounts().await
    }

    async fn create_account(&self, account: Account) -> LedgerResult<()> {
        self.inner.create_account(account).await
    }

    async fn set_balance(&self, id: AccountId, balance: Decimal) -> LedgerResult<Account> {
        self.inner.set_balance(id, balance).await
    }
}

/// A running coordinator over in-memory stores.
pub struct Fixture {
    pub coordinator: Arc<ExchangeCoordinator>,
    pub store: Arc<MemoryStore>,
    pub rates: Arc<InMemoryRateTable>,
}

/// `USD -> ARS` request between clients `c1` and `c2`.
pub fn usd_ars(amount: Decimal) -> ExchangeRequest {
    ExchangeRequest {
        base_currency: Currency::usd(),
        counter_currency: Currency::ars(),
        base_account_id: ClientAccountId::new("c1"),
        counter_account_id: ClientAccountId::new("c2"),
        base_amount: amount,
    }
}

/// Running coordinator over `store`, optionally seeded with the default data.
pub async fn coordinator_on(
    store: Arc<MemoryStore>,
    gateway: Arc<dyn TransferGateway>,
    seed: bool,
) -> Fixture {
    let rates = Arc::new(InMemoryRateTable::new());
    if seed {
        seed_defaults(store.as_ref(), rates.as_ref()).await.unwrap();
    }
    let coordinator = ExchangeCoordinator::new(
        CoordinatorConfig::default(),
        store.clone(),
        rates.clone(),
        store.clone(),
        gateway,
    );
    coordinator.run_recovery().await.unwrap();

    Fixture {
        coordinator: Arc::new(coordinator),
        store,
        rates,
    }
}

/// Running coordinator over seeded in-memory stores.
pub async fn coordinator_with(gateway: Arc<dyn TransferGateway>) -> Fixture {
    coordinator_on(Arc::new(MemoryStore::new()), gateway, true).await
}

/// Same as [`coordinator_with`], reporting to `telemetry`.
pub async fn coordinator_with_telemetry(
    gateway: Arc<dyn TransferGateway>,
    telemetry: Arc<dyn TelemetrySink>,
) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let rates = Arc::new(InMemoryRateTable::new());
    seed_defaults(store.as_ref(), rates.as_ref()).await.unwrap();

    let coordinator = ExchangeCoordinator::new(
        CoordinatorConfig::default(),
        store.clone(),
        rates.clone(),
        store.clone(),
        gateway,
    )
    .with_telemetry(telemetry);
    coordinator.run_recovery().await.unwrap();

    Fixture {
        coordinator: Arc::new(coordinator),
        store,
        rates,
    }
}

/// Running coordinator whose account store is `store`.
pub async fn coordinator_on_faulty(
    store: Arc<FaultyStore>,
    gateway: Arc<dyn TransferGateway>,
) -> ExchangeCoordinator {
    let inner = store.inner();
    let rates = Arc::new(InMemoryRateTable::new());
    seed_defaults(inner.as_ref(), rates.as_ref()).await.unwrap();

    let coordinator =
        ExchangeCoordinator::new(CoordinatorConfig::default(), store, rates, inner, gateway);
    coordinator.run_recovery().await.unwrap();
    coordinator
}
