//! Simulation controller.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use arvault_common::{ClientAccountId, Currency, CurrencyPair, ExchangeRequest, TransactionId};
use arvault_coordinator::{
    CoordinatorConfig, ExchangeCoordinator, Metrics, RecoveryReport, TransferConfig,
};
use arvault_fx::RateTable;
use arvault_ledger::{seed_defaults, AccountStore, SqliteStore, TransactionLedger, TransactionRecord};

use crate::bank::SimulatedBank;
use crate::metrics::SimulationMetrics;
use crate::scenario::{Scenario, ScenarioStep};

/// Knobs of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    /// Random seed for reproducibility.
    pub seed: Option<u64>,
    /// Exchanges in flight at once.
    pub concurrency: usize,
    /// Latency range of a client transfer.
    pub latency: (Duration, Duration),
    /// SQLite database; in memory when unset.
    pub database_url: Option<String>,
    /// Funded client accounts per currency.
    pub clients_per_currency: usize,
    /// Opening balance of every funded client account.
    pub client_balance: Decimal,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            seed: None,
            concurrency: 16,
            latency: (Duration::from_millis(20), Duration::from_millis(80)),
            database_url: None,
            clients_per_currency: 5,
            client_balance: Decimal::from(10_000),
        }
    }
}

/// Drives exchanges through a real coordinator against a simulated client bank.
pub struct SimulationController {
    settings: SimulationSettings,
    failure_rate: f64,
    store: Arc<SqliteStore>,
    bank: Arc<SimulatedBank>,
    telemetry: Arc<Metrics>,
    coordinator: RwLock<Arc<ExchangeCoordinator>>,
    currencies: Vec<Currency>,
    /// Pairs with a stored rate.
    quoted_pairs: Vec<CurrencyPair>,
    rng: Mutex<StdRng>,
    metrics: RwLock<SimulationMetrics>,
    /// Per-currency total of house and client funds to conserve.
    baseline: RwLock<BTreeMap<Currency, Decimal>>,
    payouts: AtomicUsize,
}

impl SimulationController {
    /// Open the store, seed it, fund the client bank and start a coordinator.
    pub async fn new(settings: SimulationSettings, failure_rate: f64) -> anyhow::Result<Self> {
        let store = match &settings.database_url {
            Some(url) => SqliteStore::connect(url).await?,
            None => SqliteStore::in_memory().await?,
        };
        let store = Arc::new(store);
        let seeded = seed_defaults(store.as_ref(), store.as_ref()).await?;
        info!(accounts = seeded.accounts, rates = seeded.rates, "Store seeded");

        let currencies: Vec<Currency> = store
            .list_accounts()
            .await?
            .into_iter()
            .map(|account| account.currency)
            .collect();
        if currencies.len() < 2 {
            anyhow::bail!("need at least two house accounts, found {}", currencies.len());
        }
        let mut quoted_pairs = Vec::new();
        for (base, counters) in store.list_rates().await? {
            for counter in counters.keys() {
                quoted_pairs.push(CurrencyPair::new(base.clone(), counter.clone()));
            }
        }

        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let bank = Arc::new(SimulatedBank::new(failure_rate, settings.latency, rng.gen()));
        for currency in &currencies {
            for i in 0..settings.clients_per_currency {
                bank.open_account(pool_client(currency, i), currency.clone(), settings.client_balance)
                    .await;
            }
        }

        let telemetry = Arc::new(Metrics::new());
        let coordinator = Arc::new(build_coordinator(
            &store,
            &bank,
            &telemetry,
            &currencies,
            &settings,
            failure_rate,
        ));
        let report = coordinator.run_recovery().await?;
        log_recovery(&report);

        let controller = Self {
            settings,
            failure_rate,
            store,
            bank,
            telemetry,
            coordinator: RwLock::new(coordinator),
            currencies,
            quoted_pairs,
            rng: Mutex::new(rng),
            metrics: RwLock::new(SimulationMetrics::new()),
            baseline: RwLock::new(BTreeMap::new()),
            payouts: AtomicUsize::new(0),
        };
        controller.reset_baseline().await?;
        Ok(controller)
    }

    /// Run every step of a scenario in order.
    pub async fn run_scenario(&self, scenario: &Scenario) -> anyhow::Result<()> {
        info!("Running scenario: {} - {}", scenario.name, scenario.description);
        for step in &scenario.steps {
            self.execute_step(step).await?;
        }
        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::SetBalance { currency, amount } => {
                let currency = Currency::new(currency.as_str());
                let account = self
                    .store
                    .get_account_by_currency(&currency)
                    .await?
                    .with_context(|| format!("no house account holds {currency}"))?;
                self.store.set_balance(account.id, *amount).await?;
                info!(account = %account.id, currency = %currency, balance = %amount, "Balance overridden");
                self.reset_baseline().await?;
            }
            ScenarioStep::RandomExchanges { count } => self.random_exchanges(*count).await,
            ScenarioStep::CrashWithPending { count } => self.crash_with_pending(*count).await?,
            ScenarioStep::Restart => {
                let report = self.restart().await?;
                log_recovery(&report);
            }
            ScenarioStep::Verify => {
                let violations = self.verify().await?;
                if !violations.is_empty() {
                    for violation in &violations {
                        warn!("{}", violation);
                    }
                    anyhow::bail!("{} invariant violation(s)", violations.len());
                }
                info!("Invariants hold");
            }
        }
        Ok(())
    }

    /// Fire `count` random exchanges, at most `concurrency` at a time.
    pub async fn random_exchanges(&self, count: usize) {
        let mut requests = Vec::with_capacity(count);
        for _ in 0..count {
            requests.push(self.random_request(false).await);
        }

        let coordinator = self.coordinator.read().await.clone();
        let results: Vec<_> = stream::iter(requests)
            .map(|request| {
                let coordinator = coordinator.clone();
                async move {
                    let started = Instant::now();
                    let result = coordinator.exchange(request).await;
                    (result, started.elapsed().as_millis() as u64)
                }
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut metrics = self.metrics.write().await;
        for (result, latency) in &results {
            metrics.record(result, *latency);
        }
        info!(
            exchanges = count,
            total = metrics.total_exchanges,
            successful = metrics.successful_exchanges,
            "Batch complete"
        );
    }

    /// Write pending records without running them, as a crash after
    /// `start_tx` would leave behind.
    pub async fn crash_with_pending(&self, count: usize) -> anyhow::Result<()> {
        for _ in 0..count {
            let request = self.random_request(true).await;
            let record = TransactionRecord::pending(TransactionId::new(), request);
            self.store.start_tx(&record).await?;
        }
        warn!(pending = count, "Simulated crash with pending exchanges");
        Ok(())
    }

    /// Stop the running coordinator and replace it with a recovered one.
    pub async fn restart(&self) -> anyhow::Result<RecoveryReport> {
        let mut slot = self.coordinator.write().await;
        slot.stop().await;

        let coordinator = Arc::new(build_coordinator(
            &self.store,
            &self.bank,
            &self.telemetry,
            &self.currencies,
            &self.settings,
            self.failure_rate,
        ));
        let report = coordinator.run_recovery().await?;
        *slot = coordinator;
        Ok(report)
    }

    /// Check holds, pending records and per-currency conservation.
    ///
    /// Returns one line per violation found.
    pub async fn verify(&self) -> anyhow::Result<Vec<String>> {
        let mut violations = Vec::new();

        for account in self.store.list_accounts().await? {
            if !account.is_consistent() {
                violations.push(format!("account {} is inconsistent: {:?}", account.id, account));
            }
            if !account.hold.is_zero() {
                violations.push(format!("account {} still holds {}", account.id, account.hold));
            }
        }

        let pending = self.store.pending_txs().await?;
        if !pending.is_empty() {
            violations.push(format!("{} exchange(s) left pending", pending.len()));
        }

        let baseline = self.baseline.read().await;
        let totals = self.totals().await?;
        for (currency, expected) in baseline.iter() {
            let actual = totals.get(currency).copied().unwrap_or_default();
            if actual != *expected {
                violations.push(format!("{currency} total is {actual}, expected {expected}"));
            }
        }

        Ok(violations)
    }

    /// Get simulation metrics.
    pub async fn get_metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }

    /// Telemetry emitted by the coordinator.
    pub fn telemetry(&self) -> &Metrics {
        &self.telemetry
    }

    /// Client bank used as the transfer gateway.
    pub fn bank(&self) -> &SimulatedBank {
        &self.bank
    }

    /// Stop the coordinator and close the store.
    pub async fn shutdown(&self) {
        self.coordinator.read().await.stop().await;
        self.store.close().await;
    }

    async fn random_request(&self, quoted_only: bool) -> ExchangeRequest {
        let (pair, client, amount) = {
            let mut rng = self.rng.lock().await;
            let pair = if quoted_only && !self.quoted_pairs.is_empty() {
                self.quoted_pairs[rng.gen_range(0..self.quoted_pairs.len())].clone()
            } else {
                let base = rng.gen_range(0..self.currencies.len());
                let mut counter = rng.gen_range(0..self.currencies.len() - 1);
                if counter >= base {
                    counter += 1;
                }
                CurrencyPair::new(self.currencies[base].clone(), self.currencies[counter].clone())
            };
            let client = rng.gen_range(0..self.settings.clients_per_currency.max(1));
            (pair, client, Decimal::new(rng.gen_range(100..=1000), 2))
        };

        // Payout accounts only ever receive, so a counter leg can always be refunded.
        let payout = ClientAccountId::new(format!(
            "{}-payout-{}",
            pair.counter,
            self.payouts.fetch_add(1, Ordering::Relaxed)
        ));
        self.bank
            .open_account(payout.clone(), pair.counter.clone(), Decimal::ZERO)
            .await;

        ExchangeRequest {
            base_currency: pair.base.clone(),
            counter_currency: pair.counter,
            base_account_id: pool_client(&pair.base, client),
            counter_account_id: payout,
            base_amount: amount,
        }
    }

    async fn totals(&self) -> anyhow::Result<BTreeMap<Currency, Decimal>> {
        let mut totals = self.bank.totals_by_currency().await;
        for account in self.store.list_accounts().await? {
            *totals.entry(account.currency).or_insert(Decimal::ZERO) += account.balance;
        }
        Ok(totals)
    }

    async fn reset_baseline(&self) -> anyhow::Result<()> {
        let totals = self.totals().await?;
        *self.baseline.write().await = totals;
        Ok(())
    }
}

fn pool_client(currency: &Currency, index: usize) -> ClientAccountId {
    ClientAccountId::new(format!("{currency}-{index}"))
}

fn build_coordinator(
    store: &Arc<SqliteStore>,
    bank: &Arc<SimulatedBank>,
    telemetry: &Arc<Metrics>,
    currencies: &[Currency],
    settings: &SimulationSettings,
    failure_rate: f64,
) -> ExchangeCoordinator {
    let config = CoordinatorConfig {
        supported_currencies: currencies.to_vec(),
        transfer: TransferConfig {
            min_latency: settings.latency.0,
            max_latency: settings.latency.1,
            failure_rate,
        },
        seed_defaults: false,
        ..CoordinatorConfig::default()
    };
    ExchangeCoordinator::new(
        config,
        store.clone(),
        store.clone(),
        store.clone(),
        bank.clone(),
    )
    .with_telemetry(telemetry.clone())
}

fn log_recovery(report: &RecoveryReport) {
    info!(
        found = report.found,
        succeeded = report.succeeded,
        failed = report.failed,
        left_pending = report.left_pending,
        "Coordinator recovered"
    );
}
