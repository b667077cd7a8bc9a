//! Core coordinator implementation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn, Span};

use arvault_common::{
    ExchangeError, ExchangePhase, ExchangeRequest, ExchangeResult, PhaseTracker, TransactionId,
};
use arvault_fx::RateTable;
use arvault_ledger::{AccountStore, TransactionLedger, TransactionRecord, TxState};

use crate::config::CoordinatorConfig;
use crate::gateway::{Endpoint, TransferGateway};
use crate::metrics::{NoopTelemetry, TelemetryError, TelemetrySink};
use crate::state::CoordinatorState;
use crate::validation::{validate, validate_currencies, ExchangePlan, Resolved};

/// How an attempt came to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attempt {
    /// New request; a pending record is written under a fresh id.
    Fresh,
    /// Replay of a pending record left by a previous run.
    Resume(TransactionId),
}

/// One transfer of the saga.
struct Leg {
    from: Endpoint,
    to: Endpoint,
    amount: Decimal,
}

impl Leg {
    fn reversed(&self) -> Leg {
        Leg {
            from: self.to.clone(),
            to: self.from.clone(),
            amount: self.amount,
        }
    }
}

/// Decrements the in-flight count when an attempt ends, however it ends.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Orchestrates exchanges against the account store, rate table, ledger and
/// transfer gateway.
pub struct ExchangeCoordinator {
    pub(crate) config: CoordinatorConfig,
    pub(crate) state: RwLock<CoordinatorState>,
    pub(crate) accounts: Arc<dyn AccountStore>,
    pub(crate) rates: Arc<dyn RateTable>,
    pub(crate) ledger: Arc<dyn TransactionLedger>,
    pub(crate) gateway: Arc<dyn TransferGateway>,
    pub(crate) telemetry: Arc<dyn TelemetrySink>,
    in_flight: AtomicUsize,
}

impl ExchangeCoordinator {
    /// Create a coordinator in the `Starting` state.
    ///
    /// It serves no exchange until [`ExchangeCoordinator::run_recovery`] has run.
    pub fn new(
        config: CoordinatorConfig,
        accounts: Arc<dyn AccountStore>,
        rates: Arc<dyn RateTable>,
        ledger: Arc<dyn TransactionLedger>,
        gateway: Arc<dyn TransferGateway>,
    ) -> Self {
        Self {
            config,
            state: RwLock::new(CoordinatorState::Starting),
            accounts,
            rates,
            ledger,
            gateway,
            telemetry: Arc::new(NoopTelemetry),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Replace the telemetry sink.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Get the current coordinator state.
    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    /// Check if the coordinator is accepting requests.
    pub fn is_accepting_requests(&self) -> bool {
        self.state().accepts_requests()
    }

    /// Number of attempts currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Configuration in use.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run one exchange to its outcome.
    ///
    /// Never fails: every problem is reported through the result's status and
    /// observation.
    pub async fn exchange(&self, request: ExchangeRequest) -> ExchangeResult {
        if !self.is_accepting_requests() {
            let mut result = ExchangeResult::new(TransactionId::new(), request);
            result.fail(&ExchangeError::Unavailable);
            debug!(state = ?self.state(), "Exchange refused");
            return result;
        }
        self.execute(request, Attempt::Fresh).await
    }

    /// Completed results, newest first.
    pub async fn recent_results(&self, limit: usize) -> Result<Vec<ExchangeResult>, ExchangeError> {
        self.ledger
            .recent_results(limit)
            .await
            .map_err(|e| ExchangeError::Storage(e.to_string()))
    }

    /// Stop accepting exchanges and wait for in-flight ones to finish.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        info!("Stopping coordinator");
        *self.state.write() = CoordinatorState::ShuttingDown;

        self.drain_in_flight().await;

        *self.state.write() = CoordinatorState::Stopped;
        info!("Coordinator stopped");
    }

    #[instrument(
        skip(self, request),
        fields(tx_id = tracing::field::Empty, pair = %request.pair())
    )]
    pub(crate) async fn execute(&self, request: ExchangeRequest, attempt: Attempt) -> ExchangeResult {
        let _guard = InFlight::enter(&self.in_flight);
        let started = Instant::now();
        let tx_id = match attempt {
            Attempt::Fresh => TransactionId::new(),
            Attempt::Resume(id) => id,
        };
        Span::current().record("tx_id", tracing::field::display(tx_id));

        let mut result = ExchangeResult::new(tx_id, request.clone());
        let mut tracker = PhaseTracker::new();

        if let Err(err) = validate_currencies(&request, &self.config.supported_currencies) {
            return reject(result, err);
        }
        let resolved = match self.resolve(&request).await {
            Ok(resolved) => resolved,
            Err(err) => return reject(result, err),
        };
        result = result.with_quote(resolved.rate);
        let plan = match validate(&request, resolved) {
            Ok(plan) => plan,
            Err(err) => return reject(result, err),
        };

        if attempt == Attempt::Fresh {
            let record = TransactionRecord::pending(tx_id, request.clone());
            if let Err(err) = self.ledger.start_tx(&record).await {
                error!(tx_id = %tx_id, error = %err, "Failed to write pending record");
                result.fail(&ExchangeError::Storage(err.to_string()));
                return result;
            }
        }
        advance(&mut tracker, tx_id, ExchangePhase::Pending);

        match self.run_saga(tx_id, &request, &plan, &mut tracker).await {
            Ok(()) => result.succeed(),
            Err(err) => result.fail(&err),
        }

        self.finalize(&result, &plan, started).await;
        advance(&mut tracker, tx_id, ExchangePhase::Finalized);

        info!(
            tx_id = %tx_id,
            status = result.status,
            counter_amount = ?result.counter_amount,
            obs = ?result.obs,
            "Exchange finished"
        );
        result
    }

    async fn resolve(&self, request: &ExchangeRequest) -> Result<Resolved, ExchangeError> {
        let base_account = self
            .accounts
            .get_account_by_currency(&request.base_currency)
            .await
            .map_err(|e| ExchangeError::Storage(e.to_string()))?;
        let counter_account = self
            .accounts
            .get_account_by_currency(&request.counter_currency)
            .await
            .map_err(|e| ExchangeError::Storage(e.to_string()))?;
        let rate = self
            .rates
            .get_rate(&request.pair())
            .await
            .map_err(|e| ExchangeError::Storage(e.to_string()))?;

        Ok(Resolved {
            base_account,
            counter_account,
            rate,
        })
    }

    async fn run_saga(
        &self,
        tx_id: TransactionId,
        request: &ExchangeRequest,
        plan: &ExchangePlan,
        tracker: &mut PhaseTracker,
    ) -> Result<(), ExchangeError> {
        let base_id = plan.base_account.id;
        let counter_id = plan.counter_account.id;

        advance(tracker, tx_id, ExchangePhase::Reserving);
        if let Err(err) = self.accounts.reserve_funds(counter_id, plan.counter_amount()).await {
            // No hold was taken, so there is nothing to release.
            let failure = if err.is_refusal() {
                ExchangeError::InsufficientLiquidity
            } else {
                ExchangeError::Storage(err.to_string())
            };
            warn!(
                tx_id = %tx_id,
                account = %counter_id,
                amount = %plan.counter_amount(),
                error = %err,
                "Reservation failed"
            );
            advance(tracker, tx_id, ExchangePhase::RolledBack);
            self.mark(tx_id, TxState::RolledBack).await;
            return Err(failure);
        }

        let inbound = Leg {
            from: Endpoint::Client(request.base_account_id.clone()),
            to: Endpoint::Internal(base_id),
            amount: plan.base_amount(),
        };
        let outbound = Leg {
            from: Endpoint::Internal(counter_id),
            to: Endpoint::Client(request.counter_account_id.clone()),
            amount: plan.counter_amount(),
        };

        advance(tracker, tx_id, ExchangePhase::Transferring);
        let (inbound_result, outbound_result) = tokio::join!(
            self.gateway.transfer(&inbound.from, &inbound.to, inbound.amount),
            self.gateway.transfer(&outbound.from, &outbound.to, outbound.amount),
        );

        if inbound_result.is_err() || outbound_result.is_err() {
            warn!(
                tx_id = %tx_id,
                inbound = ?inbound_result,
                outbound = ?outbound_result,
                "Transfer failed, rolling back"
            );
            let completed: Vec<&Leg> = [(&inbound, &inbound_result), (&outbound, &outbound_result)]
                .into_iter()
                .filter(|(_, outcome)| outcome.is_ok())
                .map(|(leg, _)| leg)
                .collect();
            self.compensate(tx_id, plan, &completed).await;
            advance(tracker, tx_id, ExchangePhase::RolledBack);
            return Err(ExchangeError::TransferFailure);
        }

        advance(tracker, tx_id, ExchangePhase::Committing);
        if let Err(err) = self.accounts.commit_funds(counter_id, plan.counter_amount()).await {
            error!(
                tx_id = %tx_id,
                account = %counter_id,
                amount = %plan.counter_amount(),
                error = %err,
                "Commit failed on counter account"
            );
            self.compensate(tx_id, plan, &[&inbound, &outbound]).await;
            advance(tracker, tx_id, ExchangePhase::RolledBack);
            return Err(ExchangeError::CommitFailure);
        }

        let credited = self.accounts.credit_funds(base_id, plan.base_amount()).await;
        advance(tracker, tx_id, ExchangePhase::Committed);
        self.mark(tx_id, TxState::Committed).await;

        if let Err(err) = credited {
            // The counter debit is final; only the base credit is missing.
            error!(
                tx_id = %tx_id,
                account = %base_id,
                amount = %plan.base_amount(),
                error = %err,
                "Credit failed on base account"
            );
            return Err(ExchangeError::CreditFailure);
        }
        Ok(())
    }

    /// Reverse the completed legs, release the hold and mark the record rolled back.
    async fn compensate(&self, tx_id: TransactionId, plan: &ExchangePlan, completed: &[&Leg]) {
        for leg in completed {
            let reverse = leg.reversed();
            warn!(
                tx_id = %tx_id,
                from = %reverse.from,
                to = %reverse.to,
                amount = %reverse.amount,
                "Reverting transfer"
            );
            if let Err(err) = self
                .gateway
                .transfer(&reverse.from, &reverse.to, reverse.amount)
                .await
            {
                error!(
                    tx_id = %tx_id,
                    from = %reverse.from,
                    to = %reverse.to,
                    amount = %reverse.amount,
                    error = %err,
                    "Compensating transfer failed"
                );
            }
        }

        let counter_id = plan.counter_account.id;
        if let Err(err) = self.accounts.rollback_funds(counter_id, plan.counter_amount()).await {
            error!(
                tx_id = %tx_id,
                account = %counter_id,
                amount = %plan.counter_amount(),
                error = %err,
                "Failed to release reservation"
            );
        }
        self.mark(tx_id, TxState::RolledBack).await;
    }

    async fn mark(&self, tx_id: TransactionId, state: TxState) {
        if let Err(err) = self.ledger.set_tx_state(tx_id, state).await {
            warn!(tx_id = %tx_id, state = %state, error = %err, "Failed to update transaction record");
        }
    }

    /// Delete the record, emit telemetry and log the result.
    async fn finalize(&self, result: &ExchangeResult, plan: &ExchangePlan, started: Instant) {
        if let Err(err) = self.ledger.cleanup_tx(result.id).await {
            error!(tx_id = %result.id, error = %err, "Failed to delete transaction record");
        }

        if result.is_success() {
            self.record_volume(&result.request, plan);
        }
        for id in [plan.base_account.id, plan.counter_account.id] {
            match self.accounts.get_account(id).await {
                Ok(Some(account)) => {
                    let balance = account.balance.to_f64().unwrap_or_default();
                    self.emit(self.telemetry.gauge(&format!("account.{id}.balance"), balance));
                }
                Ok(None) => {}
                Err(err) => debug!(account = %id, error = %err, "Balance gauge skipped"),
            }
        }
        self.emit(self.telemetry.timing("exchange.duration", started.elapsed()));

        if let Err(err) = self.ledger.append_result(result).await {
            error!(tx_id = %result.id, error = %err, "Failed to append exchange result");
        }
    }

    fn record_volume(&self, request: &ExchangeRequest, plan: &ExchangePlan) {
        let base = request.base_currency.code();
        let counter = request.counter_currency.code();
        let base_amount = rounded(plan.base_amount());
        let counter_amount = rounded(plan.counter_amount());

        self.emit(self.telemetry.increment(&format!("volume.{base}.acum"), base_amount));
        self.emit(self.telemetry.increment(&format!("volume.{counter}.acum"), counter_amount));
        self.emit(self.telemetry.increment(&format!("volume.{base}.neto"), -base_amount));
        self.emit(self.telemetry.increment(&format!("volume.{counter}.neto"), counter_amount));
        self.emit(self.telemetry.increment(&format!("volume.{base}.sell"), base_amount));
        self.emit(self.telemetry.increment(&format!("volume.{counter}.buy"), counter_amount));
    }

    fn emit(&self, outcome: Result<(), TelemetryError>) {
        if let Err(err) = outcome {
            debug!(error = %err, "Telemetry dropped");
        }
    }

    async fn drain_in_flight(&self) {
        use tokio::time::{timeout, Duration};

        let drain_timeout = Duration::from_secs(30);

        let drained = timeout(drain_timeout, async {
            loop {
                let in_flight = self.in_flight();
                if in_flight == 0 {
                    break;
                }
                info!(in_flight, "Waiting for in-flight exchanges to complete");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(in_flight = self.in_flight(), "Stopped with exchanges still in flight");
        }
    }
}

fn reject(mut result: ExchangeResult, err: ExchangeError) -> ExchangeResult {
    info!(tx_id = %result.id, code = err.error_code(), reason = %err, "Exchange rejected");
    result.fail(&err);
    result
}

fn advance(tracker: &mut PhaseTracker, tx_id: TransactionId, next: ExchangePhase) {
    match tracker.advance(next) {
        Ok(()) => debug!(tx_id = %tx_id, phase = ?next, "Phase"),
        Err(err) => error!(tx_id = %tx_id, error = %err, "Phase out of order"),
    }
}

fn rounded(amount: Decimal) -> i64 {
    amount.round().to_i64().unwrap_or_default()
}
