//! Startup replay of attempts a previous run left pending.

use arvault_common::ExchangeError;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::coordinator::{Attempt, ExchangeCoordinator};
use crate::state::CoordinatorState;

/// Outcome of [`ExchangeCoordinator::run_recovery`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Pending records found at startup.
    pub found: usize,
    /// Replays that succeeded.
    pub succeeded: usize,
    /// Replays that ended in a failure result.
    pub failed: usize,
    /// Records left pending because the replay was rejected before reserving.
    pub left_pending: usize,
}

impl ExchangeCoordinator {
    /// Replay every pending record, then start serving exchanges.
    ///
    /// Records are replayed one at a time under their stored id, so finalizing a
    /// replay deletes the original record. Committed and rolled back records are
    /// not touched. A replay is not guarded against a reservation the crashed run
    /// already took.
    #[instrument(skip(self))]
    pub async fn run_recovery(&self) -> Result<RecoveryReport, ExchangeError> {
        {
            let mut state = self.state.write();
            if !state.can_recover() {
                warn!(state = ?*state, "Recovery requested outside startup");
                return Err(ExchangeError::Unavailable);
            }
            *state = CoordinatorState::Recovering;
        }

        let pending = match self.ledger.pending_txs().await {
            Ok(pending) => pending,
            Err(err) => {
                *self.state.write() = CoordinatorState::Starting;
                return Err(ExchangeError::Storage(err.to_string()));
            }
        };

        let mut report = RecoveryReport {
            found: pending.len(),
            ..RecoveryReport::default()
        };
        if !pending.is_empty() {
            info!(pending = pending.len(), "Replaying pending exchanges");
        }

        for record in pending {
            let result = self
                .execute(record.request.clone(), Attempt::Resume(record.id))
                .await;

            if matches!(self.ledger.get_tx(record.id).await, Ok(Some(_))) {
                warn!(
                    tx_id = %record.id,
                    status = result.status,
                    obs = ?result.obs,
                    "Replay rejected, record left pending"
                );
                report.left_pending += 1;
            } else if result.is_success() {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            info!(tx_id = %record.id, status = result.status, "Replayed exchange");
        }

        *self.state.write() = CoordinatorState::Running;
        info!(
            found = report.found,
            succeeded = report.succeeded,
            failed = report.failed,
            left_pending = report.left_pending,
            "Recovery complete, accepting exchanges"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arvault_common::{AccountId, Currency, TransactionId};
    use arvault_ledger::{
        seed_defaults, AccountStore, SqliteStore, TransactionLedger, TransactionRecord, TxState,
    };
    use rust_decimal_macros::dec;

    use crate::config::CoordinatorConfig;
    use crate::testing::{usd_ars, ScriptedGateway};

    fn coordinator_over(store: Arc<SqliteStore>, gateway: Arc<ScriptedGateway>) -> ExchangeCoordinator {
        ExchangeCoordinator::new(
            CoordinatorConfig::default(),
            store.clone(),
            store.clone(),
            store,
            gateway,
        )
    }

    fn temp_url() -> (std::path::PathBuf, String) {
        let path = std::env::temp_dir().join(format!("arvault-recovery-{}.db", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}", path.display());
        (path, url)
    }

    #[tokio::test]
    async fn test_recovery_replays_only_pending() {
        let (path, url) = temp_url();

        // First run: a crash leaves one pending record; another attempt had
        // reached its outcome but not its cleanup.
        let pending = TransactionRecord::pending(TransactionId::new(), usd_ars(dec!(100)));
        let mut committed = TransactionRecord::pending(TransactionId::new(), usd_ars(dec!(7)));
        committed.state = TxState::Committed;
        {
            let store = SqliteStore::connect(&url).await.unwrap();
            seed_defaults(&store, &store).await.unwrap();
            store.start_tx(&pending).await.unwrap();
            store.start_tx(&committed).await.unwrap();
            store.close().await;
        }

        // Restart.
        let store = Arc::new(SqliteStore::connect(&url).await.unwrap());
        let gateway = Arc::new(ScriptedGateway::new());
        let coordinator = coordinator_over(store.clone(), gateway.clone());
        assert!(!coordinator.is_accepting_requests());

        let report = coordinator.run_recovery().await.unwrap();

        assert_eq!(
            report,
            RecoveryReport {
                found: 1,
                succeeded: 1,
                failed: 0,
                left_pending: 0
            }
        );
        assert_eq!(coordinator.state(), CoordinatorState::Running);
        assert_eq!(gateway.calls().len(), 2);

        // The replay finalized the stored id; the committed record is untouched.
        assert!(store.get_tx(pending.id).await.unwrap().is_none());
        let kept = store.get_tx(committed.id).await.unwrap().unwrap();
        assert_eq!(kept.state, TxState::Committed);
        assert!(store.pending_txs().await.unwrap().is_empty());

        let usd = store.get_account(AccountId::new(2)).await.unwrap().unwrap();
        assert_eq!(usd.balance, dec!(60100));
        let logged = store.recent_results(10).await.unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].id, pending.id);

        store.close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_rejected_replay_stays_pending() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        seed_defaults(store.as_ref(), store.as_ref()).await.unwrap();

        let mut request = usd_ars(dec!(1));
        request.counter_currency = Currency::brl();
        let record = TransactionRecord::pending(TransactionId::new(), request);
        store.start_tx(&record).await.unwrap();

        let coordinator = coordinator_over(store.clone(), Arc::new(ScriptedGateway::new()));
        let report = coordinator.run_recovery().await.unwrap();

        assert_eq!(report.left_pending, 1);
        assert_eq!(store.pending_txs().await.unwrap().len(), 1);
        assert!(coordinator.is_accepting_requests());
    }

    #[tokio::test]
    async fn test_resume_after_reservation_reserves_again() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        seed_defaults(store.as_ref(), store.as_ref()).await.unwrap();

        // The crashed run had already reserved before dying.
        let record = TransactionRecord::pending(TransactionId::new(), usd_ars(dec!(100)));
        store.start_tx(&record).await.unwrap();
        store.reserve_funds(AccountId::new(1), dec!(146900)).await.unwrap();

        let coordinator = coordinator_over(store.clone(), Arc::new(ScriptedGateway::new()));
        coordinator.run_recovery().await.unwrap();

        // The replay committed its own reservation; the first one is still held.
        let ars = store.get_account(AccountId::new(1)).await.unwrap().unwrap();
        assert_eq!(ars.balance, dec!(119853100));
        assert_eq!(ars.hold, dec!(146900));
    }

    #[tokio::test]
    async fn test_recovery_runs_once() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let coordinator = coordinator_over(store, Arc::new(ScriptedGateway::new()));
        assert_eq!(coordinator.run_recovery().await.unwrap(), RecoveryReport::default());
        assert_eq!(
            coordinator.run_recovery().await,
            Err(ExchangeError::Unavailable)
        );
    }
}
