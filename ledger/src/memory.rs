//! In-process account store and transaction ledger.

use std::collections::VecDeque;

use arvault_common::constants::EXCHANGE_LOG_CAPACITY;
use arvault_common::{AccountId, Currency, ExchangeResult, TransactionId};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::account::{Account, FundsOp};
use crate::error::{LedgerError, LedgerResult};
use crate::journal::{TransactionLedger, TransactionRecord, TxState};
use crate::store::AccountStore;

/// Account store and ledger backed by process memory.
///
/// Each account sits in its own map slot; a fund operation holds only that
/// slot's lock while it checks and mutates. Nothing survives a restart, so this
/// store backs tests and the simulator.
pub struct MemoryStore {
    accounts: DashMap<AccountId, Account>,
    transactions: DashMap<TransactionId, TransactionRecord>,
    log: Mutex<VecDeque<ExchangeResult>>,
    log_capacity: usize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_log_capacity(EXCHANGE_LOG_CAPACITY)
    }

    /// Create an empty store keeping at most `capacity` completed results.
    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            accounts: DashMap::new(),
            transactions: DashMap::new(),
            log: Mutex::new(VecDeque::new()),
            log_capacity: capacity,
        }
    }

    fn apply(&self, id: AccountId, op: FundsOp, amount: Decimal) -> LedgerResult<Account> {
        let mut account = self
            .accounts
            .get_mut(&id)
            .ok_or(LedgerError::AccountNotFound(id))?;

        if let Err(err) = account.apply(op, amount) {
            debug!(account = %id, ?op, amount = %amount, error = %err, "Funds operation refused");
            return Err(err);
        }
        Ok(account.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn reserve_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()> {
        self.apply(id, FundsOp::Reserve, amount).map(|_| ())
    }

    async fn commit_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()> {
        self.apply(id, FundsOp::Commit, amount).map(|_| ())
    }

    async fn rollback_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()> {
        self.apply(id, FundsOp::Rollback, amount).map(|_| ())
    }

    async fn credit_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()> {
        self.apply(id, FundsOp::Credit, amount).map(|_| ())
    }

    async fn get_account(&self, id: AccountId) -> LedgerResult<Option<Account>> {
        Ok(self.accounts.get(&id).map(|a| a.clone()))
    }

    async fn get_account_by_currency(&self, currency: &Currency) -> LedgerResult<Option<Account>> {
        Ok(self
            .accounts
            .iter()
            .find(|a| &a.currency == currency)
            .map(|a| a.clone()))
    }

    async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self.accounts.iter().map(|a| a.clone()).collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn create_account(&self, account: Account) -> LedgerResult<()> {
        if self.accounts.iter().any(|a| a.currency == account.currency) {
            return Err(LedgerError::DuplicateAccount {
                id: account.id,
                currency: account.currency,
            });
        }
        match self.accounts.entry(account.id) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateAccount {
                id: account.id,
                currency: account.currency,
            }),
            Entry::Vacant(slot) => {
                slot.insert(account);
                Ok(())
            }
        }
    }

    async fn set_balance(&self, id: AccountId, balance: Decimal) -> LedgerResult<Account> {
        self.apply(id, FundsOp::SetBalance, balance)
    }
}

#[async_trait]
impl TransactionLedger for MemoryStore {
    async fn start_tx(&self, record: &TransactionRecord) -> LedgerResult<()> {
        self.transactions.insert(record.id, record.clone());
        Ok(())
    }

    async fn set_tx_state(&self, id: TransactionId, state: TxState) -> LedgerResult<()> {
        let mut record = self
            .transactions
            .get_mut(&id)
            .ok_or(LedgerError::TransactionNotFound(id))?;
        record.state = state;
        record.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn cleanup_tx(&self, id: TransactionId) -> LedgerResult<()> {
        if self.transactions.remove(&id).is_none() {
            warn!(tx_id = %id, "Cleanup of unknown transaction record");
        }
        Ok(())
    }

    async fn get_tx(&self, id: TransactionId) -> LedgerResult<Option<TransactionRecord>> {
        Ok(self.transactions.get(&id).map(|r| r.clone()))
    }

    async fn pending_txs(&self) -> LedgerResult<Vec<TransactionRecord>> {
        let mut pending: Vec<TransactionRecord> = self
            .transactions
            .iter()
            .filter(|r| r.state == TxState::Pending)
            .map(|r| r.clone())
            .collect();
        pending.sort_by_key(|r| r.started_at);
        Ok(pending)
    }

    async fn append_result(&self, result: &ExchangeResult) -> LedgerResult<()> {
        let mut log = self.log.lock();
        log.push_back(result.clone());
        while log.len() > self.log_capacity {
            log.pop_front();
        }
        Ok(())
    }

    async fn recent_results(&self, limit: usize) -> LedgerResult<Vec<ExchangeResult>> {
        Ok(self.log.lock().iter().rev().take(limit).cloned().collect())
    }
}
