//! Durable records of in-flight exchanges and the completed-exchange log.

use std::fmt;
use std::str::FromStr;

use arvault_common::{ExchangeRequest, ExchangeResult, TransactionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Persisted state of an exchange attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    /// Written before any fund movement; still present after a restart means a crash.
    Pending,
    /// Saga completed successfully, cleanup not yet done.
    Committed,
    /// Saga compensated, cleanup not yet done.
    #[serde(rename = "rolledback")]
    RolledBack,
}

impl TxState {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::Pending => "pending",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolledback",
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxState {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TxState::Pending),
            "committed" => Ok(TxState::Committed),
            "rolledback" => Ok(TxState::RolledBack),
            other => Err(LedgerError::Corrupt(format!("unknown transaction state {other:?}"))),
        }
    }
}

/// Durable marker for one exchange attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub state: TxState,
    pub started_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Request to replay on recovery.
    pub request: ExchangeRequest,
}

impl TransactionRecord {
    /// A fresh pending record.
    pub fn pending(id: TransactionId, request: ExchangeRequest) -> Self {
        Self {
            id,
            state: TxState::Pending,
            started_at: Utc::now(),
            updated_at: None,
            request,
        }
    }
}

/// Storage for transaction records and the bounded completed log.
///
/// Records must survive a process restart.
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Persist a new record.
    async fn start_tx(&self, record: &TransactionRecord) -> LedgerResult<()>;

    /// Move a record to `state`, stamping `updated_at`.
    async fn set_tx_state(&self, id: TransactionId, state: TxState) -> LedgerResult<()>;

    /// Delete a record; deleting a missing record is not an error.
    async fn cleanup_tx(&self, id: TransactionId) -> LedgerResult<()>;

    /// Point read.
    async fn get_tx(&self, id: TransactionId) -> LedgerResult<Option<TransactionRecord>>;

    /// Records still in `Pending`, oldest first.
    async fn pending_txs(&self) -> LedgerResult<Vec<TransactionRecord>>;

    /// Append to the completed log, evicting the oldest entries beyond capacity.
    async fn append_result(&self, result: &ExchangeResult) -> LedgerResult<()>;

    /// Up to `limit` completed results, newest first.
    async fn recent_results(&self, limit: usize) -> LedgerResult<Vec<ExchangeResult>>;
}
