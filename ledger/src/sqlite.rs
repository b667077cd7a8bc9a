//! SQLite-backed account store, rate table and transaction ledger.
//!
//! Amounts and rates are stored as decimal text so no precision is lost.
//! Fund operations run inside `BEGIN IMMEDIATE` so the read and the write of
//! one account cannot interleave with another writer.

use std::str::FromStr;
use std::time::Duration;

use arvault_common::constants::EXCHANGE_LOG_CAPACITY;
use arvault_common::{
    from_millis, AccountId, Currency, CurrencyPair, ExchangeRequest, ExchangeResult,
    TransactionId,
};
use arvault_fx::{prepare_update, FxError, FxResult, RateSheet, RateTable};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::account::{Account, FundsOp};
use crate::error::{LedgerError, LedgerResult};
use crate::journal::{TransactionLedger, TransactionRecord, TxState};
use crate::store::AccountStore;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        id INTEGER PRIMARY KEY,
        currency TEXT NOT NULL UNIQUE,
        balance TEXT NOT NULL,
        hold TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS rates (
        base TEXT NOT NULL,
        counter TEXT NOT NULL,
        rate TEXT NOT NULL,
        PRIMARY KEY (base, counter)
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        state TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        updated_at INTEGER,
        request TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS transactions_state ON transactions (state, started_at)",
    "CREATE TABLE IF NOT EXISTS exchange_log (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        entry TEXT NOT NULL
    )",
];

/// Durable store keeping accounts, rates, transaction records and the
/// completed log in one SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    log_capacity: usize,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            log_capacity: EXCHANGE_LOG_CAPACITY,
        };
        store.migrate().await?;
        info!(url = %url, "SQLite store opened");
        Ok(store)
    }

    /// Private in-memory database, gone when the store is dropped.
    pub async fn in_memory() -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to :memory: is its own database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            log_capacity: EXCHANGE_LOG_CAPACITY,
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Keep at most `capacity` completed results.
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> LedgerResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn apply(&self, id: AccountId, op: FundsOp, amount: Decimal) -> LedgerResult<Account> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let outcome = apply_locked(&mut *conn, id, op, amount).await;
        let finish = if outcome.is_ok() { "COMMIT" } else { "ROLLBACK" };

        if let Err(err) = sqlx::query(finish).execute(&mut *conn).await {
            warn!(account = %id, error = %err, "Failed to end funds transaction, discarding connection");
            drop(conn.detach());
            return Err(err.into());
        }

        if let Err(err) = &outcome {
            debug!(account = %id, ?op, amount = %amount, error = %err, "Funds operation refused");
        }
        outcome
    }
}

async fn apply_locked(
    conn: &mut SqliteConnection,
    id: AccountId,
    op: FundsOp,
    amount: Decimal,
) -> LedgerResult<Account> {
    let row = sqlx::query("SELECT id, currency, balance, hold FROM accounts WHERE id = ?")
        .bind(i64::from(id.value()))
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(LedgerError::AccountNotFound(id))?;

    let mut account = account_from_row(&row)?;
    account.apply(op, amount)?;

    sqlx::query("UPDATE accounts SET balance = ?, hold = ? WHERE id = ?")
        .bind(account.balance.to_string())
        .bind(account.hold.to_string())
        .bind(i64::from(id.value()))
        .execute(&mut *conn)
        .await?;
    Ok(account)
}

fn parse_decimal(column: &str, raw: &str) -> LedgerResult<Decimal> {
    Decimal::from_str(raw).map_err(|e| LedgerError::Corrupt(format!("{column} {raw:?}: {e}")))
}

fn account_from_row(row: &SqliteRow) -> LedgerResult<Account> {
    let id: i64 = row.try_get("id")?;
    let id = u32::try_from(id).map_err(|_| LedgerError::Corrupt(format!("account id {id}")))?;
    let currency: String = row.try_get("currency")?;
    let balance: String = row.try_get("balance")?;
    let hold: String = row.try_get("hold")?;

    Ok(Account {
        id: AccountId::new(id),
        currency: Currency::new(currency),
        balance: parse_decimal("balance", &balance)?,
        hold: parse_decimal("hold", &hold)?,
    })
}

fn record_from_row(row: &SqliteRow) -> LedgerResult<TransactionRecord> {
    let id: String = row.try_get("id")?;
    let state: String = row.try_get("state")?;
    let started_at: i64 = row.try_get("started_at")?;
    let updated_at: Option<i64> = row.try_get("updated_at")?;
    let request: String = row.try_get("request")?;

    Ok(TransactionRecord {
        id: TransactionId::parse(&id)
            .map_err(|e| LedgerError::Corrupt(format!("transaction id {id:?}: {e}")))?,
        state: state.parse()?,
        started_at: from_millis(started_at),
        updated_at: updated_at.map(from_millis),
        request: serde_json::from_str::<ExchangeRequest>(&request)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn rates_error(err: sqlx::Error) -> FxError {
    FxError::Storage(err.to_string())
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn reserve_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()> {
        self.apply(id, FundsOp::Reserve, amount).await.map(|_| ())
    }

    async fn commit_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()> {
        self.apply(id, FundsOp::Commit, amount).await.map(|_| ())
    }

    async fn rollback_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()> {
        self.apply(id, FundsOp::Rollback, amount).await.map(|_| ())
    }

    async fn credit_funds(&self, id: AccountId, amount: Decimal) -> LedgerResult<()> {
        self.apply(id, FundsOp::Credit, amount).await.map(|_| ())
    }

    async fn get_account(&self, id: AccountId) -> LedgerResult<Option<Account>> {
        sqlx::query("SELECT id, currency, balance, hold FROM accounts WHERE id = ?")
            .bind(i64::from(id.value()))
            .fetch_optional(&self.pool)
            .await?
            .map(|row| account_from_row(&row))
            .transpose()
    }

    async fn get_account_by_currency(&self, currency: &Currency) -> LedgerResult<Option<Account>> {
        sqlx::query("SELECT id, currency, balance, hold FROM accounts WHERE currency = ?")
            .bind(currency.code())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| account_from_row(&row))
            .transpose()
    }

    async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        sqlx::query("SELECT id, currency, balance, hold FROM accounts ORDER BY id")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(account_from_row)
            .collect()
    }

    async fn create_account(&self, account: Account) -> LedgerResult<()> {
        let inserted = sqlx::query(
            "INSERT INTO accounts (id, currency, balance, hold) VALUES (?, ?, ?, ?)",
        )
        .bind(i64::from(account.id.value()))
        .bind(account.currency.code())
        .bind(account.balance.to_string())
        .bind(account.hold.to_string())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(LedgerError::DuplicateAccount {
                id: account.id,
                currency: account.currency,
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn set_balance(&self, id: AccountId, balance: Decimal) -> LedgerResult<Account> {
        self.apply(id, FundsOp::SetBalance, balance).await
    }
}

#[async_trait]
impl RateTable for SqliteStore {
    async fn get_rate(&self, pair: &CurrencyPair) -> FxResult<Option<Decimal>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT rate FROM rates WHERE base = ? AND counter = ?")
                .bind(pair.base.code())
                .bind(pair.counter.code())
                .fetch_optional(&self.pool)
                .await
                .map_err(rates_error)?;

        raw.map(|r| Decimal::from_str(&r).map_err(|e| FxError::Storage(format!("rate {r:?}: {e}"))))
            .transpose()
    }

    async fn set_rate(&self, pair: &CurrencyPair, rate: Decimal) -> FxResult<()> {
        let inverse = prepare_update(pair, rate)?;

        let mut tx = self.pool.begin().await.map_err(rates_error)?;
        for (base, counter, value) in [
            (&pair.base, &pair.counter, rate),
            (&pair.counter, &pair.base, inverse),
        ] {
            sqlx::query(
                "INSERT INTO rates (base, counter, rate) VALUES (?, ?, ?)
                 ON CONFLICT(base, counter) DO UPDATE SET rate = excluded.rate",
            )
            .bind(base.code())
            .bind(counter.code())
            .bind(value.to_string())
            .execute(&mut *tx)
            .await
            .map_err(rates_error)?;
        }
        tx.commit().await.map_err(rates_error)?;

        debug!(pair = %pair, rate = %rate, reciprocal = %inverse, "Rate updated");
        Ok(())
    }

    async fn list_rates(&self) -> FxResult<RateSheet> {
        let rows = sqlx::query("SELECT base, counter, rate FROM rates")
            .fetch_all(&self.pool)
            .await
            .map_err(rates_error)?;

        let mut sheet = RateSheet::new();
        for row in rows {
            let base: String = row.try_get("base").map_err(rates_error)?;
            let counter: String = row.try_get("counter").map_err(rates_error)?;
            let raw: String = row.try_get("rate").map_err(rates_error)?;
            let rate = Decimal::from_str(&raw)
                .map_err(|e| FxError::Storage(format!("rate {raw:?}: {e}")))?;
            sheet
                .entry(Currency::new(base))
                .or_default()
                .insert(Currency::new(counter), rate);
        }
        Ok(sheet)
    }
}

#[async_trait]
impl TransactionLedger for SqliteStore {
    async fn start_tx(&self, record: &TransactionRecord) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO transactions (id, state, started_at, updated_at, request)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.state.as_str())
        .bind(record.started_at.timestamp_millis())
        .bind(record.updated_at.map(|t| t.timestamp_millis()))
        .bind(serde_json::to_string(&record.request)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_tx_state(&self, id: TransactionId, state: TxState) -> LedgerResult<()> {
        let updated = sqlx::query("UPDATE transactions SET state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(Utc::now().timestamp_millis())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(LedgerError::TransactionNotFound(id));
        }
        Ok(())
    }

    async fn cleanup_tx(&self, id: TransactionId) -> LedgerResult<()> {
        let deleted = sqlx::query("DELETE FROM transactions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted == 0 {
            warn!(tx_id = %id, "Cleanup of unknown transaction record");
        }
        Ok(())
    }

    async fn get_tx(&self, id: TransactionId) -> LedgerResult<Option<TransactionRecord>> {
        sqlx::query("SELECT id, state, started_at, updated_at, request FROM transactions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| record_from_row(&row))
            .transpose()
    }

    async fn pending_txs(&self) -> LedgerResult<Vec<TransactionRecord>> {
        sqlx::query(
            "SELECT id, state, started_at, updated_at, request FROM transactions
             WHERE state = ? ORDER BY started_at",
        )
        .bind(TxState::Pending.as_str())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(record_from_row)
        .collect()
    }

    async fn append_result(&self, result: &ExchangeResult) -> LedgerResult<()> {
        let entry = serde_json::to_string(result)?;
        let capacity = i64::try_from(self.log_capacity).unwrap_or(i64::MAX);

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO exchange_log (entry) VALUES (?)")
            .bind(entry)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM exchange_log WHERE seq <= (SELECT MAX(seq) FROM exchange_log) - ?",
        )
        .bind(capacity)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn recent_results(&self, limit: usize) -> LedgerResult<Vec<ExchangeResult>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let entries: Vec<String> =
            sqlx::query_scalar("SELECT entry FROM exchange_log ORDER BY seq DESC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;

        entries
            .iter()
            .map(|entry| serde_json::from_str(entry).map_err(LedgerError::from))
            .collect()
    }
}
