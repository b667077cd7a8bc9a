//! arVault Ledger
//!
//! Owns every balance and hold mutation in the engine, plus the durable record of
//! in-flight exchanges and the bounded log of completed ones.
//!
//! Two backends implement the same contracts: [`MemoryStore`] for tests and
//! simulation, and [`SqliteStore`] for durable deployments (it also serves as the
//! rate table).

pub mod account;
pub mod error;
pub mod store;
pub mod journal;
pub mod memory;
pub mod sqlite;
pub mod seed;

pub use account::{Account, FundsOp};
pub use error::{LedgerError, LedgerResult};
pub use store::AccountStore;
pub use journal::{TransactionLedger, TransactionRecord, TxState};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use seed::{seed_defaults, SeedReport};
