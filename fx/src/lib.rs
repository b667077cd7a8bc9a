//! arVault FX
//!
//! Directed exchange rates between supported currencies.
//!
//! Every rate written through [`RateTable::set_rate`] stores its reciprocal in the
//! same operation, rounded to five decimal places. No rate is ever derived by
//! triangulating through a third currency.
//!
//! # Example
//!
//! ```rust,ignore
//! use arvault_fx::{InMemoryRateTable, RateTable};
//! use arvault_common::{Currency, CurrencyPair};
//!
//! let table = InMemoryRateTable::new();
//! let pair = CurrencyPair::new(Currency::usd(), Currency::ars());
//! table.set_rate(&pair, dec!(1469)).await?;
//!
//! // 1 / 1469 rounded to 5 dp
//! assert_eq!(table.get_rate(&pair.inverse()).await?, Some(dec!(0.00068)));
//! ```

pub mod table;
pub mod memory;
pub mod conversion;
pub mod error;

pub use table::{prepare_update, reciprocal, RateSheet, RateTable};
pub use memory::InMemoryRateTable;
pub use conversion::Conversion;
pub use error::{FxError, FxResult};
