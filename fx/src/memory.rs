//! In-process rate table.

use std::collections::HashMap;

use arvault_common::CurrencyPair;
use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::FxResult;
use crate::table::{prepare_update, RateSheet, RateTable};

/// Rate table held in memory.
///
/// A single lock covers the whole map so a pair and its reciprocal are swapped
/// together.
pub struct InMemoryRateTable {
    rates: RwLock<HashMap<CurrencyPair, Decimal>>,
}

impl InMemoryRateTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            rates: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored directed rates.
    pub fn len(&self) -> usize {
        self.rates.read().len()
    }

    /// Check if no rates are stored.
    pub fn is_empty(&self) -> bool {
        self.rates.read().is_empty()
    }
}

impl Default for InMemoryRateTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateTable for InMemoryRateTable {
    async fn get_rate(&self, pair: &CurrencyPair) -> FxResult<Option<Decimal>> {
        Ok(self.rates.read().get(pair).copied())
    }

    async fn set_rate(&self, pair: &CurrencyPair, rate: Decimal) -> FxResult<()> {
        let inverse = prepare_update(pair, rate)?;

        let mut rates = self.rates.write();
        rates.insert(pair.clone(), rate);
        rates.insert(pair.inverse(), inverse);
        drop(rates);

        debug!(pair = %pair, rate = %rate, reciprocal = %inverse, "Rate updated");
        Ok(())
    }

    async fn list_rates(&self) -> FxResult<RateSheet> {
        let mut sheet = RateSheet::new();
        for (pair, rate) in self.rates.read().iter() {
            sheet
                .entry(pair.base.clone())
                .or_default()
                .insert(pair.counter.clone(), *rate);
        }
        Ok(sheet)
    }
}
