//! Simulation metrics.

use std::collections::{BTreeMap, VecDeque};

use arvault_common::ExchangeResult;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Exchanges attempted.
    pub total_exchanges: u64,
    /// Exchanges that succeeded.
    pub successful_exchanges: u64,
    /// Exchanges refused by validation (4xx).
    pub rejected_exchanges: u64,
    /// Exchanges that failed after starting (5xx).
    pub failed_exchanges: u64,
    /// Result count per observation text.
    pub outcomes: BTreeMap<String, u64>,
    /// Latency samples (ms).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_exchanges: 0,
            successful_exchanges: 0,
            rejected_exchanges: 0,
            failed_exchanges: 0,
            outcomes: BTreeMap::new(),
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record one finished exchange.
    pub fn record(&mut self, result: &ExchangeResult, latency_ms: u64) {
        self.total_exchanges += 1;
        match result.status {
            200 => self.successful_exchanges += 1,
            400..=499 => self.rejected_exchanges += 1,
            _ => self.failed_exchanges += 1,
        }

        let outcome = result.obs.clone().unwrap_or_else(|| "OK".to_string());
        *self.outcomes.entry(outcome).or_insert(0) += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Get average latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p99 latency.
    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_exchanges == 0 {
            return 0.0;
        }

        self.successful_exchanges as f64 / self.total_exchanges as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arvault_common::{ClientAccountId, Currency, ExchangeError, ExchangeRequest, TransactionId};
    use rust_decimal_macros::dec;

    fn result_with(error: Option<ExchangeError>) -> ExchangeResult {
        let request = ExchangeRequest {
            base_currency: Currency::usd(),
            counter_currency: Currency::ars(),
            base_account_id: ClientAccountId::new("USD-0"),
            counter_account_id: ClientAccountId::new("ARS-payout-0"),
            base_amount: dec!(1),
        };
        let mut result = ExchangeResult::new(TransactionId::new(), request);
        match error {
            Some(error) => result.fail(&error),
            None => result.succeed(),
        }
        result
    }

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record(&result_with(None), 100);
        metrics.record(&result_with(None), 200);
        metrics.record(&result_with(Some(ExchangeError::InvalidAmount)), 150);
        metrics.record(&result_with(Some(ExchangeError::TransferFailure)), 150);

        assert_eq!(metrics.total_exchanges, 4);
        assert_eq!(metrics.successful_exchanges, 2);
        assert_eq!(metrics.rejected_exchanges, 1);
        assert_eq!(metrics.failed_exchanges, 1);
        assert_eq!(metrics.outcomes["Transfer failed"], 1);
        assert_eq!(metrics.outcomes["OK"], 2);
        assert_eq!(metrics.average_latency_ms(), 150);
        assert_eq!(metrics.p99_latency_ms(), 200);
        assert_eq!(metrics.success_rate(), 0.5);
    }
}
