//! Transfer gateway contract and the simulated implementation.

use std::fmt;
use std::time::Duration;

use arvault_common::{AccountId, ClientAccountId};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::config::TransferConfig;

/// One side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// House account held in the account store.
    Internal(AccountId),
    /// Client-controlled account outside the engine.
    Client(ClientAccountId),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Internal(id) => write!(f, "internal:{id}"),
            Endpoint::Client(id) => write!(f, "client:{id}"),
        }
    }
}

/// Why a transfer did not go through.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The counterparty refused the movement.
    #[error("Transfer declined: {0}")]
    Declined(String),

    /// The counterparty could not be reached.
    #[error("Transfer endpoint unreachable: {0}")]
    Unreachable(String),
}

/// Moves funds between an internal account and a client account.
///
/// There is no idempotency key and no cancellation: a failed transfer is never
/// retried by the caller, only reversed by an explicit transfer the other way.
#[async_trait]
pub trait TransferGateway: Send + Sync {
    /// Move `amount` from `from` to `to`.
    async fn transfer(&self, from: &Endpoint, to: &Endpoint, amount: Decimal)
        -> Result<(), TransferError>;
}

/// Gateway that sleeps for a random latency and fails with a fixed probability.
pub struct SimulatedGateway {
    config: TransferConfig,
    rng: Mutex<StdRng>,
}

impl SimulatedGateway {
    /// Create a gateway seeded from the OS.
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a gateway with a reproducible random sequence.
    pub fn with_seed(config: TransferConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn draw(&self) -> (Duration, bool) {
        let min = self.config.min_latency.as_millis() as u64;
        let max = self.config.max_latency.as_millis() as u64;
        let failure_rate = self.config.failure_rate.clamp(0.0, 1.0);

        let mut rng = self.rng.lock();
        let delay = if max > min { rng.gen_range(min..=max) } else { min };
        (Duration::from_millis(delay), rng.gen_bool(failure_rate))
    }
}

#[async_trait]
impl TransferGateway for SimulatedGateway {
    async fn transfer(
        &self,
        from: &Endpoint,
        to: &Endpoint,
        amount: Decimal,
    ) -> Result<(), TransferError> {
        let (delay, fails) = self.draw();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if fails {
            debug!(%from, %to, amount = %amount, "Simulated transfer failed");
            return Err(TransferError::Unreachable(format!("{from} -> {to}")));
        }
        debug!(%from, %to, amount = %amount, delay_ms = delay.as_millis() as u64, "Simulated transfer");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn endpoints() -> (Endpoint, Endpoint) {
        (
            Endpoint::Client(ClientAccountId::new("c1")),
            Endpoint::Internal(AccountId::new(2)),
        )
    }

    #[tokio::test]
    async fn test_instant_gateway_succeeds() {
        let gateway = SimulatedGateway::with_seed(TransferConfig::instant(), 7);
        let (from, to) = endpoints();
        for _ in 0..20 {
            gateway.transfer(&from, &to, dec!(10)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_always_failing_gateway() {
        let config = TransferConfig {
            failure_rate: 1.0,
            ..TransferConfig::instant()
        };
        let gateway = SimulatedGateway::with_seed(config, 7);
        let (from, to) = endpoints();
        assert!(matches!(
            gateway.transfer(&from, &to, dec!(10)).await,
            Err(TransferError::Unreachable(_))
        ));
    }

    #[test]
    fn test_latency_within_bounds() {
        let config = TransferConfig {
            min_latency: Duration::from_millis(200),
            max_latency: Duration::from_millis(400),
            failure_rate: 0.0,
        };
        let gateway = SimulatedGateway::with_seed(config, 42);
        for _ in 0..100 {
            let (delay, fails) = gateway.draw();
            assert!(delay >= Duration::from_millis(200) && delay <= Duration::from_millis(400));
            assert!(!fails);
        }
    }

    #[test]
    fn test_endpoint_display() {
        let (client, internal) = endpoints();
        assert_eq!(client.to_string(), "client:c1");
        assert_eq!(internal.to_string(), "internal:2");
    }
}
