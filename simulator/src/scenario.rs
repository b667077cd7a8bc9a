//! Simulation scenarios.

use std::path::Path;

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Probability that a client transfer fails.
    #[serde(default)]
    pub failure_rate: f64,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Override the balance of the internal account holding `currency`.
    SetBalance { currency: String, amount: Decimal },
    /// Fire random exchanges between the seeded currencies.
    RandomExchanges { count: usize },
    /// Leave pending records behind as a crashed run would.
    CrashWithPending { count: usize },
    /// Stop the coordinator and bring up a new one on the same store.
    Restart,
    /// Check holds, pending records and per-currency conservation.
    Verify,
}

impl Scenario {
    /// Load a built-in scenario by name, or a JSON scenario file.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "random-load" => Ok(Self::random_load()),
            "liquidity-drain" => Ok(Self::liquidity_drain()),
            "flaky-transfers" => Ok(Self::flaky_transfers()),
            "crash-recovery" => Ok(Self::crash_recovery()),
            path if Path::new(path).is_file() => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading scenario file {path}"))?;
                serde_json::from_str(&raw).with_context(|| format!("parsing scenario file {path}"))
            }
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Replace every random exchange step's count.
    pub fn with_exchanges(mut self, exchanges: usize) -> Self {
        for step in &mut self.steps {
            if let ScenarioStep::RandomExchanges { count } = step {
                *count = exchanges;
            }
        }
        self
    }

    /// Random exchanges across every pair.
    fn random_load() -> Self {
        Self {
            name: "random-load".to_string(),
            description: "Random exchanges across every seeded pair".to_string(),
            failure_rate: 0.0,
            steps: vec![
                ScenarioStep::RandomExchanges { count: 200 },
                ScenarioStep::Verify,
            ],
        }
    }

    /// Starve the ARS account so reservations get refused.
    fn liquidity_drain() -> Self {
        Self {
            name: "liquidity-drain".to_string(),
            description: "Exchanges into ARS against a nearly empty house account".to_string(),
            failure_rate: 0.0,
            steps: vec![
                ScenarioStep::SetBalance {
                    currency: "ARS".to_string(),
                    amount: Decimal::from(20_000),
                },
                ScenarioStep::RandomExchanges { count: 200 },
                ScenarioStep::Verify,
            ],
        }
    }

    /// Client transfers fail often; every failure must be compensated.
    fn flaky_transfers() -> Self {
        Self {
            name: "flaky-transfers".to_string(),
            description: "Transfer failures with compensation".to_string(),
            failure_rate: 0.3,
            steps: vec![
                ScenarioStep::RandomExchanges { count: 200 },
                ScenarioStep::Verify,
            ],
        }
    }

    /// Pending records survive a restart and are replayed.
    fn crash_recovery() -> Self {
        Self {
            name: "crash-recovery".to_string(),
            description: "Replay of pending records after a restart".to_string(),
            failure_rate: 0.1,
            steps: vec![
                ScenarioStep::RandomExchanges { count: 50 },
                ScenarioStep::CrashWithPending { count: 10 },
                ScenarioStep::Restart,
                ScenarioStep::RandomExchanges { count: 50 },
                ScenarioStep::Verify,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_scenarios_end_with_verify() {
        for name in ["random-load", "liquidity-drain", "flaky-transfers", "crash-recovery"] {
            let scenario = Scenario::load(name).unwrap();
            assert_eq!(scenario.name, name);
            assert!(matches!(scenario.steps.last(), Some(ScenarioStep::Verify)));
        }
        assert!(Scenario::load("no-such-scenario").is_err());
    }

    #[test]
    fn test_scenario_from_json() {
        let raw = r#"{
            "name": "custom",
            "description": "file based",
            "steps": [
                {"type": "set_balance", "currency": "USD", "amount": "10"},
                {"type": "random_exchanges", "count": 3},
                {"type": "restart"},
                {"type": "verify"}
            ]
        }"#;
        let scenario: Scenario = serde_json::from_str(raw).unwrap();
        assert_eq!(scenario.failure_rate, 0.0);
        assert_eq!(scenario.steps.len(), 4);
        assert!(matches!(
            &scenario.steps[0],
            ScenarioStep::SetBalance { currency, amount } if currency == "USD" && *amount == Decimal::from(10)
        ));

        let scenario = scenario.with_exchanges(7);
        assert!(matches!(scenario.steps[1], ScenarioStep::RandomExchanges { count: 7 }));
    }
}
