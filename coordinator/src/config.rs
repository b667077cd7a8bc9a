//! Coordinator configuration.

use std::time::Duration;

use arvault_common::constants::{TRANSFER_MAX_LATENCY_MS, TRANSFER_MIN_LATENCY_MS};
use arvault_common::{default_supported_currencies, Currency};

/// Simulated transfer gateway configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Lower latency bound of a transfer.
    pub min_latency: Duration,
    /// Upper latency bound of a transfer.
    pub max_latency: Duration,
    /// Probability in `[0, 1]` that a transfer fails.
    pub failure_rate: f64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_millis(TRANSFER_MIN_LATENCY_MS),
            max_latency: Duration::from_millis(TRANSFER_MAX_LATENCY_MS),
            failure_rate: 0.0,
        }
    }
}

impl TransferConfig {
    /// Transfers that complete immediately and never fail.
    pub fn instant() -> Self {
        Self {
            min_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
            failure_rate: 0.0,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// StatsD host; telemetry stays in-process when unset.
    pub statsd_host: Option<String>,
    /// StatsD port.
    pub statsd_port: u16,
    /// Prefix prepended to every metric name.
    pub prefix: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            statsd_host: None,
            statsd_port: 8125,
            prefix: "arVault".to_string(),
        }
    }
}

/// Main coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Database URL.
    pub database_url: String,
    /// Currencies accepted on either side of an exchange.
    pub supported_currencies: Vec<Currency>,
    /// Transfer gateway configuration.
    pub transfer: TransferConfig,
    /// Telemetry configuration.
    pub telemetry: TelemetryConfig,
    /// Seed default accounts and rates into an empty store.
    pub seed_defaults: bool,
    /// Log level.
    pub log_level: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://arvault.db".to_string(),
            supported_currencies: default_supported_currencies(),
            transfer: TransferConfig::default(),
            telemetry: TelemetryConfig::default(),
            seed_defaults: true,
            log_level: "info".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(list) = std::env::var("SUPPORTED_CURRENCIES") {
            config.supported_currencies = parse_currencies(&list);
        }

        if let Ok(ms) = std::env::var("TRANSFER_MIN_LATENCY_MS") {
            if let Ok(ms) = ms.parse() {
                config.transfer.min_latency = Duration::from_millis(ms);
            }
        }

        if let Ok(ms) = std::env::var("TRANSFER_MAX_LATENCY_MS") {
            if let Ok(ms) = ms.parse() {
                config.transfer.max_latency = Duration::from_millis(ms);
            }
        }

        if let Ok(rate) = std::env::var("TRANSFER_FAILURE_RATE") {
            if let Ok(rate) = rate.parse() {
                config.transfer.failure_rate = rate;
            }
        }

        if let Ok(host) = std::env::var("STATSD_HOST") {
            if !host.is_empty() {
                config.telemetry.statsd_host = Some(host);
            }
        }

        if let Ok(port) = std::env::var("STATSD_PORT") {
            if let Ok(port) = port.parse() {
                config.telemetry.statsd_port = port;
            }
        }

        if let Ok(prefix) = std::env::var("STATSD_PREFIX") {
            config.telemetry.prefix = prefix;
        }

        if let Ok(seed) = std::env::var("SEED_DEFAULTS") {
            config.seed_defaults = !matches!(seed.to_ascii_lowercase().as_str(), "0" | "false" | "no");
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.supported_currencies.is_empty() {
            return Err("At least one supported currency is required".to_string());
        }

        if self.transfer.min_latency > self.transfer.max_latency {
            return Err("Minimum transfer latency cannot exceed maximum".to_string());
        }

        if !(0.0..=1.0).contains(&self.transfer.failure_rate) {
            return Err("Transfer failure rate must be within [0, 1]".to_string());
        }

        if self.telemetry.statsd_host.is_some() && self.telemetry.statsd_port == 0 {
            return Err("StatsD port cannot be 0".to_string());
        }

        Ok(())
    }
}

fn parse_currencies(list: &str) -> Vec<Currency> {
    list.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(Currency::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.supported_currencies.len(), 4);
        assert_eq!(config.transfer.min_latency, Duration::from_millis(200));
        assert_eq!(config.telemetry.prefix, "arVault");
    }

    #[test]
    fn test_invalid_config() {
        let mut config = CoordinatorConfig::default();
        config.transfer.failure_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.transfer.min_latency = Duration::from_secs(1);
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.supported_currencies.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_currencies() {
        assert_eq!(
            parse_currencies(" USD, ARS,,EUR "),
            vec![Currency::usd(), Currency::ars(), Currency::eur()]
        );
    }
}
