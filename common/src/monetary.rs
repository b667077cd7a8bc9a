//! Currency types for arVault.

use serde::{Deserialize, Serialize};
use std::fmt;

/// ISO 4217 currency code, kept exactly as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn ars() -> Self {
        Self::new("ARS")
    }

    pub fn brl() -> Self {
        Self::new("BRL")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Currencies the house holds reserves in unless configured otherwise.
pub fn default_supported_currencies() -> Vec<Currency> {
    vec![Currency::usd(), Currency::ars(), Currency::brl(), Currency::eur()]
}

/// A directed currency pair: rates convert one unit of `base` into `counter`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Currency being sold by the client.
    pub base: Currency,
    /// Currency paid out to the client.
    pub counter: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: Currency, counter: Currency) -> Self {
        Self { base, counter }
    }

    /// Get the inverse pair.
    pub fn inverse(&self) -> Self {
        Self {
            base: self.counter.clone(),
            counter: self.base.clone(),
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.counter)
    }
}
