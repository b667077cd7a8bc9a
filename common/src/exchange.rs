//! Exchange request/result records and the per-attempt state machine.

use crate::{ClientAccountId, Currency, CurrencyPair, ExchangeError, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Phase of a single exchange attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangePhase {
    /// Request is being resolved and validated; nothing is written yet.
    Validating,
    /// Pending record is durable; no funds have moved.
    Pending,
    /// Reserving liquidity on the internal counter account.
    Reserving,
    /// Both transfer legs are in flight.
    Transferring,
    /// Committing the hold and crediting the base account.
    Committing,
    /// Funds moved for good.
    Committed,
    /// Transfers compensated and the hold released.
    RolledBack,
    /// Pending record deleted and result logged.
    Finalized,
}

impl ExchangePhase {
    /// Check if this is a terminal outcome (before cleanup).
    pub fn is_outcome(&self) -> bool {
        matches!(self, ExchangePhase::Committed | ExchangePhase::RolledBack)
    }

    /// Check if this is the final state.
    pub fn is_final(&self) -> bool {
        matches!(self, ExchangePhase::Finalized)
    }

    /// Get valid next phases from the current phase.
    pub fn valid_transitions(&self) -> &[ExchangePhase] {
        match self {
            ExchangePhase::Validating => &[ExchangePhase::Pending],
            ExchangePhase::Pending => &[ExchangePhase::Reserving],
            ExchangePhase::Reserving => &[ExchangePhase::Transferring, ExchangePhase::RolledBack],
            ExchangePhase::Transferring => {
                &[ExchangePhase::Committing, ExchangePhase::RolledBack]
            }
            ExchangePhase::Committing => &[ExchangePhase::Committed, ExchangePhase::RolledBack],
            ExchangePhase::Committed => &[ExchangePhase::Finalized],
            ExchangePhase::RolledBack => &[ExchangePhase::Finalized],
            ExchangePhase::Finalized => &[],
        }
    }

    /// Check if transition to given phase is valid.
    pub fn can_transition_to(&self, next: ExchangePhase) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Error when attempting an invalid phase transition.
#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub from: ExchangePhase,
    pub to: ExchangePhase,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid phase transition from {:?} to {:?}",
            self.from, self.to
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// Tracks the phase of one attempt and enforces legal transitions.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    phase: ExchangePhase,
}

impl PhaseTracker {
    /// Start tracking at `Validating`.
    pub fn new() -> Self {
        Self {
            phase: ExchangePhase::Validating,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    /// Move to `next`, refusing illegal jumps.
    pub fn advance(&mut self, next: ExchangePhase) -> Result<(), InvalidTransition> {
        if !self.phase.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A client's request to convert `base_amount` of `base_currency` into `counter_currency`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    /// Currency the client sells.
    pub base_currency: Currency,
    /// Currency the client receives.
    pub counter_currency: Currency,
    /// Client account debited in the base currency.
    pub base_account_id: ClientAccountId,
    /// Client account credited in the counter currency.
    pub counter_account_id: ClientAccountId,
    /// Amount of base currency to sell.
    pub base_amount: Decimal,
}

impl ExchangeRequest {
    /// The directed pair this request converts along.
    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.base_currency.clone(), self.counter_currency.clone())
    }
}

/// Outcome of an exchange attempt, as appended to the completed log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeResult {
    /// Transaction id of the attempt.
    pub id: TransactionId,
    /// When the attempt started.
    pub timestamp: DateTime<Utc>,
    /// 200 on success, otherwise the status of the failure kind.
    pub status: u16,
    /// The original request.
    pub request: ExchangeRequest,
    /// Rate used (when one was found).
    pub exchange_rate: Option<Decimal>,
    /// `base_amount * exchange_rate`, unrounded.
    pub counter_amount: Option<Decimal>,
    /// Human-readable observation; cleared on success.
    pub obs: Option<String>,
}

impl ExchangeResult {
    /// Create a result that has not reached an outcome yet.
    pub fn new(id: TransactionId, request: ExchangeRequest) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            status: 500,
            request,
            exchange_rate: None,
            counter_amount: None,
            obs: Some("Unknown error".to_string()),
        }
    }

    /// Attach the quoted rate and the derived counter amount.
    ///
    /// The counter amount stays unset when the product overflows.
    pub fn with_quote(mut self, rate: Option<Decimal>) -> Self {
        self.exchange_rate = rate;
        self.counter_amount = rate.and_then(|r| self.request.base_amount.checked_mul(r));
        self
    }

    /// Mark as successful.
    pub fn succeed(&mut self) {
        self.status = 200;
        self.obs = None;
    }

    /// Mark as failed with the given error.
    pub fn fail(&mut self, error: &ExchangeError) {
        self.status = error.status();
        self.obs = Some(error.to_string());
    }

    /// Check whether the exchange succeeded.
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}
