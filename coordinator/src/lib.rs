//! arVault Coordinator
//!
//! The coordinator drives each exchange through reserve, transfer and
//! commit-or-compensate against the account store, and replays attempts left
//! pending by a crash before it serves new requests.

pub mod coordinator;
pub mod config;
pub mod gateway;
pub mod metrics;
pub mod recovery;
pub mod state;
pub mod validation;

#[cfg(test)]
mod testing;

pub use coordinator::ExchangeCoordinator;
pub use config::{CoordinatorConfig, TelemetryConfig, TransferConfig};
pub use gateway::{Endpoint, SimulatedGateway, TransferError, TransferGateway};
pub use metrics::{Metrics, NoopTelemetry, StatsdSink, TelemetryError, TelemetrySink};
pub use recovery::RecoveryReport;
pub use state::CoordinatorState;
