//! arVault Common Types
//!
//! Shared types for the arVault exchange engine: identifiers, currencies,
//! the exchange request/result records and the error taxonomy surfaced to callers.

pub mod identifiers;
pub mod monetary;
pub mod exchange;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use exchange::*;
pub use error::*;
pub use time::*;
