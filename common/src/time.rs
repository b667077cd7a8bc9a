//! Time utilities and engine constants.

use chrono::{DateTime, TimeZone, Utc};

/// Engine constants.
pub mod constants {
    /// Maximum number of entries retained in the completed-exchange log.
    pub const EXCHANGE_LOG_CAPACITY: usize = 10_000;

    /// Default number of entries returned when reading the completed log.
    pub const EXCHANGE_LOG_READ_LIMIT: usize = 1_000;

    /// Decimal places kept on a derived reciprocal rate.
    pub const RECIPROCAL_RATE_DP: u32 = 5;

    /// Simulated transfer latency lower bound (milliseconds).
    pub const TRANSFER_MIN_LATENCY_MS: u64 = 200;

    /// Simulated transfer latency upper bound (milliseconds).
    pub const TRANSFER_MAX_LATENCY_MS: u64 = 400;
}

/// Current time as Unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert Unix milliseconds back into a UTC timestamp.
///
/// Out-of-range values collapse to the Unix epoch.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}
