// =============================================================================
// Error taxonomy
// =============================================================================
//
// Typed errors for the failure classes the engine distinguishes at runtime:
//
//   ConfigError        — fatal at startup, exit code 64.
//   CandleSourceError  — per-symbol; Transient retries with backoff, Auth is
//                        surfaced to operators and marks snapshots stale.
//   InvalidCandleError — aborts the symbol's current tick only.
//
// Infrastructure code (HTTP client, config file IO) uses anyhow with context
// at the edges; these enums are the contract between subsystems.
// =============================================================================

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Process exit code for a clean shutdown.
pub const EXIT_OK: u8 = 0;
/// Process exit code for invalid configuration.
pub const EXIT_CONFIG: u8 = 64;
/// Process exit code when the candle provider requires authentication.
pub const EXIT_AUTH: u8 = 69;
/// Process exit code for an unexpected internal error.
pub const EXIT_INTERNAL: u8 = 70;

/// Invalid startup configuration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("unknown timeframe token '{0}'")]
    UnknownTimeframe(String),

    #[error("no symbols configured")]
    NoSymbols,
}

/// Failure fetching candles or quotes from a provider.
#[derive(Debug, Error)]
pub enum CandleSourceError {
    /// Network error, timeout, or 5xx. Retried with backoff.
    #[error("transient candle source failure: {0}")]
    Transient(String),

    /// The provider session is missing or expired. Not retried; the
    /// affected symbol keeps serving its last snapshot marked stale.
    #[error("authentication required: {0}")]
    Auth(String),

    /// The provider returned a payload the adapter could not interpret.
    #[error("invalid candle source payload: {0}")]
    Invalid(String),
}

impl CandleSourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CandleSourceError::Transient(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, CandleSourceError::Auth(_))
    }
}

/// A candle with inverted OHLC bounds. The symbol's current tick is aborted;
/// analyzer state is unaffected because analysis is pure per invocation.
#[derive(Debug, Error)]
#[error("inverted OHLC at {timestamp}: open={open} high={high} low={low} close={close}")]
pub struct InvalidCandleError {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}
