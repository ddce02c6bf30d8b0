// =============================================================================
// Market Data — candle model and provider implementations
// =============================================================================

pub mod broker;
pub mod mock;
pub mod provider;

pub use broker::BrokerClient;
pub use mock::MockProvider;
pub use provider::CandleProvider;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::InvalidCandleError;
use crate::types::Timeframe;

/// A single OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// (high + low + close) / 3 — used by the volatility-adaptive lookback.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Check the OHLC invariant: `low <= min(open, close)` and
    /// `max(open, close) <= high`, all values finite, volume non-negative.
    pub fn validate(&self) -> Result<(), InvalidCandleError> {
        let finite = self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite();

        let ordered = self.low <= self.open.min(self.close)
            && self.open.max(self.close) <= self.high
            && self.volume >= 0.0;

        if finite && ordered {
            Ok(())
        } else {
            Err(InvalidCandleError {
                timestamp: self.timestamp,
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            })
        }
    }
}

/// Latest traded price for an instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub change_pct: f64,
    pub timestamp: DateTime<Utc>,
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// Validate a fetched series before analysis.
///
/// Inverted OHLC anywhere is an error (the symbol's tick is aborted).
/// Candles whose timestamp does not advance past the previous one are
/// dropped with a warning; the remainder is returned in order.
pub fn sanitize_series(
    symbol: &str,
    timeframe: Timeframe,
    candles: Vec<Candle>,
) -> Result<Vec<Candle>, InvalidCandleError> {
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    let mut dropped = 0usize;

    for candle in candles {
        candle.validate()?;
        match out.last() {
            Some(prev) if candle.timestamp <= prev.timestamp => {
                dropped += 1;
            }
            _ => out.push(candle),
        }
    }

    if dropped > 0 {
        warn!(
            symbol,
            timeframe = %timeframe,
            dropped,
            "dropped candles with non-monotonic timestamps"
        );
    }

    Ok(out)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(ts_secs: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn valid_candle_passes() {
        assert!(candle(0, 100.0, 105.0, 95.0, 102.0).validate().is_ok());
    }

    #[test]
    fn inverted_ohlc_fails() {
        // high below close
        assert!(candle(0, 100.0, 101.0, 95.0, 103.0).validate().is_err());
        // low above open
        assert!(candle(0, 94.0, 105.0, 95.0, 102.0).validate().is_err());
    }

    #[test]
    fn nan_fails() {
        let mut c = candle(0, 100.0, 105.0, 95.0, 102.0);
        c.high = f64::NAN;
        assert!(c.validate().is_err());
    }

    #[test]
    fn negative_volume_fails() {
        let mut c = candle(0, 100.0, 105.0, 95.0, 102.0);
        c.volume = -1.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn sanitize_drops_non_monotonic() {
        let series = vec![
            candle(0, 100.0, 105.0, 95.0, 102.0),
            candle(300, 102.0, 106.0, 100.0, 104.0),
            candle(300, 104.0, 107.0, 101.0, 105.0), // duplicate timestamp
            candle(150, 104.0, 107.0, 101.0, 105.0), // goes backwards
            candle(600, 104.0, 108.0, 102.0, 106.0),
        ];
        let out = sanitize_series("NIFTY50", Timeframe::M5, series).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn sanitize_propagates_inverted_ohlc() {
        let series = vec![
            candle(0, 100.0, 105.0, 95.0, 102.0),
            candle(300, 102.0, 101.0, 100.0, 104.0),
        ];
        assert!(sanitize_series("NIFTY50", Timeframe::M5, series).is_err());
    }
}
