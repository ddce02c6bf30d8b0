// =============================================================================
// Candle Provider — the seam between the engine and any market-data source
// =============================================================================
//
// The scanner never assumes which concrete source feeds it. The live broker
// and the deterministic mock both implement this trait; tests inject canned
// series through the mock.
// =============================================================================

use async_trait::async_trait;

use crate::errors::CandleSourceError;
use crate::market_data::{Candle, Quote};
use crate::types::Timeframe;

/// An ordered, finite candle source for a universe of instruments.
///
/// Implementations must return candles sorted by timestamp ascending and
/// contiguous at the requested timeframe's interval.
#[async_trait]
pub trait CandleProvider: Send + Sync {
    /// Fetch up to `lookback` most recent candles for `(symbol, timeframe)`,
    /// oldest first.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback: usize,
    ) -> Result<Vec<Candle>, CandleSourceError>;

    /// Latest traded price and day change for `symbol`.
    async fn latest_quote(&self, symbol: &str) -> Result<Quote, CandleSourceError>;

    /// Whether the provider holds a usable session. A provider that returns
    /// `false` here will fail every fetch with an Auth error.
    fn is_ready(&self) -> bool;
}
