// =============================================================================
// Mock Provider — deterministic candle synthesis for demos and tests
// =============================================================================
//
// Two modes:
//   * Synthesised: a staircase wave derived purely from the symbol name, the
//     timeframe, and the candle index. No RNG anywhere; two runs over the
//     same inputs produce identical series.
//   * Canned: tests insert explicit series per (symbol, timeframe) and the
//     provider replays them.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::RwLock;

use crate::errors::CandleSourceError;
use crate::market_data::{Candle, CandleKey, CandleProvider, Quote};
use crate::types::Timeframe;

/// Candles per wave: fourteen up, twelve down at half pace, net up. The
/// pullback outlasts the quiet-tape swing lookback so every wave top
/// confirms as a swing high that the next wave then breaks.
const WAVE_LEN: usize = 26;
const WAVE_UP: usize = 14;

/// Fixed anchor for synthesised series so repeated fetches line up.
/// 2024-01-01T00:00:00Z.
const ANCHOR_SECS: i64 = 1_704_067_200;

pub struct MockProvider {
    canned: RwLock<HashMap<CandleKey, Vec<Candle>>>,
    quotes: RwLock<HashMap<String, Quote>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            canned: RwLock::new(HashMap::new()),
            quotes: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the series returned for `(symbol, timeframe)`.
    pub fn insert_series(&self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        self.canned.write().insert(
            CandleKey {
                symbol: symbol.to_string(),
                timeframe,
            },
            candles,
        );
    }

    /// Replace the quote returned for `symbol`.
    pub fn insert_quote(&self, symbol: &str, quote: Quote) {
        self.quotes.write().insert(symbol.to_string(), quote);
    }

    /// FNV-1a over the symbol name. Stable across runs and platforms.
    fn symbol_seed(symbol: &str) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in symbol.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }

    /// Base price for a symbol, spread over a plausible range.
    fn base_price(symbol: &str) -> f64 {
        100.0 + (Self::symbol_seed(symbol) % 20_000) as f64
    }

    /// Synthesise `count` candles ending at the fixed anchor.
    ///
    /// The shape is a rising staircase of waves with enough pullback to
    /// carve out a confirmed swing high per wave on every timeframe.
    fn synthesise(symbol: &str, timeframe: Timeframe, count: usize) -> Vec<Candle> {
        let base = Self::base_price(symbol);
        let step = base * 0.002;
        let interval = ChronoDuration::from_std(timeframe.interval()).expect("interval fits");
        let anchor: DateTime<Utc> = Utc.timestamp_opt(ANCHOR_SECS, 0).unwrap();
        let start = anchor - interval * count as i32;

        (0..count)
            .map(|i| {
                let wave = i / WAVE_LEN;
                let pos = i % WAVE_LEN;

                let wave_base = base + wave as f64 * step * WAVE_UP as f64;
                let price = if pos < WAVE_UP {
                    wave_base + pos as f64 * step
                } else {
                    let peak = wave_base + (WAVE_UP - 1) as f64 * step;
                    peak - (pos - WAVE_UP + 1) as f64 * step * 0.5
                };

                let rising = pos < WAVE_UP;
                let (open, close) = if rising {
                    (price - step * 0.4, price + step * 0.4)
                } else {
                    (price + step * 0.3, price - step * 0.3)
                };

                Candle {
                    timestamp: start + interval * i as i32,
                    open,
                    high: open.max(close) + step * 0.2,
                    low: open.min(close) - step * 0.2,
                    close,
                    volume: 1_000.0 + (pos as f64) * 25.0,
                }
            })
            .collect()
    }
}

#[async_trait]
impl CandleProvider for MockProvider {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback: usize,
    ) -> Result<Vec<Candle>, CandleSourceError> {
        let key = CandleKey {
            symbol: symbol.to_string(),
            timeframe,
        };
        if let Some(series) = self.canned.read().get(&key) {
            let start = series.len().saturating_sub(lookback);
            return Ok(series[start..].to_vec());
        }
        Ok(Self::synthesise(symbol, timeframe, lookback))
    }

    async fn latest_quote(&self, symbol: &str) -> Result<Quote, CandleSourceError> {
        if let Some(quote) = self.quotes.read().get(symbol) {
            return Ok(quote.clone());
        }

        // Derive the quote from the fastest canned or synthesised series so
        // quote and candles agree.
        let candles = self.fetch_candles(symbol, Timeframe::M5, 2).await?;
        let last = candles
            .last()
            .ok_or_else(|| CandleSourceError::Invalid("empty mock series".into()))?;
        let prev_close = candles.first().map(|c| c.close).unwrap_or(last.close);
        let change_pct = if prev_close > 0.0 {
            (last.close - prev_close) / prev_close * 100.0
        } else {
            0.0
        };

        Ok(Quote {
            price: last.close,
            change_pct,
            timestamp: last.timestamp,
        })
    }

    fn is_ready(&self) -> bool {
        true
    }
}
