// =============================================================================
// Swing Detector — volatility-adaptive local extremes
// =============================================================================
//
// A swing high at index i is a high that clears every other high within
// +-L candles by at least a 0.1 % margin; mirrored for swing lows. The
// lookback L adapts to recent volatility: quiet tape narrows the window,
// violent tape widens it.
//
// The detector is deterministic and append-stable: swings found on a prefix
// remain swings after more candles arrive, because a candle only qualifies
// once both sides of its window exist.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::types::SwingKind;

/// Margin by which a swing must clear its neighbours (0.1 %).
const SWING_MARGIN: f64 = 0.001;

/// Bounds for the adaptive lookback.
const MIN_LOOKBACK: usize = 5;
const MAX_LOOKBACK: usize = 30;

/// Windows feeding the volatility ratio.
const ATR_PERIOD: usize = 14;
const MEAN_PRICE_PERIOD: usize = 20;

/// A confirmed local extreme. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub index: usize,
    pub price: f64,
    pub kind: SwingKind,
    pub timestamp: DateTime<Utc>,
}

/// Mean true range over the last `period` candle pairs.
///
/// Returns `None` with fewer than `period + 1` candles (each true range
/// needs the previous close).
fn average_true_range(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let start = candles.len() - period;
    let mut sum = 0.0;
    for i in start..candles.len() {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        sum += tr;
    }

    let atr = sum / period as f64;
    atr.is_finite().then_some(atr)
}

/// Mean typical price ((H+L+C)/3) over the last `period` candles.
fn mean_typical_price(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let start = candles.len() - period;
    let sum: f64 = candles[start..].iter().map(Candle::typical_price).sum();
    let mean = sum / period as f64;
    (mean.is_finite() && mean > 0.0).then_some(mean)
}

/// Derive the volatility-adapted lookback from a base of `base_lookback`.
///
/// `v_ratio = ATR(14) / meanTypicalPrice(20) * 100`; the base is halved
/// below 1 %, stretched by 1.5 above 3 %, and clamped to [5, 30]. With too
/// few candles to measure volatility the base is used unscaled.
pub fn adaptive_lookback(candles: &[Candle], base_lookback: usize) -> usize {
    let factor = match (
        average_true_range(candles, ATR_PERIOD),
        mean_typical_price(candles, MEAN_PRICE_PERIOD),
    ) {
        (Some(atr), Some(mean)) => {
            let v_ratio = atr / mean * 100.0;
            if v_ratio < 1.0 {
                0.5
            } else if v_ratio > 3.0 {
                1.5
            } else {
                1.0
            }
        }
        _ => 1.0,
    };

    ((base_lookback as f64 * factor).floor() as usize).clamp(MIN_LOOKBACK, MAX_LOOKBACK)
}

/// Detect swings with an explicit window. The window must already be the
/// adaptive one; [`detect_swings`] is the convenience entry point.
pub fn detect_with_lookback(candles: &[Candle], lookback: usize) -> Vec<SwingPoint> {
    let n = candles.len();
    let mut swings = Vec::new();

    if lookback == 0 || n < 2 * lookback + 1 {
        return swings;
    }

    for i in lookback..=(n - 1 - lookback) {
        let high = candles[i].high;
        let low = candles[i].low;

        let mut is_high = true;
        let mut is_low = true;
        for j in (i - lookback)..=(i + lookback) {
            if j == i {
                continue;
            }
            if high <= candles[j].high * (1.0 + SWING_MARGIN) {
                is_high = false;
            }
            if low >= candles[j].low * (1.0 - SWING_MARGIN) {
                is_low = false;
            }
            if !is_high && !is_low {
                break;
            }
        }

        if is_high {
            swings.push(SwingPoint {
                index: i,
                price: high,
                kind: SwingKind::High,
                timestamp: candles[i].timestamp,
            });
        }
        if is_low {
            swings.push(SwingPoint {
                index: i,
                price: low,
                kind: SwingKind::Low,
                timestamp: candles[i].timestamp,
            });
        }
    }

    swings
}

/// Detect swing highs and lows over `candles`, sorted by index ascending.
pub fn detect_swings(candles: &[Candle], base_lookback: usize) -> Vec<SwingPoint> {
    detect_with_lookback(candles, adaptive_lookback(candles, base_lookback))
}
