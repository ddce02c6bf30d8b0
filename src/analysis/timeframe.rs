// =============================================================================
// Per-Timeframe Analyzer — one candle window in, one snapshot out
// =============================================================================
//
// Composes the swing detector, the structure state machine, and the FVG
// tracker. Pure function of its inputs; it owns no state across calls, so
// concurrent invocations for different symbols never interfere.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::fvg::{self, FairValueGap};
use crate::analysis::structure::{self, StructureEvent};
use crate::analysis::swings;
use crate::analysis::AnalysisParams;
use crate::errors::InvalidCandleError;
use crate::market_data::{sanitize_series, Candle};
use crate::types::{Structure, Timeframe};

/// Structural interpretation of a single (symbol, timeframe) window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureSnapshot {
    pub current_structure: Structure,
    pub last_event: Option<StructureEvent>,
    /// Newest unmitigated gaps, capped at five, timestamp descending.
    pub active_fvgs: Vec<FairValueGap>,
    /// Mitigated gaps still inside the tracking horizon.
    pub mitigated_fvgs: Vec<FairValueGap>,
    pub trend_strength: f64,
    pub confidence: f64,
}

impl StructureSnapshot {
    /// The default snapshot for windows too short to analyse.
    pub fn neutral() -> Self {
        Self {
            current_structure: Structure::Neutral,
            last_event: None,
            active_fvgs: Vec::new(),
            mitigated_fvgs: Vec::new(),
            trend_strength: 0.0,
            confidence: 0.0,
        }
    }
}

/// Analyse one candle window.
///
/// Fewer than `swing_lookback + 3` candles yields the neutral default.
/// Inverted OHLC anywhere aborts with `InvalidCandleError`; candles with
/// non-advancing timestamps are dropped before analysis.
pub fn analyze(
    symbol: &str,
    timeframe: Timeframe,
    candles: Vec<Candle>,
    params: &AnalysisParams,
) -> Result<StructureSnapshot, InvalidCandleError> {
    let candles = sanitize_series(symbol, timeframe, candles)?;

    if candles.len() < params.swing_lookback + 3 {
        debug!(
            symbol,
            timeframe = %timeframe,
            count = candles.len(),
            "insufficient candles, returning neutral snapshot"
        );
        return Ok(StructureSnapshot::neutral());
    }

    let lookback = swings::adaptive_lookback(&candles, params.swing_lookback);
    let swing_points = swings::detect_with_lookback(&candles, lookback);
    let events = structure::run(&candles, &swing_points, lookback, params);
    let gaps = fvg::track(&candles, &events, params);

    let snapshot = StructureSnapshot {
        current_structure: structure::current_structure(&events),
        last_event: events.last().cloned(),
        active_fvgs: fvg::active_gaps(&gaps),
        mitigated_fvgs: fvg::mitigated_gaps(&gaps),
        trend_strength: structure::trend_strength(&candles),
        confidence: structure::confidence(&events),
    };

    debug!(
        symbol,
        timeframe = %timeframe,
        structure = %snapshot.current_structure,
        events = events.len(),
        swings = swing_points.len(),
        active_fvgs = snapshot.active_fvgs.len(),
        "timeframe analysed"
    );

    Ok(snapshot)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: Utc.timestamp_opt(i as i64 * 300, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    /// Quiet tape, one swing high at 20, a breakout close at 40.
    fn breakout_series() -> Vec<Candle> {
        (0..48)
            .map(|i| match i {
                20 => candle(20, 100.0, 105.0, 99.75, 100.2),
                40 => candle(40, 100.0, 106.0, 99.9, 105.8),
                i if i > 40 => candle(i, 105.8, 106.0, 105.6, 105.9),
                i => candle(i, 100.0, 100.25, 99.75, 100.0),
            })
            .collect()
    }

    #[test]
    fn short_window_is_neutral() {
        let candles: Vec<Candle> = (0..10).map(|i| candle(i, 100.0, 100.5, 99.5, 100.0)).collect();
        let snapshot =
            analyze("NIFTY50", Timeframe::M5, candles, &AnalysisParams::default()).unwrap();
        assert_eq!(snapshot, StructureSnapshot::neutral());
    }

    #[test]
    fn breakout_yields_bullish_snapshot() {
        let snapshot = analyze(
            "NIFTY50",
            Timeframe::M5,
            breakout_series(),
            &AnalysisParams::default(),
        )
        .unwrap();

        assert_eq!(snapshot.current_structure, Structure::Bullish);
        let event = snapshot.last_event.expect("breakout must emit an event");
        assert_eq!(event.broken_level, 105.0);
        assert_eq!(event.index, 40);
        assert!(snapshot.confidence > 50.0);
    }

    #[test]
    fn analyzer_is_deterministic() {
        let params = AnalysisParams::default();
        let a = analyze("NIFTY50", Timeframe::M15, breakout_series(), &params).unwrap();
        let b = analyze("NIFTY50", Timeframe::M15, breakout_series(), &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn inverted_ohlc_aborts() {
        let mut candles = breakout_series();
        candles[25].high = candles[25].low - 1.0;
        let result = analyze(
            "NIFTY50",
            Timeframe::M5,
            candles,
            &AnalysisParams::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn non_monotonic_candles_are_dropped_not_fatal() {
        let mut candles = breakout_series();
        // Duplicate timestamp in the flat prefix: dropped, analysis proceeds.
        candles[10].timestamp = candles[9].timestamp;
        let snapshot = analyze(
            "NIFTY50",
            Timeframe::M5,
            candles,
            &AnalysisParams::default(),
        )
        .unwrap();
        assert_eq!(snapshot.current_structure, Structure::Bullish);
    }
}
