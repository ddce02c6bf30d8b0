// =============================================================================
// Batch Aggregator — cross-timeframe signal assembly
// =============================================================================
//
// Runs the per-timeframe analyzer over every configured timeframe of one
// instrument and folds the snapshots into a single InstrumentSignal:
// which timeframes agree, how close price sits to the latest break, and the
// structure read from the most confident timeframe.
//
// Instruments with fewer than min_matching_timeframes valid signals are not
// publishable and yield None.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::timeframe::{analyze, StructureSnapshot};
use crate::analysis::AnalysisParams;
use crate::errors::InvalidCandleError;
use crate::market_data::Candle;
use crate::types::{Structure, Timeframe};

/// Proximity reported for a timeframe with no structure event. Far beyond
/// any real percentage so band filters never match it.
pub const PROXIMITY_FAR_SENTINEL: f64 = 999.0;

/// One timeframe's contribution to an instrument signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeEntry {
    pub timeframe: Timeframe,
    pub snapshot: StructureSnapshot,
    pub has_valid_signal: bool,
    /// Distance of current price to the last break price, percent of price.
    pub proximity_pct: f64,
}

/// Cross-timeframe view of one instrument. A value type: the store and the
/// alert pipeline copy it freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSignal {
    pub symbol: String,
    pub current_price: f64,
    /// Entries ranked by confidence descending.
    pub timeframes: Vec<TimeframeEntry>,
    pub matching_timeframes: usize,
    pub overall_structure: Structure,
    pub latest_event: Option<String>,
    pub total_fvgs: usize,
    pub avg_proximity_pct: f64,
    pub mean_confidence: f64,
    pub updated_at: DateTime<Utc>,
    /// Set on reads when the record has outlived the freshness horizon.
    pub stale: bool,
}

/// Analyse every timeframe window and assemble the instrument signal.
///
/// `windows` pairs each timeframe with its fetched candles. Returns
/// `Ok(None)` when too few timeframes carry a valid signal.
pub fn aggregate(
    symbol: &str,
    current_price: f64,
    windows: Vec<(Timeframe, Vec<Candle>)>,
    params: &AnalysisParams,
    min_matches: usize,
) -> Result<Option<InstrumentSignal>, InvalidCandleError> {
    let mut snapshots = Vec::with_capacity(windows.len());
    for (timeframe, candles) in windows {
        let snapshot = analyze(symbol, timeframe, candles, params)?;
        snapshots.push((timeframe, snapshot));
    }
    Ok(assemble(symbol, current_price, snapshots, min_matches))
}

/// Fold per-timeframe snapshots into an InstrumentSignal. Pure; exposed
/// separately so the cross-timeframe rules are testable without candles.
pub fn assemble(
    symbol: &str,
    current_price: f64,
    snapshots: Vec<(Timeframe, StructureSnapshot)>,
    min_matches: usize,
) -> Option<InstrumentSignal> {
    let mut entries: Vec<TimeframeEntry> = snapshots
        .into_iter()
        .map(|(timeframe, snapshot)| {
            let proximity_pct = match (&snapshot.last_event, current_price > 0.0) {
                (Some(event), true) => {
                    (current_price - event.break_price).abs() / current_price * 100.0
                }
                _ => PROXIMITY_FAR_SENTINEL,
            };
            let has_valid_signal = !snapshot.current_structure.is_neutral()
                && snapshot.last_event.is_some()
                && snapshot.confidence > 50.0;
            TimeframeEntry {
                timeframe,
                snapshot,
                has_valid_signal,
                proximity_pct,
            }
        })
        .collect();

    // Rank by confidence; stable sort keeps the faster timeframe first on
    // ties.
    entries.sort_by(|a, b| {
        b.snapshot
            .confidence
            .partial_cmp(&a.snapshot.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let matching_timeframes = entries.iter().filter(|e| e.has_valid_signal).count();
    if matching_timeframes < min_matches {
        debug!(
            symbol,
            matching_timeframes, min_matches, "instrument below alignment floor"
        );
        return None;
    }

    let top = entries
        .iter()
        .find(|e| e.has_valid_signal)
        .expect("matching_timeframes >= min_matches >= 1");

    let overall_structure = top.snapshot.current_structure;
    let latest_event = top
        .snapshot
        .last_event
        .as_ref()
        .map(|e| format!("{} ({})", e.describe(), top.timeframe));

    let valid: Vec<&TimeframeEntry> =
        entries.iter().filter(|e| e.has_valid_signal).collect();
    let mean_confidence =
        valid.iter().map(|e| e.snapshot.confidence).sum::<f64>() / valid.len() as f64;
    let avg_proximity_pct =
        valid.iter().map(|e| e.proximity_pct).sum::<f64>() / valid.len() as f64;

    let total_fvgs = entries.iter().map(|e| e.snapshot.active_fvgs.len()).sum();

    Some(InstrumentSignal {
        symbol: symbol.to_string(),
        current_price,
        timeframes: entries,
        matching_timeframes,
        overall_structure,
        latest_event,
        total_fvgs,
        avg_proximity_pct,
        mean_confidence,
        updated_at: Utc::now(),
        stale: false,
    })
}

/// Batch ordering: strongest alignment first, confidence breaks ties.
pub fn sort_batch(signals: &mut [InstrumentSignal]) {
    signals.sort_by(|a, b| {
        b.matching_timeframes
            .cmp(&a.matching_timeframes)
            .then_with(|| {
                b.mean_confidence
                    .partial_cmp(&a.mean_confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });
}
