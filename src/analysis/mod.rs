// =============================================================================
// Analysis — pure, side-effect-free market-structure pipeline
// =============================================================================
//
// swings     -> adaptive-lookback swing extremes
// structure  -> BOS / CHOCH state machine over swings and closes
// fvg        -> three-candle imbalance tracking with mitigation
// timeframe  -> composes the three into a StructureSnapshot
//
// Everything in this tree is a deterministic function of its candle input.
// Nothing here suspends, allocates shared state, or mutates its arguments.

pub mod fvg;
pub mod structure;
pub mod swings;
pub mod timeframe;

pub use fvg::FairValueGap;
pub use structure::StructureEvent;
pub use swings::SwingPoint;
pub use timeframe::StructureSnapshot;

use crate::scan_config::ScanConfig;

/// Tunables consumed by the analysis pipeline. Extracted from [`ScanConfig`]
/// so the pure code can be exercised without a full engine config.
#[derive(Debug, Clone)]
pub struct AnalysisParams {
    pub swing_lookback: usize,
    pub bos_threshold_pct: f64,
    pub choch_threshold_pct: f64,
    pub min_structure_distance_pct: f64,
    pub structure_lock_bars: usize,
    pub min_fvg_size_pct: f64,
    pub fvg_prune_bars: usize,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            swing_lookback: 20,
            bos_threshold_pct: 0.3,
            choch_threshold_pct: 0.5,
            min_structure_distance_pct: 1.0,
            structure_lock_bars: 5,
            min_fvg_size_pct: 0.2,
            fvg_prune_bars: 50,
        }
    }
}

impl From<&ScanConfig> for AnalysisParams {
    fn from(config: &ScanConfig) -> Self {
        Self {
            swing_lookback: config.swing_lookback,
            bos_threshold_pct: config.bos_threshold_pct,
            choch_threshold_pct: config.choch_threshold_pct,
            min_structure_distance_pct: config.min_structure_distance_pct,
            structure_lock_bars: config.structure_lock_bars,
            min_fvg_size_pct: config.min_fvg_size_pct,
            fvg_prune_bars: config.fvg_prune_bars,
        }
    }
}
