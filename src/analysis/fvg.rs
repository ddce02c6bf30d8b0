// =============================================================================
// Fair Value Gap Tracker — three-candle imbalances with mitigation
// =============================================================================
//
// A bullish FVG exists at i when high[i-2] < low[i]: the first and third
// candles' wicks never overlap, leaving a void between them. Bearish is the
// mirror image. Gaps below min_fvg_size_pct of the middle close are noise
// and rejected outright.
//
// Each gap carries a 0-100 quality score (size tier + structural context +
// recency) and a mitigation flag set the first time price trades back into
// the void. Mitigation is one-way. Gaps age out after fvg_prune_bars bars
// of the analysed timeframe, or earlier once their score decays below 20.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::structure::StructureEvent;
use crate::analysis::AnalysisParams;
use crate::market_data::Candle;
use crate::types::Direction;

/// Bars around a structure event within which a gap counts as structural.
const NEAR_STRUCTURE_BARS: usize = 3;

/// Quality floor below which a gap is pruned.
const MIN_QUALITY: f64 = 20.0;

/// Cap on the active set returned to consumers.
pub const MAX_ACTIVE_FVGS: usize = 5;

/// A tracked price imbalance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairValueGap {
    pub id: u64,
    pub direction: Direction,
    pub upper_bound: f64,
    pub lower_bound: f64,
    pub size_pct: f64,
    pub created_at: DateTime<Utc>,
    pub created_index: usize,
    pub mitigated: bool,
    pub mitigated_at: Option<DateTime<Utc>>,
    pub quality_score: f64,
    pub near_structure: bool,
}

impl FairValueGap {
    /// Stable identity across re-scans of the same series: the creation
    /// timestamp plus direction pins the gap even though ids are
    /// per-invocation.
    pub fn identity(&self) -> (Direction, DateTime<Utc>) {
        (self.direction, self.created_at)
    }
}

/// Size tier + structural context + recency, each banded.
fn quality_score(size_pct: f64, near_structure: bool, bars_since_creation: usize) -> f64 {
    let size = if size_pct >= 1.0 {
        40.0
    } else if size_pct >= 0.7 {
        30.0
    } else if size_pct >= 0.5 {
        20.0
    } else if size_pct >= 0.3 {
        10.0
    } else {
        0.0
    };

    let context = if near_structure { 30.0 } else { 0.0 };

    let recency = if bars_since_creation <= 5 {
        30.0
    } else if bars_since_creation <= 10 {
        20.0
    } else if bars_since_creation <= 20 {
        10.0
    } else {
        0.0
    };

    size + context + recency
}

/// Detect, score, mitigate, and prune gaps over the full window.
///
/// Pure per invocation: the caller re-runs this on every scan and the
/// result depends only on `candles`, `events`, and `params`.
pub fn track(
    candles: &[Candle],
    events: &[StructureEvent],
    params: &AnalysisParams,
) -> Vec<FairValueGap> {
    let n = candles.len();
    if n < 3 {
        return Vec::new();
    }
    let latest_index = n - 1;

    let mut gaps = Vec::new();
    let mut next_id: u64 = 0;

    for i in 2..n {
        let first = &candles[i - 2];
        let middle = &candles[i - 1];
        let third = &candles[i];

        let (direction, lower, upper) = if first.high < third.low {
            (Direction::Bullish, first.high, third.low)
        } else if first.low > third.high {
            (Direction::Bearish, third.high, first.low)
        } else {
            continue;
        };

        if middle.close <= 0.0 {
            continue;
        }
        let size_pct = (upper - lower) / middle.close * 100.0;
        if size_pct < params.min_fvg_size_pct {
            continue;
        }

        let near_structure = events
            .iter()
            .any(|e| e.index.abs_diff(i) <= NEAR_STRUCTURE_BARS);

        let bars_old = latest_index - i;
        if bars_old > params.fvg_prune_bars {
            continue;
        }

        let score = quality_score(size_pct, near_structure, bars_old);
        if score < MIN_QUALITY {
            continue;
        }

        // First candle trading back into the void mitigates the gap.
        let mut mitigated_at = None;
        for later in &candles[i + 1..] {
            let touched = match direction {
                Direction::Bullish => later.low <= lower,
                Direction::Bearish => later.high >= upper,
            };
            if touched {
                mitigated_at = Some(later.timestamp);
                break;
            }
        }

        gaps.push(FairValueGap {
            id: next_id,
            direction,
            upper_bound: upper,
            lower_bound: lower,
            size_pct,
            created_at: third.timestamp,
            created_index: i,
            mitigated: mitigated_at.is_some(),
            mitigated_at,
            quality_score: score,
            near_structure,
        });
        next_id += 1;
    }

    gaps
}

/// The newest unmitigated gaps, timestamp descending, capped at
/// [`MAX_ACTIVE_FVGS`].
pub fn active_gaps(gaps: &[FairValueGap]) -> Vec<FairValueGap> {
    let mut active: Vec<FairValueGap> =
        gaps.iter().filter(|g| !g.mitigated).cloned().collect();
    active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    active.truncate(MAX_ACTIVE_FVGS);
    active
}

/// Gaps that have been mitigated but not yet pruned. Feeds the
/// FVG_MITIGATED alert diff.
pub fn mitigated_gaps(gaps: &[FairValueGap]) -> Vec<FairValueGap> {
    gaps.iter().filter(|g| g.mitigated).cloned().collect()
}
