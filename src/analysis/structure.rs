// =============================================================================
// Structure State Machine — BOS / CHOCH detection with hysteresis
// =============================================================================
//
// Walks the candle series once, carrying three pieces of state between
// candles: the bar until which emission is locked, and the most recent
// active bullish / bearish break. A swing is consumed the moment it is
// broken and never re-fires.
//
// Emission rules per candle (first match wins, CHOCH before BOS because a
// regime change outranks a continuation):
//   CHOCH  — close clears the opposing swing by choch_threshold_pct while
//            an opposite-direction break is active; clears that break.
//   BOS    — close clears the last swing extreme by bos_threshold_pct.
// Both require the break to sit at least min_structure_distance_pct away
// from the active opposite break, and both lock emission for
// structure_lock_bars bars.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::swings::SwingPoint;
use crate::analysis::AnalysisParams;
use crate::market_data::Candle;
use crate::types::{Direction, EventKind, Significance, Structure, SwingKind};

/// Break-of-structure or change-of-character event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureEvent {
    pub kind: EventKind,
    pub direction: Direction,
    pub break_price: f64,
    pub broken_level: f64,
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub significance: Significance,
}

impl StructureEvent {
    /// Major iff the break cleared the level by at least 1 %.
    fn significance_for(break_price: f64, broken_level: f64) -> Significance {
        if broken_level > 0.0 && ((break_price - broken_level).abs() / broken_level) >= 0.01 {
            Significance::Major
        } else {
            Significance::Minor
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "{} {} @ {:.2} (level {:.2})",
            self.kind, self.direction, self.break_price, self.broken_level
        )
    }
}

/// Hysteresis state carried across candles. A plain record; `run` owns one
/// per invocation and nothing outlives the call.
#[derive(Debug, Default)]
struct MachineState {
    lock_until: usize,
    active_bullish: Option<StructureEvent>,
    active_bearish: Option<StructureEvent>,
}

impl MachineState {
    fn active_opposite(&self, direction: Direction) -> Option<&StructureEvent> {
        match direction {
            Direction::Bullish => self.active_bearish.as_ref(),
            Direction::Bearish => self.active_bullish.as_ref(),
        }
    }

    /// Distance hysteresis: the new break must land at least
    /// `min_distance_pct` of the broken level away from the active opposite
    /// break. Passes trivially when no opposite break is active.
    fn distance_ok(
        &self,
        direction: Direction,
        close: f64,
        broken_level: f64,
        min_distance_pct: f64,
    ) -> bool {
        match self.active_opposite(direction) {
            Some(opposite) => {
                (close - opposite.break_price).abs() > broken_level * min_distance_pct / 100.0
            }
            None => true,
        }
    }

    fn record(&mut self, event: &StructureEvent, lock_bars: usize) {
        self.lock_until = event.index + lock_bars;
        match event.direction {
            Direction::Bullish => {
                self.active_bullish = Some(event.clone());
                if event.kind == EventKind::Choch {
                    self.active_bearish = None;
                }
            }
            Direction::Bearish => {
                self.active_bearish = Some(event.clone());
                if event.kind == EventKind::Choch {
                    self.active_bullish = None;
                }
            }
        }
    }
}

/// Run the state machine over `candles` given the detected `swings` and the
/// lookback that produced them. Returns events in chronological order.
pub fn run(
    candles: &[Candle],
    swings: &[SwingPoint],
    lookback: usize,
    params: &AnalysisParams,
) -> Vec<StructureEvent> {
    let mut state = MachineState::default();
    let mut broken = vec![false; swings.len()];
    let mut events = Vec::new();

    let start = lookback.max(1);
    for (i, candle) in candles.iter().enumerate().skip(start) {
        if i < state.lock_until {
            continue;
        }

        let close = candle.close;
        let last_high = last_unbroken(swings, &broken, i, SwingKind::High);
        let last_low = last_unbroken(swings, &broken, i, SwingKind::Low);

        let choch = params.choch_threshold_pct / 100.0;
        let bos = params.bos_threshold_pct / 100.0;
        let min_distance = params.min_structure_distance_pct;

        let bullish_choch = last_high.and_then(|pos| {
            let level = swings[pos].price;
            (state.active_bearish.is_some()
                && close > level * (1.0 + choch)
                && state.distance_ok(Direction::Bullish, close, level, min_distance))
            .then_some((pos, EventKind::Choch, Direction::Bullish))
        });
        let bearish_choch = last_low.and_then(|pos| {
            let level = swings[pos].price;
            (state.active_bullish.is_some()
                && close < level * (1.0 - choch)
                && state.distance_ok(Direction::Bearish, close, level, min_distance))
            .then_some((pos, EventKind::Choch, Direction::Bearish))
        });
        let bullish_bos = last_high.and_then(|pos| {
            let level = swings[pos].price;
            (close > level * (1.0 + bos)
                && state.distance_ok(Direction::Bullish, close, level, min_distance))
            .then_some((pos, EventKind::Bos, Direction::Bullish))
        });
        let bearish_bos = last_low.and_then(|pos| {
            let level = swings[pos].price;
            (close < level * (1.0 - bos)
                && state.distance_ok(Direction::Bearish, close, level, min_distance))
            .then_some((pos, EventKind::Bos, Direction::Bearish))
        });

        let candidate = bullish_choch
            .or(bearish_choch)
            .or(bullish_bos)
            .or(bearish_bos);

        if let Some((swing_pos, kind, direction)) = candidate {
            let level = swings[swing_pos].price;
            let event = StructureEvent {
                kind,
                direction,
                break_price: close,
                broken_level: level,
                index: i,
                timestamp: candle.timestamp,
                significance: StructureEvent::significance_for(close, level),
            };
            broken[swing_pos] = true;
            state.record(&event, params.structure_lock_bars);
            events.push(event);
        }
    }

    events
}

/// Position of the most recent unbroken swing of `kind` before candle `i`.
fn last_unbroken(
    swings: &[SwingPoint],
    broken: &[bool],
    i: usize,
    kind: SwingKind,
) -> Option<usize> {
    swings
        .iter()
        .enumerate()
        .rev()
        .find(|(pos, s)| s.kind == kind && s.index < i && !broken[*pos])
        .map(|(pos, _)| pos)
}

/// Current structural interpretation: the latest event decides.
pub fn current_structure(events: &[StructureEvent]) -> Structure {
    match events.last() {
        None => Structure::Neutral,
        Some(event) => match (event.kind, event.direction) {
            (EventKind::Bos, Direction::Bullish) => Structure::Bullish,
            (EventKind::Bos, Direction::Bearish) => Structure::Bearish,
            (EventKind::Choch, Direction::Bullish) => Structure::BullishChoch,
            (EventKind::Choch, Direction::Bearish) => Structure::BearishChoch,
        },
    }
}

/// Confidence in the current interpretation, derived from the last five
/// events: event density, major breaks, and directional agreement with the
/// latest event.
pub fn confidence(events: &[StructureEvent]) -> f64 {
    let Some(latest) = events.last() else {
        return 0.0;
    };

    let last5 = &events[events.len().saturating_sub(5)..];
    let n = last5.len() as f64;
    let majors = last5
        .iter()
        .filter(|e| e.significance == Significance::Major)
        .count() as f64;
    let same_direction = last5
        .iter()
        .filter(|e| e.direction == latest.direction)
        .count() as f64;

    (50.0 + 10.0 * n + 15.0 * majors + 20.0 * (same_direction / n)).clamp(0.0, 100.0)
}

/// Trend strength over the last 20 candles: share of bullish closes plus a
/// body-size kicker.
pub fn trend_strength(candles: &[Candle]) -> f64 {
    const WINDOW: usize = 20;

    if candles.is_empty() {
        return 0.0;
    }

    let start = candles.len().saturating_sub(WINDOW);
    let window = &candles[start..];
    let count = window.len() as f64;

    let bullish_pct = window.iter().filter(|c| c.is_bullish()).count() as f64 / count * 100.0;
    let avg_body: f64 = window.iter().map(Candle::body).sum::<f64>() / count;
    let last_close = window.last().map(|c| c.close).unwrap_or(0.0);

    if last_close <= 0.0 {
        return bullish_pct.clamp(0.0, 100.0);
    }

    (bullish_pct + 5.0 * (avg_body / last_close * 100.0)).clamp(0.0, 100.0)
}
