// =============================================================================
// Alert Generator — diffs consecutive snapshots into typed alerts
// =============================================================================
//
// Keeps the previously published InstrumentSignal per symbol and compares
// each store write against it:
//
//   BOS_ENTRY     price moved from outside the far band to inside the near
//                 band of the latest break.
//   BOS_BREAK     the top timeframe lost its structure, or its break
//                 flipped direction on a newer event.
//   TREND_CHANGE  overall structure changed and some timeframe printed a
//                 fresh CHOCH since the previous snapshot.
//   FVG_MITIGATED a gap that was active last snapshot is now mitigated.
//
// The same (symbol, kind) pair fires at most once per minute.
// =============================================================================

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::aggregator::InstrumentSignal;
use crate::alerts::Alert;
use crate::types::{AlertKind, AlertPriority, EventKind};

/// Suppression window for repeated (symbol, kind) emissions.
const DEDUP_WINDOW_SECS: i64 = 60;

pub struct AlertGenerator {
    previous: RwLock<HashMap<String, InstrumentSignal>>,
    last_emitted: RwLock<HashMap<(String, AlertKind), DateTime<Utc>>>,
    near_pct: f64,
    far_pct: f64,
}

impl AlertGenerator {
    pub fn new(near_pct: f64, far_pct: f64) -> Self {
        Self {
            previous: RwLock::new(HashMap::new()),
            last_emitted: RwLock::new(HashMap::new()),
            near_pct,
            far_pct,
        }
    }

    /// Diff `signal` against the previous snapshot for its symbol, record it
    /// as the new baseline, and return the deduplicated alerts.
    pub fn observe(&self, signal: &InstrumentSignal) -> Vec<Alert> {
        let mut raw = Vec::new();

        {
            let previous = self.previous.read();
            if let Some(prev) = previous.get(&signal.symbol) {
                self.diff_proximity(prev, signal, &mut raw);
                self.diff_top_break(prev, signal, &mut raw);
                self.diff_trend(prev, signal, &mut raw);
                self.diff_fvgs(prev, signal, &mut raw);
            }
        }

        self.previous
            .write()
            .insert(signal.symbol.clone(), signal.clone());

        raw.retain(|alert| self.dedup_allows(alert));
        raw
    }

    fn diff_proximity(
        &self,
        prev: &InstrumentSignal,
        new: &InstrumentSignal,
        out: &mut Vec<Alert>,
    ) {
        if prev.avg_proximity_pct > self.far_pct && new.avg_proximity_pct <= self.near_pct {
            out.push(Alert::new(
                &new.symbol,
                AlertKind::BosEntry,
                AlertPriority::High,
                format!(
                    "{} price entered the BOS zone (proximity {:.2}%, was {:.2}%)",
                    new.symbol, new.avg_proximity_pct, prev.avg_proximity_pct
                ),
            ));
        }
    }

    fn diff_top_break(
        &self,
        prev: &InstrumentSignal,
        new: &InstrumentSignal,
        out: &mut Vec<Alert>,
    ) {
        let Some(prev_top) = prev.timeframes.first() else {
            return;
        };
        let Some(new_entry) = new
            .timeframes
            .iter()
            .find(|e| e.timeframe == prev_top.timeframe)
        else {
            return;
        };

        let lost_structure = !prev_top.snapshot.current_structure.is_neutral()
            && new_entry.snapshot.current_structure.is_neutral();

        let flipped = match (
            &prev_top.snapshot.last_event,
            &new_entry.snapshot.last_event,
        ) {
            (Some(p), Some(n)) => n.timestamp > p.timestamp && n.direction != p.direction,
            _ => false,
        };

        if lost_structure || flipped {
            out.push(Alert::new(
                &new.symbol,
                AlertKind::BosBreak,
                AlertPriority::High,
                format!(
                    "{} structure break on {} invalidated",
                    new.symbol, prev_top.timeframe
                ),
            ));
        }
    }

    fn diff_trend(&self, prev: &InstrumentSignal, new: &InstrumentSignal, out: &mut Vec<Alert>) {
        if new.overall_structure == prev.overall_structure {
            return;
        }

        // Require a fresh CHOCH somewhere: a regime change without one is
        // just confidence reshuffling between timeframes.
        let choch_timeframe = new.timeframes.iter().find_map(|entry| {
            let event = entry.snapshot.last_event.as_ref()?;
            if event.kind != EventKind::Choch {
                return None;
            }
            let prev_ts = prev
                .timeframes
                .iter()
                .find(|p| p.timeframe == entry.timeframe)
                .and_then(|p| p.snapshot.last_event.as_ref())
                .map(|p| p.timestamp);
            match prev_ts {
                Some(ts) if event.timestamp <= ts => None,
                _ => Some(entry.timeframe),
            }
        });

        if let Some(timeframe) = choch_timeframe {
            out.push(Alert::new(
                &new.symbol,
                AlertKind::TrendChange,
                AlertPriority::Medium,
                format!(
                    "{} trend changed {} -> {} (CHOCH on {})",
                    new.symbol, prev.overall_structure, new.overall_structure, timeframe
                ),
            ));
        }
    }

    fn diff_fvgs(&self, prev: &InstrumentSignal, new: &InstrumentSignal, out: &mut Vec<Alert>) {
        for entry in &new.timeframes {
            let Some(prev_entry) = prev
                .timeframes
                .iter()
                .find(|p| p.timeframe == entry.timeframe)
            else {
                continue;
            };

            let previously_active: HashSet<_> = prev_entry
                .snapshot
                .active_fvgs
                .iter()
                .map(|g| g.identity())
                .collect();

            for gap in &entry.snapshot.mitigated_fvgs {
                if previously_active.contains(&gap.identity()) {
                    out.push(Alert::new(
                        &new.symbol,
                        AlertKind::FvgMitigated,
                        AlertPriority::Medium,
                        format!(
                            "{} {} FVG {:.2}-{:.2} mitigated on {}",
                            new.symbol,
                            gap.direction,
                            gap.lower_bound,
                            gap.upper_bound,
                            entry.timeframe
                        ),
                    ));
                }
            }
        }
    }

    /// One (symbol, kind) per minute. Records the emission when allowed.
    fn dedup_allows(&self, alert: &Alert) -> bool {
        let key = (alert.symbol.clone(), alert.kind);
        let mut last = self.last_emitted.write();

        if let Some(previous) = last.get(&key) {
            if alert.emitted_at.signed_duration_since(*previous)
                < Duration::seconds(DEDUP_WINDOW_SECS)
            {
                debug!(
                    symbol = %alert.symbol,
                    kind = %alert.kind,
                    "alert suppressed by dedup window"
                );
                return false;
            }
        }

        last.insert(key, alert.emitted_at);
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::assemble;
    use crate::analysis::fvg::FairValueGap;
    use crate::analysis::structure::StructureEvent;
    use crate::analysis::timeframe::StructureSnapshot;
    use crate::types::{Direction, Significance, Structure, Timeframe};
    use chrono::TimeZone;

    fn event(direction: Direction, kind: EventKind, ts_secs: i64) -> StructureEvent {
        StructureEvent {
            kind,
            direction,
            break_price: 100.0,
            broken_level: 99.5,
            index: 30,
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            significance: Significance::Minor,
        }
    }

    fn snapshot(direction: Direction, kind: EventKind, ts_secs: i64) -> StructureSnapshot {
        StructureSnapshot {
            current_structure: match (kind, direction) {
                (EventKind::Bos, Direction::Bullish) => Structure::Bullish,
                (EventKind::Bos, Direction::Bearish) => Structure::Bearish,
                (EventKind::Choch, Direction::Bullish) => Structure::BullishChoch,
                (EventKind::Choch, Direction::Bearish) => Structure::BearishChoch,
            },
            last_event: Some(event(direction, kind, ts_secs)),
            active_fvgs: Vec::new(),
            mitigated_fvgs: Vec::new(),
            trend_strength: 60.0,
            confidence: 80.0,
        }
    }

    fn bullish_signal(proximity: f64) -> InstrumentSignal {
        let snapshots = vec![
            (Timeframe::M5, snapshot(Direction::Bullish, EventKind::Bos, 1_000)),
            (Timeframe::M15, snapshot(Direction::Bullish, EventKind::Bos, 1_000)),
        ];
        let mut signal = assemble("NIFTY50", 100.0, snapshots, 2).unwrap();
        signal.avg_proximity_pct = proximity;
        signal
    }

    #[test]
    fn first_observation_is_silent() {
        let generator = AlertGenerator::new(2.0, 3.0);
        assert!(generator.observe(&bullish_signal(1.0)).is_empty());
    }

    /// Proximity 4.0 -> 1.5 with near=2, far=3 emits exactly one High
    /// BOS_ENTRY; the same transition inside the minute is silent.
    #[test]
    fn bos_entry_fires_once_per_minute() {
        let generator = AlertGenerator::new(2.0, 3.0);

        assert!(generator.observe(&bullish_signal(4.0)).is_empty());

        let alerts = generator.observe(&bullish_signal(1.5));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::BosEntry);
        assert_eq!(alerts[0].priority, AlertPriority::High);

        // Move away and back again immediately: suppressed by dedup.
        assert!(generator.observe(&bullish_signal(4.0)).is_empty());
        assert!(generator.observe(&bullish_signal(1.5)).is_empty());
    }

    #[test]
    fn partial_approach_does_not_fire() {
        let generator = AlertGenerator::new(2.0, 3.0);
        generator.observe(&bullish_signal(4.0));
        // 2.5 is inside far but not inside near.
        assert!(generator.observe(&bullish_signal(2.5)).is_empty());
        // Starting inside far also does not fire.
        assert!(generator.observe(&bullish_signal(1.5)).is_empty());
    }

    #[test]
    fn direction_flip_emits_bos_break() {
        let generator = AlertGenerator::new(2.0, 3.0);

        let before = assemble(
            "NIFTY50",
            100.0,
            vec![
                (Timeframe::M5, snapshot(Direction::Bullish, EventKind::Bos, 1_000)),
                (Timeframe::M15, snapshot(Direction::Bullish, EventKind::Bos, 1_000)),
            ],
            2,
        )
        .unwrap();

        let after = assemble(
            "NIFTY50",
            100.0,
            vec![
                (Timeframe::M5, snapshot(Direction::Bearish, EventKind::Bos, 2_000)),
                (Timeframe::M15, snapshot(Direction::Bullish, EventKind::Bos, 1_000)),
            ],
            2,
        )
        .unwrap();

        generator.observe(&before);
        let alerts = generator.observe(&after);
        assert!(alerts.iter().any(|a| a.kind == AlertKind::BosBreak));
        assert!(alerts
            .iter()
            .all(|a| a.kind != AlertKind::BosBreak || a.priority == AlertPriority::High));
    }

    #[test]
    fn trend_change_requires_fresh_choch() {
        let generator = AlertGenerator::new(2.0, 3.0);

        let before = assemble(
            "NIFTY50",
            100.0,
            vec![
                (Timeframe::M5, snapshot(Direction::Bullish, EventKind::Bos, 1_000)),
                (Timeframe::M15, snapshot(Direction::Bullish, EventKind::Bos, 1_000)),
            ],
            2,
        )
        .unwrap();

        // Overall flips to bearish via a newer CHOCH on 5m.
        let after = assemble(
            "NIFTY50",
            100.0,
            vec![
                (Timeframe::M5, snapshot(Direction::Bearish, EventKind::Choch, 2_000)),
                (Timeframe::M15, snapshot(Direction::Bullish, EventKind::Bos, 1_000)),
            ],
            2,
        )
        .unwrap();

        generator.observe(&before);
        let alerts = generator.observe(&after);
        let trend: Vec<&Alert> = alerts
            .iter()
            .filter(|a| a.kind == AlertKind::TrendChange)
            .collect();
        assert_eq!(trend.len(), 1);
        assert_eq!(trend[0].priority, AlertPriority::Medium);
        assert!(trend[0].message.contains("CHOCH"));
    }

    #[test]
    fn fvg_mitigation_is_reported_once() {
        let generator = AlertGenerator::new(2.0, 3.0);

        let gap = FairValueGap {
            id: 0,
            direction: Direction::Bullish,
            upper_bound: 100.0,
            lower_bound: 99.0,
            size_pct: 1.0,
            created_at: Utc.timestamp_opt(500, 0).unwrap(),
            created_index: 10,
            mitigated: false,
            mitigated_at: None,
            quality_score: 70.0,
            near_structure: false,
        };

        let mut before_snapshot = snapshot(Direction::Bullish, EventKind::Bos, 1_000);
        before_snapshot.active_fvgs = vec![gap.clone()];
        let before = assemble(
            "NIFTY50",
            100.0,
            vec![
                (Timeframe::M5, before_snapshot),
                (Timeframe::M15, snapshot(Direction::Bullish, EventKind::Bos, 1_000)),
            ],
            2,
        )
        .unwrap();

        let mut mitigated = gap.clone();
        mitigated.mitigated = true;
        mitigated.mitigated_at = Some(Utc.timestamp_opt(2_000, 0).unwrap());
        let mut after_snapshot = snapshot(Direction::Bullish, EventKind::Bos, 1_000);
        after_snapshot.mitigated_fvgs = vec![mitigated];
        let after = assemble(
            "NIFTY50",
            100.0,
            vec![
                (Timeframe::M5, after_snapshot),
                (Timeframe::M15, snapshot(Direction::Bullish, EventKind::Bos, 1_000)),
            ],
            2,
        )
        .unwrap();

        generator.observe(&before);
        let alerts = generator.observe(&after);
        let fvg_alerts: Vec<&Alert> = alerts
            .iter()
            .filter(|a| a.kind == AlertKind::FvgMitigated)
            .collect();
        assert_eq!(fvg_alerts.len(), 1);

        // Re-observing the same state does not re-alert.
        let again = generator.observe(&after);
        assert!(again.iter().all(|a| a.kind != AlertKind::FvgMitigated));
    }
}
