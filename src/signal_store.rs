// =============================================================================
// Signal Store — latest InstrumentSignal per symbol
// =============================================================================
//
// The only cross-worker mutable state in the engine. Writes are whole-record
// replaces under the store lock; reads hand out point-in-time clones with
// the stale flag computed against the freshness horizon. Partial updates do
// not exist.
//
// Query surface: alignment floor, Upper/Lower direction, proximity band,
// structure kind, and an alias-aware case-insensitive symbol search.
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::aggregator::{sort_batch, InstrumentSignal};
use crate::types::Structure;

/// Upper limit on search results.
const SEARCH_LIMIT: usize = 20;

/// Index aliases tolerated by search: spoken name -> listed symbol.
const SYMBOL_ALIASES: &[(&str, &str)] = &[
    ("bank nifty", "BANKNIFTY"),
    ("nifty bank", "BANKNIFTY"),
    ("nifty 50", "NIFTY50"),
    ("nifty fifty", "NIFTY50"),
    ("fin nifty", "FINNIFTY"),
    ("nifty fin", "FINNIFTY"),
];

/// Whether price sits in a bullish or bearish posture relative to structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Upper,
    Lower,
}

impl SignalDirection {
    pub fn from_token(s: &str) -> Option<SignalDirection> {
        match s.to_ascii_lowercase().as_str() {
            "upper" => Some(SignalDirection::Upper),
            "lower" => Some(SignalDirection::Lower),
            _ => None,
        }
    }

    fn matches(&self, structure: Structure) -> bool {
        match self {
            SignalDirection::Upper => structure.is_bullish(),
            SignalDirection::Lower => structure.is_bearish(),
        }
    }
}

/// Filter for store queries. All criteria are conjunctive; `None` means
/// "don't care".
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub min_matches: Option<usize>,
    pub direction: Option<SignalDirection>,
    /// Keep instruments whose average proximity is at most this percent.
    pub max_proximity_pct: Option<f64>,
    pub structure: Option<Structure>,
}

impl SignalFilter {
    fn accepts(&self, signal: &InstrumentSignal) -> bool {
        if let Some(min) = self.min_matches {
            if signal.matching_timeframes < min {
                return false;
            }
        }
        if let Some(direction) = self.direction {
            if !direction.matches(signal.overall_structure) {
                return false;
            }
        }
        if let Some(max_proximity) = self.max_proximity_pct {
            if signal.avg_proximity_pct > max_proximity {
                return false;
            }
        }
        if let Some(structure) = self.structure {
            if signal.overall_structure != structure {
                return false;
            }
        }
        true
    }
}

/// Aggregate counters for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub upper: usize,
    pub lower: usize,
    pub favorites: usize,
}

pub struct SignalStore {
    inner: RwLock<HashMap<String, InstrumentSignal>>,
    stale_after: Duration,
    favorites: Vec<String>,
}

impl SignalStore {
    pub fn new(stale_after: Duration, favorites: Vec<String>) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            stale_after,
            favorites,
        }
    }

    /// Whole-record replace for one symbol.
    pub fn insert(&self, signal: InstrumentSignal) {
        self.inner.write().insert(signal.symbol.clone(), signal);
    }

    /// Point-in-time copy with the stale flag computed.
    pub fn get(&self, symbol: &str) -> Option<InstrumentSignal> {
        self.inner.read().get(symbol).map(|s| self.with_staleness(s))
    }

    /// Flag a symbol's record stale immediately (provider auth loss).
    pub fn mark_stale(&self, symbol: &str) {
        if let Some(signal) = self.inner.write().get_mut(symbol) {
            signal.stale = true;
        }
    }

    /// All records passing `filter`, batch-ordered.
    pub fn query(&self, filter: &SignalFilter) -> Vec<InstrumentSignal> {
        let mut results: Vec<InstrumentSignal> = self
            .inner
            .read()
            .values()
            .filter(|s| filter.accepts(s))
            .map(|s| self.with_staleness(s))
            .collect();
        sort_batch(&mut results);
        results
    }

    /// Case-insensitive substring search over stored symbols, tolerant of
    /// spoken index aliases ("bank nifty" finds BANKNIFTY).
    pub fn search(&self, query: &str) -> Vec<InstrumentSignal> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let alias_hits: Vec<&str> = SYMBOL_ALIASES
            .iter()
            .filter(|(spoken, _)| spoken.contains(&needle) || needle.contains(spoken))
            .map(|(_, listed)| *listed)
            .collect();

        let mut results: Vec<InstrumentSignal> = self
            .inner
            .read()
            .values()
            .filter(|s| {
                s.symbol.to_lowercase().contains(&needle)
                    || alias_hits.iter().any(|a| *a == s.symbol)
            })
            .map(|s| self.with_staleness(s))
            .collect();

        results.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        results.truncate(SEARCH_LIMIT);
        results
    }

    /// Counters for /stats.
    pub fn stats(&self) -> StoreStats {
        let map = self.inner.read();
        let total = map.len();
        let upper = map
            .values()
            .filter(|s| s.overall_structure.is_bullish())
            .count();
        let lower = map
            .values()
            .filter(|s| s.overall_structure.is_bearish())
            .count();
        let favorites = self
            .favorites
            .iter()
            .filter(|f| map.contains_key(f.as_str()))
            .count();

        StoreStats {
            total,
            upper,
            lower,
            favorites,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    fn with_staleness(&self, signal: &InstrumentSignal) -> InstrumentSignal {
        let mut copy = signal.clone();
        let age = Utc::now().signed_duration_since(copy.updated_at);
        if age.num_seconds() >= 0 && age.to_std().unwrap_or_default() > self.stale_after {
            copy.stale = true;
        }
        copy
    }
}
