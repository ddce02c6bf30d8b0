// =============================================================================
// Central Application State
// =============================================================================
//
// The single source of truth shared across the scanner, the alert pipeline,
// and the HTTP surface. Subsystems own their interior mutability; AppState
// ties them together under one Arc.
//
// Thread safety:
//   - Atomic counters for lock-free version / generation tracking.
//   - parking_lot::RwLock for mutable shared collections.
//   - The HTTP layer only reads; symbol workers are the only writers.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;

use crate::alerts::{AlertBus, AlertGenerator};
use crate::errors::ConfigError;
use crate::market_data::CandleProvider;
use crate::scan_config::ScanConfig;
use crate::signal_store::SignalStore;
use crate::types::Timeframe;

/// Progress of the periodic scan loop, surfaced via /stats.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStatus {
    pub last_scan_time: Option<DateTime<Utc>>,
    pub next_scan_at: Option<DateTime<Utc>>,
    pub scans_completed: u64,
    pub symbols_succeeded: u64,
    pub symbols_failed: u64,
}

/// Per-symbol failure tracking for backoff and unhealthy skips.
#[derive(Debug, Default)]
pub struct SymbolHealth {
    pub consecutive_failures: u32,
    pub backoff_until: Option<Instant>,
}

/// Shared state for all tasks. Constructed once at startup and wrapped in
/// an Arc immediately.
pub struct AppState {
    pub config: ScanConfig,
    /// Parsed once from the config at startup.
    pub timeframes: Vec<Timeframe>,

    pub provider: Arc<dyn CandleProvider>,
    pub store: SignalStore,
    pub bus: Arc<AlertBus>,
    pub alert_generator: AlertGenerator,

    /// Pinged by POST /rescan to pull the next tick forward.
    pub rescan: Notify,
    /// Current scan generation; workers from an older generation must not
    /// publish.
    pub scan_generation: AtomicU64,
    pub scan_status: RwLock<ScanStatus>,
    pub symbol_health: RwLock<HashMap<String, SymbolHealth>>,

    /// Incremented on every meaningful mutation; the WS feed and /health
    /// report it.
    pub state_version: AtomicU64,
    pub start_time: Instant,
}

impl AppState {
    /// Validate `config` and assemble the engine state around `provider`.
    pub fn new(
        config: ScanConfig,
        provider: Arc<dyn CandleProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let timeframes = config.parsed_timeframes()?;

        let store = SignalStore::new(config.stale_after(), config.favorite_symbols.clone());
        let alert_generator =
            AlertGenerator::new(config.proximity_near_pct, config.proximity_far_pct);

        Ok(Self {
            config,
            timeframes,
            provider,
            store,
            bus: Arc::new(AlertBus::new()),
            alert_generator,
            rescan: Notify::new(),
            scan_generation: AtomicU64::new(0),
            scan_status: RwLock::new(ScanStatus::default()),
            symbol_health: RwLock::new(HashMap::new()),
            state_version: AtomicU64::new(1),
            start_time: Instant::now(),
        })
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    /// Ask the scanner to run its next tick immediately.
    pub fn request_rescan(&self) {
        self.rescan.notify_one();
    }

    /// Seconds until the next scheduled tick, if the scanner has started.
    pub fn next_scan_in_seconds(&self) -> Option<i64> {
        self.scan_status
            .read()
            .next_scan_at
            .map(|at| (at - Utc::now()).num_seconds().max(0))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::MockProvider;

    #[test]
    fn state_construction_validates_config() {
        let provider = Arc::new(MockProvider::new());

        let state = AppState::new(ScanConfig::default(), provider.clone()).unwrap();
        assert_eq!(state.timeframes.len(), 6);
        assert_eq!(state.current_state_version(), 1);

        let bad = ScanConfig {
            scan_interval_secs: 0,
            ..ScanConfig::default()
        };
        assert!(AppState::new(bad, provider).is_err());
    }

    #[test]
    fn version_counter_increments() {
        let state =
            AppState::new(ScanConfig::default(), Arc::new(MockProvider::new())).unwrap();
        let before = state.current_state_version();
        state.increment_version();
        assert_eq!(state.current_state_version(), before + 1);
    }

    #[test]
    fn next_scan_seconds_clamps_at_zero() {
        let state =
            AppState::new(ScanConfig::default(), Arc::new(MockProvider::new())).unwrap();
        assert!(state.next_scan_in_seconds().is_none());

        state.scan_status.write().next_scan_at = Some(Utc::now() - chrono::Duration::seconds(5));
        assert_eq!(state.next_scan_in_seconds(), Some(0));
    }
}
