// =============================================================================
// Scan Configuration — engine settings with atomic save
// =============================================================================
//
// Every tunable parameter lives here. The file is JSON on disk; persistence
// uses an atomic tmp + rename pattern to prevent corruption on crash. All
// fields carry serde defaults so that adding new fields never breaks loading
// an older config file.
//
// The configuration is validated once at startup. A validation failure is
// fatal (exit code 64); nothing else in the engine re-checks ranges.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ConfigError;
use crate::types::Timeframe;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "NIFTY50".to_string(),
        "BANKNIFTY".to_string(),
        "FINNIFTY".to_string(),
        "RELIANCE".to_string(),
        "HDFCBANK".to_string(),
    ]
}

fn default_timeframes() -> Vec<String> {
    vec![
        "5m".to_string(),
        "15m".to_string(),
        "30m".to_string(),
        "1h".to_string(),
        "2h".to_string(),
        "4h".to_string(),
    ]
}

fn default_scan_interval_secs() -> u64 {
    120
}

fn default_max_concurrent_symbols() -> usize {
    8
}

fn default_min_matching_timeframes() -> usize {
    2
}

fn default_candle_lookback() -> usize {
    150
}

fn default_swing_lookback() -> usize {
    20
}

fn default_bos_threshold_pct() -> f64 {
    0.3
}

fn default_choch_threshold_pct() -> f64 {
    0.5
}

fn default_min_structure_distance_pct() -> f64 {
    1.0
}

fn default_structure_lock_bars() -> usize {
    5
}

fn default_min_fvg_size_pct() -> f64 {
    0.2
}

fn default_fvg_prune_bars() -> usize {
    50
}

fn default_proximity_near_pct() -> f64 {
    2.0
}

fn default_proximity_far_pct() -> f64 {
    3.0
}

fn default_max_consecutive_failures() -> u32 {
    3
}

// =============================================================================
// ScanConfig
// =============================================================================

/// Top-level configuration for the scanner engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    // --- Universe ------------------------------------------------------------
    /// Instruments the engine scans.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Symbols pinned by the operator; counted separately in /stats.
    #[serde(default)]
    pub favorite_symbols: Vec<String>,

    /// Timeframe tokens analysed per instrument.
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,

    // --- Scheduling ----------------------------------------------------------
    /// Base scan period in seconds.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    /// Cap on simultaneously running symbol workers.
    #[serde(default = "default_max_concurrent_symbols")]
    pub max_concurrent_symbols: usize,

    /// Consecutive fetch failures before a symbol is skipped for a cycle.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Candles requested per (symbol, timeframe) fetch.
    #[serde(default = "default_candle_lookback")]
    pub candle_lookback: usize,

    // --- Structure detection -------------------------------------------------
    /// Base swing lookback before volatility adaptation.
    #[serde(default = "default_swing_lookback")]
    pub swing_lookback: usize,

    /// Close must clear the broken swing by this percentage for a BOS.
    #[serde(default = "default_bos_threshold_pct")]
    pub bos_threshold_pct: f64,

    /// Close must clear the opposing swing by this percentage for a CHOCH.
    #[serde(default = "default_choch_threshold_pct")]
    pub choch_threshold_pct: f64,

    /// Minimum distance from the prior opposite break, as a percentage of
    /// the broken level.
    #[serde(default = "default_min_structure_distance_pct")]
    pub min_structure_distance_pct: f64,

    /// Bars during which no further structure events are emitted after a
    /// break.
    #[serde(default = "default_structure_lock_bars")]
    pub structure_lock_bars: usize,

    // --- Fair value gaps -----------------------------------------------------
    /// Gaps smaller than this percentage of the middle close are rejected.
    #[serde(default = "default_min_fvg_size_pct")]
    pub min_fvg_size_pct: f64,

    /// Gaps older than this many bars of the analysed timeframe are pruned.
    #[serde(default = "default_fvg_prune_bars")]
    pub fvg_prune_bars: usize,

    // --- Cross-timeframe assembly -------------------------------------------
    /// Minimum count of timeframes with a valid signal for an instrument to
    /// be published.
    #[serde(default = "default_min_matching_timeframes")]
    pub min_matching_timeframes: usize,

    // --- Alerting ------------------------------------------------------------
    /// Proximity at or below which price counts as "at the level".
    #[serde(default = "default_proximity_near_pct")]
    pub proximity_near_pct: f64,

    /// Proximity above which price counts as "away from the level".
    #[serde(default = "default_proximity_far_pct")]
    pub proximity_far_pct: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            favorite_symbols: Vec::new(),
            timeframes: default_timeframes(),
            scan_interval_secs: default_scan_interval_secs(),
            max_concurrent_symbols: default_max_concurrent_symbols(),
            max_consecutive_failures: default_max_consecutive_failures(),
            candle_lookback: default_candle_lookback(),
            swing_lookback: default_swing_lookback(),
            bos_threshold_pct: default_bos_threshold_pct(),
            choch_threshold_pct: default_choch_threshold_pct(),
            min_structure_distance_pct: default_min_structure_distance_pct(),
            structure_lock_bars: default_structure_lock_bars(),
            min_fvg_size_pct: default_min_fvg_size_pct(),
            fvg_prune_bars: default_fvg_prune_bars(),
            min_matching_timeframes: default_min_matching_timeframes(),
            proximity_near_pct: default_proximity_near_pct(),
            proximity_far_pct: default_proximity_far_pct(),
        }
    }
}

impl ScanConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist the caller falls back to defaults with a
    /// warning; a present-but-unparseable file is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scan config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse scan config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            scan_interval_secs = config.scan_interval_secs,
            "scan config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise scan config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "scan config saved (atomic)");
        Ok(())
    }

    /// Validate numeric ranges and timeframe tokens. Called once at startup;
    /// any violation is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }

        self.parsed_timeframes()?;

        if self.scan_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan_interval_secs",
                reason: "must be positive".into(),
            });
        }
        if self.max_concurrent_symbols == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_symbols",
                reason: "must be positive".into(),
            });
        }
        if self.min_matching_timeframes == 0 || self.min_matching_timeframes > self.timeframes.len()
        {
            return Err(ConfigError::InvalidValue {
                field: "min_matching_timeframes",
                reason: format!(
                    "must be between 1 and the number of timeframes ({})",
                    self.timeframes.len()
                ),
            });
        }
        if self.swing_lookback < 5 {
            return Err(ConfigError::InvalidValue {
                field: "swing_lookback",
                reason: "must be at least 5".into(),
            });
        }

        for (field, value) in [
            ("bos_threshold_pct", self.bos_threshold_pct),
            ("choch_threshold_pct", self.choch_threshold_pct),
            ("min_structure_distance_pct", self.min_structure_distance_pct),
            ("min_fvg_size_pct", self.min_fvg_size_pct),
            ("proximity_near_pct", self.proximity_near_pct),
            ("proximity_far_pct", self.proximity_far_pct),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("must be a positive finite percentage, got {value}"),
                });
            }
        }

        if self.proximity_near_pct > self.proximity_far_pct {
            return Err(ConfigError::InvalidValue {
                field: "proximity_near_pct",
                reason: "must not exceed proximity_far_pct".into(),
            });
        }

        Ok(())
    }

    /// The configured timeframes, parsed. Unknown tokens are a ConfigError.
    pub fn parsed_timeframes(&self) -> Result<Vec<Timeframe>, ConfigError> {
        self.timeframes
            .iter()
            .map(|t| {
                Timeframe::from_token(t).ok_or_else(|| ConfigError::UnknownTimeframe(t.clone()))
            })
            .collect()
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Snapshots older than this are marked stale on read.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs * 3)
    }
}
