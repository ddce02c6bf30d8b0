// =============================================================================
// End-to-end scenarios against the deterministic mock provider
// =============================================================================
//
// Each test seeds canned candle series, drives full scan cycles, and
// observes the engine through its public surfaces: the signal store, the
// alert ring, and a live bus subscription.
// =============================================================================

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use smc_scanner::alerts::{AlertFilter, BusEvent};
use smc_scanner::app_state::AppState;
use smc_scanner::market_data::{Candle, MockProvider, Quote};
use smc_scanner::scan_config::ScanConfig;
use smc_scanner::scanner::run_cycle;
use smc_scanner::signal_store::{SignalDirection, SignalFilter};
use smc_scanner::types::{AlertKind, Timeframe};

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

/// Quiet tape with a confirmed swing high at 20 (105.00) and a bullish
/// breakout close at 40 (105.80).
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

/// The breakout series extended with a confirmed swing low at 53 (104.00)
/// and a bearish CHOCH close at 65 (103.00).
fn reversal_series() -> Vec<Candle> {
    let mut series = breakout_series();
    for i in 48..72 {
        series.push(match i {
            53 => candle(53, 105.8, 106.0, 104.0, 105.7),
            65 => candle(65, 105.8, 105.9, 102.8, 103.0),
            i if i > 65 => candle(i, 103.0, 103.2, 102.8, 103.0),
            i => candle(i, 105.8, 106.0, 105.6, 105.9),
        });
    }
    series
}

fn seed(provider: &MockProvider, symbol: &str, series: &[Candle], quote_price: f64) {
    for tf in Timeframe::all() {
        provider.insert_series(symbol, tf, series.to_vec());
    }
    provider.insert_quote(
        symbol,
        Quote {
            price: quote_price,
            change_pct: 0.0,
            timestamp: Utc.timestamp_opt(100_000, 0).unwrap(),
        },
    );
}

fn engine(provider: Arc<MockProvider>, symbols: &[&str]) -> Arc<AppState> {
    let config = ScanConfig {
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        favorite_symbols: vec!["NIFTY50".to_string()],
        ..ScanConfig::default()
    };
    Arc::new(AppState::new(config, provider).unwrap())
}

#[tokio::test]
async fn full_cycle_publishes_cross_timeframe_signals() {
    let provider = Arc::new(MockProvider::new());
    seed(&provider, "NIFTY50", &breakout_series(), 105.9);
    seed(&provider, "BANKNIFTY", &breakout_series(), 105.9);
    let state = engine(provider, &["NIFTY50", "BANKNIFTY"]);

    run_cycle(&state, 0).await;

    // Both symbols aligned on all six timeframes.
    let signal = state.store.get("NIFTY50").expect("published");
    assert_eq!(signal.matching_timeframes, 6);
    assert_eq!(signal.timeframes.len(), 6);
    assert!(signal.overall_structure.is_bullish());
    assert!(!signal.stale);
    assert!(signal.mean_confidence > 50.0);
    // Entries are ranked by confidence descending.
    assert!(signal
        .timeframes
        .windows(2)
        .all(|w| w[0].snapshot.confidence >= w[1].snapshot.confidence));
    // Price sits on top of the break: proximity under half a percent.
    assert!(signal.avg_proximity_pct < 0.5);

    // Upper-direction query returns both, batch-ordered.
    let upper = state.store.query(&SignalFilter {
        direction: Some(SignalDirection::Upper),
        ..SignalFilter::default()
    });
    assert_eq!(upper.len(), 2);

    // Alias search resolves the spoken index name.
    let hits = state.store.search("bank nifty");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].symbol, "BANKNIFTY");

    // Stats counters line up.
    let stats = state.store.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.upper, 2);
    assert_eq!(stats.lower, 0);
    assert_eq!(stats.favorites, 1);
}

#[tokio::test]
async fn bos_entry_alert_fires_once_per_minute() {
    let provider = Arc::new(MockProvider::new());
    // Far from the break: |110.3 - 105.8| / 110.3 = 4.08 %.
    seed(&provider, "NIFTY50", &breakout_series(), 110.3);
    let state = engine(provider.clone(), &["NIFTY50"]);

    run_cycle(&state, 0).await;
    let far = state.store.get("NIFTY50").unwrap();
    assert!(far.avg_proximity_pct > 3.0);

    let mut stream = state.bus.subscribe(AlertFilter {
        kinds: Some(vec![AlertKind::BosEntry]),
        ..AlertFilter::default()
    });

    // Price approaches the break: |105.9 - 105.8| / 105.9 = 0.09 %.
    provider.insert_quote(
        "NIFTY50",
        Quote {
            price: 105.9,
            change_pct: -4.0,
            timestamp: Utc.timestamp_opt(100_300, 0).unwrap(),
        },
    );
    run_cycle(&state, 0).await;

    match stream.try_recv() {
        Some(BusEvent::Alert(alert)) => {
            assert_eq!(alert.kind, AlertKind::BosEntry);
            assert_eq!(alert.symbol, "NIFTY50");
        }
        other => panic!("expected BOS_ENTRY alert, got {other:?}"),
    }

    // Move away and back inside the dedup minute: no second alert.
    provider.insert_quote(
        "NIFTY50",
        Quote {
            price: 110.3,
            change_pct: 4.0,
            timestamp: Utc.timestamp_opt(100_600, 0).unwrap(),
        },
    );
    run_cycle(&state, 0).await;
    provider.insert_quote(
        "NIFTY50",
        Quote {
            price: 105.9,
            change_pct: -4.0,
            timestamp: Utc.timestamp_opt(100_900, 0).unwrap(),
        },
    );
    run_cycle(&state, 0).await;

    assert!(stream.try_recv().is_none());
    let entries = state
        .bus
        .recent(100)
        .into_iter()
        .filter(|a| a.kind == AlertKind::BosEntry)
        .count();
    assert_eq!(entries, 1);
}

#[tokio::test]
async fn reversal_emits_trend_change_and_bos_break() {
    let provider = Arc::new(MockProvider::new());
    seed(&provider, "NIFTY50", &breakout_series(), 105.9);
    let state = engine(provider.clone(), &["NIFTY50"]);

    run_cycle(&state, 0).await;
    assert!(state.store.get("NIFTY50").unwrap().overall_structure.is_bullish());

    // The next cycle sees the bearish CHOCH.
    seed(&provider, "NIFTY50", &reversal_series(), 103.0);
    run_cycle(&state, 0).await;

    let signal = state.store.get("NIFTY50").unwrap();
    assert!(signal.overall_structure.is_bearish());

    let kinds: Vec<AlertKind> = state.bus.recent(100).iter().map(|a| a.kind).collect();
    assert!(kinds.contains(&AlertKind::TrendChange));
    assert!(kinds.contains(&AlertKind::BosBreak));
}

#[tokio::test]
async fn unpublishable_update_keeps_prior_snapshot() {
    let provider = Arc::new(MockProvider::new());
    seed(&provider, "NIFTY50", &breakout_series(), 105.9);
    let state = engine(provider.clone(), &["NIFTY50"]);

    run_cycle(&state, 0).await;
    let first = state.store.get("NIFTY50").expect("published");

    // The series shrinks below the analyzable minimum: neutral everywhere,
    // below the alignment floor, so the prior record stands.
    let short = &breakout_series()[..10];
    seed(&provider, "NIFTY50", short, 100.0);
    run_cycle(&state, 0).await;

    let still = state.store.get("NIFTY50").expect("prior snapshot retained");
    assert_eq!(still.updated_at, first.updated_at);
    assert_eq!(still.current_price, first.current_price);
}

#[tokio::test]
async fn alert_stream_sees_live_publishes() {
    let provider = Arc::new(MockProvider::new());
    seed(&provider, "NIFTY50", &breakout_series(), 110.3);
    let state = engine(provider.clone(), &["NIFTY50"]);

    run_cycle(&state, 0).await;

    let mut all = state.bus.subscribe(AlertFilter::default());
    let mut other_symbol_only = state.bus.subscribe(AlertFilter {
        symbols: Some(vec!["BANKNIFTY".to_string()]),
        ..AlertFilter::default()
    });

    provider.insert_quote(
        "NIFTY50",
        Quote {
            price: 105.9,
            change_pct: -4.0,
            timestamp: Utc.timestamp_opt(100_300, 0).unwrap(),
        },
    );
    run_cycle(&state, 0).await;

    match all.recv().await {
        BusEvent::Alert(alert) => assert_eq!(alert.symbol, "NIFTY50"),
        other => panic!("expected alert, got {other:?}"),
    }
    // The filtered subscriber saw nothing.
    assert!(other_symbol_only.try_recv().is_none());
}
