// =============================================================================
// Scan Scheduler — periodic per-symbol fan-out
// =============================================================================
//
// One logical periodic task. Every tick (or forced rescan) bumps the scan
// generation and spawns one worker per symbol, capped by a semaphore. A
// worker fetches every timeframe window (5 s per fetch), runs the batch
// aggregator, publishes to the signal store, and feeds the alert pipeline.
//
// Isolation rules:
//   - A worker past the soft deadline (tick interval minus one second) is
//     cut off and its partial result discarded.
//   - A worker from a superseded generation never publishes.
//   - A failing symbol backs off exponentially (deterministic jitter,
//     capped at the tick interval) and, after max_consecutive_failures,
//     sits out a full cycle. Other symbols are unaffected.
//   - Auth failures mark the symbol's snapshot stale; scanning continues.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::aggregator::{aggregate, InstrumentSignal};
use crate::analysis::AnalysisParams;
use crate::app_state::{AppState, SymbolHealth};
use crate::errors::{CandleSourceError, InvalidCandleError};

/// Per-fetch timeout for candles and quotes.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// First backoff step after a failure.
const BACKOFF_BASE_SECS: u64 = 2;

/// Everything that can end a symbol's tick early.
#[derive(Debug, Error)]
pub enum SymbolScanError {
    #[error(transparent)]
    Source(#[from] CandleSourceError),

    #[error(transparent)]
    Candle(#[from] InvalidCandleError),
}

/// Run the scheduler until the process shuts down.
pub async fn run(state: Arc<AppState>) {
    let interval = state.config.scan_interval();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        interval_secs = interval.as_secs(),
        symbols = state.config.symbols.len(),
        max_concurrent = state.config.max_concurrent_symbols,
        "scan scheduler starting"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = state.rescan.notified() => {
                info!("forced rescan requested");
                ticker.reset();
            }
        }

        let generation = state.scan_generation.fetch_add(1, Ordering::SeqCst) + 1;
        state.scan_status.write().next_scan_at =
            Some(Utc::now() + chrono::Duration::from_std(interval).unwrap_or_default());

        // Detached: a forced rescan starts the next cycle immediately, and
        // workers from this one notice the newer generation and stand down.
        let cycle_state = state.clone();
        tokio::spawn(async move {
            run_cycle(&cycle_state, generation).await;
        });
    }
}

/// Execute one full scan cycle for `generation`. Workers publish only while
/// `generation` is still the current one. Exposed so tests can drive a
/// single cycle without the timer loop.
pub async fn run_cycle(state: &Arc<AppState>, generation: u64) {
    let started = Instant::now();
    let deadline = state
        .config
        .scan_interval()
        .saturating_sub(Duration::from_secs(1));
    let semaphore = Arc::new(Semaphore::new(state.config.max_concurrent_symbols));

    let mut workers = JoinSet::new();
    let mut skipped = 0usize;

    for symbol in &state.config.symbols {
        if in_backoff(state, symbol) {
            debug!(symbol, "symbol in backoff, skipped this cycle");
            skipped += 1;
            continue;
        }

        let state = state.clone();
        let symbol = symbol.clone();
        let semaphore = semaphore.clone();
        workers.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return false;
            };
            scan_symbol_worker(&state, &symbol, generation, deadline).await
        });
    }

    let mut succeeded = 0u64;
    let mut failed = 0u64;
    while let Some(result) = workers.join_next().await {
        match result {
            Ok(true) => succeeded += 1,
            Ok(false) => failed += 1,
            Err(e) => {
                failed += 1;
                error!(error = %e, "symbol worker panicked");
            }
        }
    }

    {
        let mut status = state.scan_status.write();
        status.last_scan_time = Some(Utc::now());
        status.scans_completed += 1;
        status.symbols_succeeded += succeeded;
        status.symbols_failed += failed;
    }
    state.increment_version();

    info!(
        generation,
        succeeded,
        failed,
        skipped,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scan cycle complete"
    );
}

/// Scan one symbol end to end. Returns true on success (including "below
/// the alignment floor", which is a clean outcome).
async fn scan_symbol_worker(
    state: &Arc<AppState>,
    symbol: &str,
    generation: u64,
    deadline: Duration,
) -> bool {
    match tokio::time::timeout(deadline, scan_symbol(state, symbol)).await {
        Err(_) => {
            // Soft deadline: discard the partial result, no backoff. The
            // next tick retries naturally.
            warn!(symbol, "symbol worker exceeded its deadline, result discarded");
            false
        }
        Ok(Ok(Some(signal))) => {
            if state.scan_generation.load(Ordering::SeqCst) != generation {
                debug!(symbol, generation, "superseded worker, result discarded");
                return false;
            }
            publish(state, signal);
            clear_health(state, symbol);
            true
        }
        Ok(Ok(None)) => {
            debug!(symbol, "below alignment floor, nothing published");
            clear_health(state, symbol);
            true
        }
        Ok(Err(SymbolScanError::Source(e))) if e.is_auth() => {
            error!(symbol, error = %e, "authentication required, serving stale snapshot");
            state.store.mark_stale(symbol);
            false
        }
        Ok(Err(SymbolScanError::Candle(e))) => {
            warn!(symbol, error = %e, "invalid candle data, tick aborted");
            record_failure(state, symbol);
            false
        }
        Ok(Err(SymbolScanError::Source(e))) => {
            warn!(symbol, error = %e, "candle fetch failed");
            record_failure(state, symbol);
            false
        }
    }
}

/// Fetch every timeframe window plus the quote and aggregate them.
async fn scan_symbol(
    state: &Arc<AppState>,
    symbol: &str,
) -> Result<Option<InstrumentSignal>, SymbolScanError> {
    let quote = fetch(state.provider.latest_quote(symbol)).await?;

    let mut windows = Vec::with_capacity(state.timeframes.len());
    for timeframe in &state.timeframes {
        let candles = fetch(state.provider.fetch_candles(
            symbol,
            *timeframe,
            state.config.candle_lookback,
        ))
        .await?;
        windows.push((*timeframe, candles));
    }

    let params = AnalysisParams::from(&state.config);
    let signal = aggregate(
        symbol,
        quote.price,
        windows,
        &params,
        state.config.min_matching_timeframes,
    )?;
    Ok(signal)
}

/// Apply the per-fetch timeout, mapping expiry onto the transient class.
async fn fetch<T>(
    fut: impl std::future::Future<Output = Result<T, CandleSourceError>>,
) -> Result<T, SymbolScanError> {
    match tokio::time::timeout(FETCH_TIMEOUT, fut).await {
        Ok(result) => result.map_err(SymbolScanError::from),
        Err(_) => Err(CandleSourceError::Transient("fetch timed out".into()).into()),
    }
}

/// Publish a fresh signal and run the alert diff.
fn publish(state: &Arc<AppState>, signal: InstrumentSignal) {
    let alerts = state.alert_generator.observe(&signal);
    state.store.insert(signal);
    state.increment_version();

    for alert in alerts {
        info!(
            symbol = %alert.symbol,
            kind = %alert.kind,
            priority = %alert.priority,
            "alert emitted"
        );
        state.bus.publish(alert);
    }
}

fn in_backoff(state: &Arc<AppState>, symbol: &str) -> bool {
    state
        .symbol_health
        .read()
        .get(symbol)
        .and_then(|h| h.backoff_until)
        .is_some_and(|until| Instant::now() < until)
}

fn clear_health(state: &Arc<AppState>, symbol: &str) {
    let mut health = state.symbol_health.write();
    if let Some(entry) = health.get_mut(symbol) {
        *entry = SymbolHealth::default();
    }
}

fn record_failure(state: &Arc<AppState>, symbol: &str) {
    let mut health = state.symbol_health.write();
    let entry = health.entry(symbol.to_string()).or_default();
    entry.consecutive_failures += 1;

    let backoff = backoff_duration(
        entry.consecutive_failures,
        symbol,
        state.config.scan_interval(),
    );
    entry.backoff_until = Some(Instant::now() + backoff);

    if entry.consecutive_failures >= state.config.max_consecutive_failures {
        // Unhealthy: sit out a full cycle regardless of the backoff curve.
        entry.backoff_until = Some(Instant::now() + state.config.scan_interval());
        warn!(
            symbol,
            failures = entry.consecutive_failures,
            "symbol marked unhealthy, skipping one cycle"
        );
    }
}

/// Exponential backoff with deterministic per-symbol jitter, capped at the
/// tick interval. Jitter comes from a hash of the symbol name so retries
/// for different symbols spread out without any RNG.
fn backoff_duration(failures: u32, symbol: &str, cap: Duration) -> Duration {
    let exponent = failures.saturating_sub(1).min(6);
    let base = Duration::from_secs(BACKOFF_BASE_SECS << exponent);

    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in symbol.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    let jitter = Duration::from_millis(hash % 1_000);

    (base + jitter).min(cap)
}
