// =============================================================================
// Broker REST Client — HMAC-SHA256 signed history/quote requests
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. Signed requests
// carry the app id as a header and an HMAC signature over the query string
// plus a millisecond timestamp, tolerating minor clock drift broker-side.
//
// Error mapping is the contract the scanner relies on:
//   network error / timeout / 5xx  -> CandleSourceError::Transient
//   401 / 403                      -> CandleSourceError::Auth
//   unparseable payload            -> CandleSourceError::Invalid
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::errors::CandleSourceError;
use crate::market_data::{Candle, CandleProvider, Quote};
use crate::types::Timeframe;

type HmacSha256 = Hmac<Sha256>;

/// Per-request timeout for history and quote fetches.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Broker REST client with HMAC-SHA256 request signing.
pub struct BrokerClient {
    app_id: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    /// Cleared when the broker answers 401/403; `is_ready` reports it.
    session_valid: AtomicBool,
}

impl BrokerClient {
    /// Create a new `BrokerClient`.
    ///
    /// # Arguments
    /// * `app_id` — broker application id (sent as a header).
    /// * `secret` — secret used exclusively for HMAC signing.
    /// * `base_url` — broker REST endpoint, no trailing slash.
    pub fn new(
        app_id: impl Into<String>,
        secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let app_id = app_id.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&app_id) {
            default_headers.insert("X-APP-ID", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        debug!("BrokerClient initialised");

        Self {
            app_id,
            secret: secret.into(),
            base_url: base_url.into(),
            client,
            session_valid: AtomicBool::new(true),
        }
    }

    /// Produce an HMAC-SHA256 hex signature of `query`.
    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Append timestamp and signature to a query string.
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = format!("{params}&ts={ts}");
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    /// Broker resolution token for a timeframe (minutes).
    fn resolution(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M5 => "5",
            Timeframe::M15 => "15",
            Timeframe::M30 => "30",
            Timeframe::H1 => "60",
            Timeframe::H2 => "120",
            Timeframe::H4 => "240",
        }
    }

    /// Issue a GET and map transport/status failures onto the error taxonomy.
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, CandleSourceError> {
        // Transport failures of any flavour (DNS, connect, timeout, reset)
        // are retryable.
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CandleSourceError::Transient(format!("request failed: {e}")))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.session_valid.store(false, Ordering::Relaxed);
            warn!(app_id = %self.app_id, status = %status, "broker session rejected");
            return Err(CandleSourceError::Auth(format!(
                "broker returned {status}"
            )));
        }
        if status.is_server_error() {
            return Err(CandleSourceError::Transient(format!(
                "broker returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(CandleSourceError::Invalid(format!(
                "broker returned {status}"
            )));
        }

        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| CandleSourceError::Invalid(format!("malformed JSON body: {e}")))
    }

    /// Parse one `[ts, o, h, l, c, v]` row from the history payload.
    fn parse_candle_row(row: &serde_json::Value) -> Result<Candle, CandleSourceError> {
        let arr = row
            .as_array()
            .ok_or_else(|| CandleSourceError::Invalid("candle row is not an array".into()))?;
        if arr.len() < 6 {
            return Err(CandleSourceError::Invalid(format!(
                "candle row has {} fields, expected 6",
                arr.len()
            )));
        }

        let num = |i: usize, name: &str| -> Result<f64, CandleSourceError> {
            arr[i]
                .as_f64()
                .ok_or_else(|| CandleSourceError::Invalid(format!("field {name} is not numeric")))
        };

        let ts_secs = arr[0]
            .as_i64()
            .ok_or_else(|| CandleSourceError::Invalid("timestamp is not an integer".into()))?;
        let timestamp = Utc
            .timestamp_opt(ts_secs, 0)
            .single()
            .ok_or_else(|| CandleSourceError::Invalid(format!("bad timestamp {ts_secs}")))?;

        Ok(Candle {
            timestamp,
            open: num(1, "open")?,
            high: num(2, "high")?,
            low: num(3, "low")?,
            close: num(4, "close")?,
            volume: num(5, "volume")?,
        })
    }
}

#[async_trait]
impl CandleProvider for BrokerClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback: usize,
    ) -> Result<Vec<Candle>, CandleSourceError> {
        let params = format!(
            "symbol={symbol}&resolution={}&count={lookback}",
            Self::resolution(timeframe)
        );
        let url = format!("{}/data/history?{}", self.base_url, self.signed_query(&params));

        let body = self.get_json(&url).await?;

        let rows = body
            .get("candles")
            .and_then(|v| v.as_array())
            .ok_or_else(|| CandleSourceError::Invalid("missing `candles` array".into()))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            candles.push(Self::parse_candle_row(row)?);
        }

        // The broker occasionally interleaves rows at period boundaries;
        // the engine requires ascending order.
        candles.sort_by_key(|c| c.timestamp);

        debug!(
            symbol,
            timeframe = %timeframe,
            count = candles.len(),
            "history fetched"
        );

        Ok(candles)
    }

    async fn latest_quote(&self, symbol: &str) -> Result<Quote, CandleSourceError> {
        let params = format!("symbols={symbol}");
        let url = format!("{}/data/quotes?{}", self.base_url, self.signed_query(&params));

        let body = self.get_json(&url).await?;

        let quote = body
            .get("quotes")
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .ok_or_else(|| CandleSourceError::Invalid("missing `quotes` array".into()))?;

        let price = quote
            .get("ltp")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| CandleSourceError::Invalid("missing `ltp`".into()))?;
        let change_pct = quote.get("chp").and_then(|v| v.as_f64()).unwrap_or(0.0);

        if !price.is_finite() || price <= 0.0 {
            return Err(CandleSourceError::Invalid(format!(
                "non-positive last traded price {price}"
            )));
        }

        Ok(Quote {
            price,
            change_pct,
            timestamp: Utc::now(),
        })
    }

    fn is_ready(&self) -> bool {
        !self.app_id.is_empty()
            && !self.secret.is_empty()
            && self.session_valid.load(Ordering::Relaxed)
    }
}
