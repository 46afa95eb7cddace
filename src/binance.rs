use crate::backfill::{self, CandleSource, SourceError, StopReason, Window, lenient_f64, lenient_i64};
use crate::candle::{self, Candle};
use crate::config::{FetchConfig, Settings};
use crate::writer;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use log::{info, warn};
use reqwest::Client;
use serde_json::Value;

const KLINES_URL: &str = "https://api.binance.com/api/v3/klines";
const INTERVAL_PARAM: &str = "5m";

/// Pages forward: the cursor is `startTime` in milliseconds, advanced past
/// the last kline of each page until it reaches "now".
struct BinanceSource {
    token: String,
    symbol: String,
    interval: Duration,
    origin: DateTime<Utc>,
    lookback: Duration,
}

impl BinanceSource {
    fn new(token: &str, symbol: &str, cfg: &FetchConfig) -> Self {
        Self {
            token: token.to_string(),
            symbol: symbol.to_string(),
            interval: cfg.interval,
            origin: Utc::now(),
            lookback: cfg.interval * cfg.history_target as i32,
        }
    }

    fn floor(&self) -> DateTime<Utc> {
        self.origin - self.lookback
    }
}

#[async_trait]
impl CandleSource for BinanceSource {
    fn token(&self) -> &str {
        &self.token
    }

    fn initial_window(&self) -> Window {
        Window { start: self.floor(), end: self.origin }
    }

    fn build_request(&self, client: &Client, window: &Window, limit: usize) -> reqwest::RequestBuilder {
        client.get(KLINES_URL).query(&[
            ("symbol", self.symbol.clone()),
            ("interval", INTERVAL_PARAM.to_string()),
            ("limit", limit.to_string()),
            ("startTime", window.start.timestamp_millis().to_string()),
        ])
    }

    fn parse_page(&self, body: &str) -> Result<Vec<Candle>, SourceError> {
        // Klines arrive as positional arrays with numeric fields quoted:
        // [openTime, open, high, low, close, volume, closeTime, ...]
        let rows: Vec<Vec<Value>> =
            serde_json::from_str(body).map_err(|err| SourceError::Shape(err.to_string()))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in &rows {
            if row.len() < 6 {
                return Err(SourceError::Shape(format!("short kline row ({} fields)", row.len())));
            }
            let millis = lenient_i64(&row[0])?;
            let timestamp = Utc
                .timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| SourceError::Shape(format!("out-of-range open time {millis}")))?;
            if timestamp < self.floor() {
                continue;
            }

            candles.push(Candle {
                token: self.token.clone(),
                timestamp,
                open: lenient_f64(&row[1])?,
                high: lenient_f64(&row[2])?,
                low: lenient_f64(&row[3])?,
                close: lenient_f64(&row[4])?,
                volume: lenient_f64(&row[5])?,
                marketcap: 0.0,
            });
        }
        Ok(candles)
    }

    fn next_window(&self, window: &Window, page: &[Candle]) -> Option<Window> {
        let latest = page.iter().map(|c| c.timestamp).max()?;
        let start = latest + self.interval;
        if start >= window.end {
            return None;
        }
        Some(Window { start, end: window.end })
    }
}

pub async fn run(settings: &Settings) -> Result<()> {
    let cfg = FetchConfig::binance(&settings.output_dir);
    let client = Client::new();

    for pair in &cfg.tokens {
        info!("[Binance] fetching 5-minute OHLCV for {}", pair.token);

        let source = BinanceSource::new(&pair.token, &pair.symbol, &cfg);
        let outcome = backfill::backfill(&client, &source, &cfg).await;
        if outcome.reason == StopReason::ApiError {
            warn!("[Binance] failed {}, discarding partial data", pair.token);
            backfill::pause(cfg.token_delay).await;
            continue;
        }
        if outcome.candles.is_empty() {
            warn!("[Binance] no data for {}", pair.token);
            backfill::pause(cfg.token_delay).await;
            continue;
        }

        let mut candles = outcome.candles;
        for c in &mut candles {
            c.marketcap = candle::volume_marketcap(c.high, c.low, c.volume);
        }

        match writer::write_candles(&cfg.output_dir, &pair.token, candles) {
            Ok(path) => info!("[Binance] saved {}", path.display()),
            Err(err) => warn!("[Binance] failed to write {}: {err}", pair.token),
        }
        backfill::pause(cfg.token_delay).await;
    }

    Ok(())
}
