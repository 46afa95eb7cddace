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

const CANDLES_URL: &str = "https://api.kucoin.com/api/v1/market/candles";
const INTERVAL_PARAM: &str = "5min";
const OK_CODE: &str = "200000";

/// Seven-day request windows, walked backward from now.
const WINDOW_DAYS: i64 = 7;
/// Four windows cover the 28-day lookback.
const WINDOW_COUNT: i64 = 4;

/// Pages backward in fixed seven-day windows; the window steps back a week
/// after every page regardless of how many rows came back.
struct KuCoinSource {
    token: String,
    symbol: String,
    origin: DateTime<Utc>,
}

impl KuCoinSource {
    fn new(token: &str, symbol: &str) -> Self {
        Self {
            token: token.to_string(),
            symbol: symbol.to_string(),
            origin: Utc::now(),
        }
    }

    fn floor(&self) -> DateTime<Utc> {
        self.origin - Duration::days(WINDOW_DAYS * WINDOW_COUNT)
    }
}

#[async_trait]
impl CandleSource for KuCoinSource {
    fn token(&self) -> &str {
        &self.token
    }

    fn initial_window(&self) -> Window {
        Window { start: self.origin - Duration::days(WINDOW_DAYS), end: self.origin }
    }

    fn build_request(&self, client: &Client, window: &Window, _limit: usize) -> reqwest::RequestBuilder {
        client.get(CANDLES_URL).query(&[
            ("symbol", self.symbol.clone()),
            ("type", INTERVAL_PARAM.to_string()),
            ("startAt", window.start.timestamp().to_string()),
            ("endAt", window.end.timestamp().to_string()),
        ])
    }

    fn parse_page(&self, body: &str) -> Result<Vec<Candle>, SourceError> {
        let value: Value =
            serde_json::from_str(body).map_err(|err| SourceError::Shape(err.to_string()))?;
        let code = value
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::Shape("missing code".to_string()))?;
        if code != OK_CODE {
            return Err(SourceError::Shape(format!("api code {code}")));
        }
        let rows = value
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| SourceError::Shape("missing data".to_string()))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            // Rows are string arrays: [time, open, close, high, low, volume, turnover].
            let row = row
                .as_array()
                .ok_or_else(|| SourceError::Shape("candle is not an array".to_string()))?;
            if row.len() < 6 {
                return Err(SourceError::Shape(format!("short candle row ({} fields)", row.len())));
            }
            let secs = lenient_i64(&row[0])?;
            let timestamp = Utc
                .timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| SourceError::Shape(format!("out-of-range time {secs}")))?;

            candles.push(Candle {
                token: self.token.clone(),
                timestamp,
                open: lenient_f64(&row[1])?,
                close: lenient_f64(&row[2])?,
                high: lenient_f64(&row[3])?,
                low: lenient_f64(&row[4])?,
                volume: lenient_f64(&row[5])?,
                marketcap: 0.0,
            });
        }
        // Newest first within a page.
        candles.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(candles)
    }

    fn next_window(&self, window: &Window, _page: &[Candle]) -> Option<Window> {
        let step = Duration::days(WINDOW_DAYS);
        let next = Window { start: window.start - step, end: window.end - step };
        if next.end <= self.floor() {
            return None;
        }
        Some(next)
    }
}

pub async fn run(settings: &Settings) -> Result<()> {
    let cfg = FetchConfig::kucoin(&settings.output_dir);
    let client = Client::new();

    for pair in &cfg.tokens {
        info!("[KuCoin] fetching OHLCV for {}", pair.token);

        let source = KuCoinSource::new(&pair.token, &pair.symbol);
        let outcome = backfill::backfill(&client, &source, &cfg).await;
        if outcome.reason == StopReason::ApiError {
            warn!("[KuCoin] failed {}, discarding partial data", pair.token);
            backfill::pause(cfg.token_delay).await;
            continue;
        }
        if outcome.candles.is_empty() {
            warn!("[KuCoin] no data for {}", pair.token);
            backfill::pause(cfg.token_delay).await;
            continue;
        }

        let mut candles = outcome.candles;
        for c in &mut candles {
            c.marketcap = candle::volume_marketcap(c.high, c.low, c.volume);
        }

        match writer::write_candles(&cfg.output_dir, &pair.token, candles) {
            Ok(path) => info!("[KuCoin] saved {}", path.display()),
            Err(err) => warn!("[KuCoin] failed to write {}: {err}", pair.token),
        }
        backfill::pause(cfg.token_delay).await;
    }

    Ok(())
}
