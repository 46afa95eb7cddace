use crate::backfill::{self, CandleSource, SourceError, StopReason, Window, lenient_f64};
use crate::candle::{self, Candle};
use crate::config::{FetchConfig, Settings};
use crate::writer;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use log::{info, warn};
use reqwest::Client;
use serde_json::Value;

const PRICE_URL: &str = "https://min-api.cryptocompare.com/data/pricemultifull";
const HISTORY_URL: &str = "https://min-api.cryptocompare.com/data/v2/histominute";

/// Minute bars aggregated server-side into 5-minute candles.
const AGGREGATE_MINUTES: u32 = 5;

/// Current market cap and price for one token, reduced to a circulating
/// supply multiplier. `None` when either value is missing or the price is
/// zero, which disqualifies the token.
async fn fetch_supply(client: &Client, api_key: &str, token: &str) -> Result<Option<f64>, SourceError> {
    let response = client
        .get(PRICE_URL)
        .header("authorization", format!("Apikey {api_key}"))
        .query(&[("fsyms", token), ("tsyms", "USD")])
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Status(status));
    }

    let body: Value = response.json().await?;
    let quote = body.pointer(&format!("/RAW/{token}/USD"));
    let marketcap = quote.and_then(|q| q.get("MKTCAP")).and_then(Value::as_f64);
    let price = quote.and_then(|q| q.get("PRICE")).and_then(Value::as_f64);

    match (marketcap, price) {
        (Some(cap), Some(price)) if price != 0.0 => Ok(Some(cap / price)),
        _ => Ok(None),
    }
}

/// Pages backward from now: each page ends at `toTs` and the cursor moves to
/// one second before the earliest candle returned.
struct CryptoCompareSource {
    token: String,
    api_key: String,
    origin: DateTime<Utc>,
    lookback: Duration,
}

impl CryptoCompareSource {
    fn new(token: &str, api_key: &str, cfg: &FetchConfig) -> Self {
        Self {
            token: token.to_string(),
            api_key: api_key.to_string(),
            origin: Utc::now(),
            lookback: cfg.interval * cfg.history_target as i32,
        }
    }
}

#[async_trait]
impl CandleSource for CryptoCompareSource {
    fn token(&self) -> &str {
        &self.token
    }

    fn initial_window(&self) -> Window {
        Window { start: self.origin - self.lookback, end: self.origin }
    }

    fn build_request(&self, client: &Client, window: &Window, limit: usize) -> reqwest::RequestBuilder {
        // The endpoint returns limit+1 rows, hence the -1.
        client
            .get(HISTORY_URL)
            .header("authorization", format!("Apikey {}", self.api_key))
            .query(&[("fsym", self.token.as_str()), ("tsym", "USD")])
            .query(&[
                ("limit", limit.saturating_sub(1).to_string()),
                ("aggregate", AGGREGATE_MINUTES.to_string()),
                ("toTs", window.end.timestamp().to_string()),
            ])
    }

    fn parse_page(&self, body: &str) -> Result<Vec<Candle>, SourceError> {
        let value: Value =
            serde_json::from_str(body).map_err(|err| SourceError::Shape(err.to_string()))?;
        let rows = value
            .pointer("/Data/Data")
            .and_then(Value::as_array)
            .ok_or_else(|| SourceError::Shape("missing Data.Data".to_string()))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let secs = row
                .get("time")
                .and_then(Value::as_i64)
                .ok_or_else(|| SourceError::Shape("candle without time".to_string()))?;
            let timestamp = Utc
                .timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| SourceError::Shape(format!("out-of-range time {secs}")))?;
            let field = |name: &str| -> Result<f64, SourceError> {
                lenient_f64(
                    row.get(name)
                        .ok_or_else(|| SourceError::Shape(format!("candle without {name}")))?,
                )
            };

            candles.push(Candle {
                token: self.token.clone(),
                timestamp,
                open: field("open")?,
                high: field("high")?,
                low: field("low")?,
                close: field("close")?,
                // volumefrom is the base-asset quantity; volumeto is quoted.
                volume: field("volumefrom")?,
                marketcap: 0.0,
            });
        }
        Ok(candles)
    }

    fn next_window(&self, window: &Window, page: &[Candle]) -> Option<Window> {
        let earliest = page.iter().map(|c| c.timestamp).min()?;
        let end = earliest - Duration::seconds(1);
        if end <= window.start {
            return None;
        }
        Some(Window { start: window.start, end })
    }
}

pub async fn run(settings: &Settings) -> Result<()> {
    let api_key = match &settings.cryptocompare_api_key {
        Some(key) => key.clone(),
        None => {
            warn!("[CryptoCompare] CRYPTOCOMPARE_API_KEY not set, skipping exchange");
            return Ok(());
        }
    };

    let cfg = FetchConfig::cryptocompare(&settings.output_dir);
    let client = Client::new();

    for pair in &cfg.tokens {
        info!("[CryptoCompare] fetching marketcap and price for {}", pair.token);
        let supply = match fetch_supply(&client, &api_key, &pair.token).await {
            Ok(Some(supply)) => supply,
            Ok(None) => {
                warn!("[CryptoCompare] skipping {} (missing marketcap or price)", pair.token);
                continue;
            }
            Err(err) => {
                warn!("[CryptoCompare] skipping {}: {err}", pair.token);
                continue;
            }
        };

        let source = CryptoCompareSource::new(&pair.token, &api_key, &cfg);
        let outcome = backfill::backfill(&client, &source, &cfg).await;
        if outcome.reason == StopReason::ApiError {
            // Whatever was collected before the failure is still written.
            warn!("[CryptoCompare] {} history ended early, keeping partial data", pair.token);
        }
        if outcome.candles.is_empty() {
            warn!("[CryptoCompare] no data for {}", pair.token);
            continue;
        }

        let mut candles = outcome.candles;
        for c in &mut candles {
            c.marketcap = candle::supply_marketcap(c.close, supply);
        }

        match writer::write_candles(&cfg.output_dir, &pair.token, candles) {
            Ok(path) => info!("[CryptoCompare] saved {}", path.display()),
            Err(err) => warn!("[CryptoCompare] failed to write {}: {err}", pair.token),
        }
        backfill::pause(cfg.token_delay).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn source() -> CryptoCompareSource {
        let cfg = FetchConfig::cryptocompare(Path::new("out"));
        CryptoCompareSource {
            token: "MAX".to_string(),
            api_key: "key".to_string(),
            // Anchored just after the fixture timestamps below.
            origin: Utc.timestamp_opt(1745920000, 0).unwrap(),
            lookback: cfg.interval * cfg.history_target as i32,
        }
    }

    #[test]
    fn parses_object_rows_and_maps_volumefrom() {
        let body = r#"{
            "Response": "Success",
            "Data": {
                "Data": [
                    {"time": 1745917200, "open": 1.0, "high": 2.0, "low": 0.5,
                     "close": 1.5, "volumefrom": 100.0, "volumeto": 150.0},
                    {"time": 1745917500, "open": 1.5, "high": 2.5, "low": 1.0,
                     "close": 2.0, "volumefrom": 50.0, "volumeto": 100.0}
                ]
            }
        }"#;

        let candles = source().parse_page(body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, Utc.timestamp_opt(1745917200, 0).unwrap());
        assert_eq!(candles[0].volume, 100.0);
        assert_eq!(candles[0].marketcap, 0.0);
        assert_eq!(candles[1].close, 2.0);
    }

    #[test]
    fn error_envelope_is_a_shape_error() {
        let body = r#"{"Response": "Error", "Message": "limit is larger than max value"}"#;
        assert!(matches!(source().parse_page(body), Err(SourceError::Shape(_))));
    }

    #[test]
    fn cursor_moves_past_the_earliest_candle() {
        let src = source();
        let window = src.initial_window();
        let page = src
            .parse_page(
                r#"{"Data": {"Data": [
                    {"time": 1745917200, "open": 1, "high": 2, "low": 0.5,
                     "close": 1.5, "volumefrom": 10}
                ]}}"#,
            )
            .unwrap();

        let next = src.next_window(&window, &page).unwrap();
        assert_eq!(next.end, Utc.timestamp_opt(1745917199, 0).unwrap());
        assert_eq!(next.start, window.start);
    }
}
